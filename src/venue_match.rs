//! Fuzzy ranking of existing venues against a scraped venue name, with
//! locality bonuses for city and state agreement.

use crate::config::MatchingConfig;
use crate::error::Result;
use crate::similarity::{normalize, similarity};
use crate::storage::RecordStore;
use crate::types::{VenueMatch, VenueMatchResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MAX_RESULTS: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueQuery {
    pub venue_name: String,
    pub venue_city: Option<String>,
    pub venue_state: Option<String>,
}

/// Scores the bounded candidate pool and splits the survivors into a
/// best match and up to four alternatives.
pub async fn match_venue(
    store: &dyn RecordStore,
    config: &MatchingConfig,
    query: &VenueQuery,
) -> Result<VenueMatchResult> {
    let normalized_name = normalize(&query.venue_name);
    let first_token = normalized_name
        .split(' ')
        .next()
        .unwrap_or_default()
        .to_string();

    let pool = store
        .list_venue_candidates(
            query.venue_state.as_deref(),
            &first_token,
            config.venue_pool_cap,
        )
        .await?;
    debug!(
        "Scoring {} venue candidates for '{}'",
        pool.len(),
        query.venue_name
    );

    let mut scored: Vec<(f64, VenueMatch)> = Vec::new();
    for venue in pool {
        let Some(id) = venue.id else { continue };
        let mut score = similarity(&normalized_name, &normalize(&venue.name));

        if let (Some(query_city), Some(venue_city)) = (query.venue_city.as_deref(), venue.city.as_deref()) {
            if similarity(&normalize(query_city), &normalize(venue_city))
                > config.venue_city_similarity_floor
            {
                score += config.venue_city_bonus;
            }
        }
        if let (Some(query_state), Some(venue_state)) =
            (query.venue_state.as_deref(), venue.state.as_deref())
        {
            if query_state.eq_ignore_ascii_case(venue_state) {
                score += config.venue_state_bonus;
            }
        }
        let score = score.min(1.0);

        if score <= config.venue_score_floor {
            continue;
        }
        scored.push((
            score,
            VenueMatch {
                id,
                name: venue.name.clone(),
                slug: venue.slug.clone(),
                city: venue.city.clone(),
                state: venue.state.clone(),
                address: venue.street_address.clone(),
                confidence: (score * 100.0).round() as u32,
            },
        ));
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(MAX_RESULTS);

    let mut matches = scored.into_iter().map(|(_, m)| m);
    let best_match = matches.next();
    Ok(VenueMatchResult {
        match_found: best_match.is_some(),
        best_match,
        alternatives: matches.collect(),
    })
}
