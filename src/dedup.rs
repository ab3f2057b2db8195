//! Duplicate detection for candidate events against the existing
//! catalog. An exact source URL is authoritative; name plus start date
//! is a heuristic with a configurable window and threshold.

use crate::config::MatchingConfig;
use crate::error::Result;
use crate::similarity::{normalize, similarity};
use crate::storage::{Event, RecordStore};
use crate::types::{DuplicateVerdict, MatchType, MatchedEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateQuery {
    pub source_url: Option<String>,
    pub name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
}

impl DuplicateQuery {
    pub fn is_empty(&self) -> bool {
        self.source_url.is_none() && (self.name.is_none() || self.start_date.is_none())
    }
}

fn matched(event: &Event) -> Option<MatchedEvent> {
    Some(MatchedEvent {
        id: event.id?,
        slug: event.slug.clone(),
        name: event.name.clone(),
        start_date: event.start_date,
        status: event.status.clone(),
    })
}

/// Normalized title with any trailing year token dropped, so "Fair
/// 2025" and "Fair" compare as the same title.
fn normalize_title(name: &str) -> String {
    let normalized = normalize(name);
    let mut tokens: Vec<&str> = normalized.split(' ').collect();
    while let Some(last) = tokens.last() {
        let is_year = last.len() == 4
            && last.chars().all(|c| c.is_ascii_digit())
            && (last.starts_with("19") || last.starts_with("20"));
        if is_year && tokens.len() > 1 {
            tokens.pop();
        } else {
            break;
        }
    }
    tokens.join(" ")
}

/// Classifies a candidate against existing events, short-circuiting on
/// the first hit.
pub async fn check_duplicate(
    store: &dyn RecordStore,
    config: &MatchingConfig,
    query: &DuplicateQuery,
) -> Result<DuplicateVerdict> {
    // 1. Exact source URL
    if let Some(url) = query.source_url.as_deref() {
        if let Some(existing) = store.find_event_by_source_url(url).await? {
            debug!("Duplicate by exact source URL: {url}");
            return Ok(DuplicateVerdict {
                is_duplicate: true,
                match_type: MatchType::ExactUrl,
                similarity: None,
                matched_event: matched(&existing),
            });
        }
    }

    // 2. Similar name within the date window
    if let (Some(name), Some(start_date)) = (query.name.as_deref(), query.start_date) {
        let window = Duration::days(config.duplicate_window_days);
        let candidates = store
            .find_events_in_window(start_date - window, start_date + window)
            .await?;
        let normalized_query = normalize_title(name);
        for existing in &candidates {
            let score = similarity(&normalized_query, &normalize_title(&existing.name));
            if score > config.name_similarity_threshold {
                debug!(
                    "Duplicate by name/date: '{}' ~ '{}' ({:.2})",
                    name, existing.name, score
                );
                return Ok(DuplicateVerdict {
                    is_duplicate: true,
                    match_type: MatchType::SimilarNameDate,
                    similarity: Some((score * 100.0).round() as u32),
                    matched_event: matched(existing),
                });
            }
        }
    }

    Ok(DuplicateVerdict::none())
}
