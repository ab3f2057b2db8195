//! Preview -> select -> import workflow for scraped candidate events.

use crate::config::MatchingConfig;
use crate::dedup::{check_duplicate, DuplicateQuery};
use crate::error::{IngestError, Result};
use crate::storage::{Event, RecordStore, Venue};
use crate::types::{
    CandidateEvent, DuplicateVerdict, EventSummary, ImportOutcome, ListingParams, ScrapeSource,
    VenueDescriptor,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Generate a URL-friendly slug from a name.
pub fn generate_slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// One previewed candidate with its duplicate classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewEvent {
    #[serde(flatten)]
    pub event: CandidateEvent,
    pub duplicate: DuplicateVerdict,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    pub events: Vec<PreviewEvent>,
    pub total: usize,
    pub new_count: usize,
    pub existing_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// Default venue applied to every imported event, bypassing venue
    /// resolution from scraped descriptors.
    pub venue_id: Option<Uuid>,
    pub promoter_id: Uuid,
    /// Re-scrape each candidate's detail page before importing.
    #[serde(default)]
    pub fetch_details: bool,
    /// Update events that already exist instead of skipping them.
    #[serde(default)]
    pub update_existing: bool,
}

enum ItemResult {
    Imported(EventSummary),
    Updated(EventSummary),
    Skipped,
}

/// A fatal failure on the initial store lookup means the store is
/// unreachable and every remaining item would fail the same way; the
/// batch stops instead of piling up identical errors. Item-scoped
/// failures keep their per-item isolation.
enum ItemFailure {
    Batch(IngestError),
    Item(IngestError),
}

impl From<IngestError> for ItemFailure {
    fn from(e: IngestError) -> Self {
        ItemFailure::Item(e)
    }
}

pub struct ImportOrchestrator {
    store: Arc<dyn RecordStore>,
    matching: MatchingConfig,
}

impl ImportOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, matching: MatchingConfig) -> Self {
        Self { store, matching }
    }

    /// Scrapes a source listing and annotates every candidate with its
    /// duplicate verdict for operator review.
    #[instrument(skip(self, source, params), fields(source = source.source_id()))]
    pub async fn preview(
        &self,
        source: &dyn ScrapeSource,
        params: &ListingParams,
    ) -> Result<PreviewResult> {
        let candidates = source.list_candidates(params).await?;

        let mut events = Vec::with_capacity(candidates.len());
        let mut existing_count = 0;
        for candidate in candidates {
            let verdict = check_duplicate(
                self.store.as_ref(),
                &self.matching,
                &DuplicateQuery {
                    source_url: Some(candidate.source_url.clone()),
                    name: Some(candidate.name.clone()),
                    start_date: candidate.start_date,
                },
            )
            .await?;
            if verdict.is_duplicate {
                existing_count += 1;
            }
            events.push(PreviewEvent {
                event: candidate,
                duplicate: verdict,
            });
        }

        let total = events.len();
        Ok(PreviewResult {
            new_count: total - existing_count,
            existing_count,
            total,
            events,
        })
    }

    /// Imports the operator-selected candidates. Each event is isolated:
    /// a failure is recorded in the outcome's error list and the batch
    /// continues. A fatal store failure aborts the batch, surfacing the
    /// partial outcome.
    #[instrument(skip_all, fields(count = candidates.len()))]
    pub async fn import(
        &self,
        source: Option<&dyn ScrapeSource>,
        candidates: Vec<CandidateEvent>,
        options: &ImportOptions,
    ) -> Result<ImportOutcome> {
        let mut outcome = ImportOutcome::default();

        for mut candidate in candidates {
            let label = if candidate.name.is_empty() {
                candidate.source_url.clone()
            } else {
                candidate.name.clone()
            };
            match self
                .import_one(source, &mut candidate, options, &mut outcome)
                .await
            {
                Ok(ItemResult::Imported(summary)) => {
                    outcome.imported += 1;
                    outcome.created_events.push(summary);
                }
                Ok(ItemResult::Updated(summary)) => {
                    outcome.updated += 1;
                    outcome.updated_events.push(summary);
                }
                Ok(ItemResult::Skipped) => outcome.skipped += 1,
                Err(ItemFailure::Batch(e)) => {
                    warn!("Aborting import batch: {e}");
                    outcome.errors.push(format!("import aborted: {e}"));
                    break;
                }
                Err(ItemFailure::Item(e)) => {
                    warn!("Import failed for '{label}': {e}");
                    outcome.errors.push(format!("{label}: {e}"));
                }
            }
        }

        info!(
            "Import finished: {} imported, {} updated, {} skipped, {} venues created, {} errors",
            outcome.imported,
            outcome.updated,
            outcome.skipped,
            outcome.venues_created,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    async fn import_one(
        &self,
        source: Option<&dyn ScrapeSource>,
        candidate: &mut CandidateEvent,
        options: &ImportOptions,
        outcome: &mut ImportOutcome,
    ) -> std::result::Result<ItemResult, ItemFailure> {
        let existing = self
            .store
            .find_event_by_source_url(&candidate.source_url)
            .await
            .map_err(|e| {
                if e.is_fatal() {
                    ItemFailure::Batch(e)
                } else {
                    ItemFailure::Item(e)
                }
            })?;
        if existing.is_some() && !options.update_existing {
            return Ok(ItemResult::Skipped);
        }

        if options.fetch_details {
            if let Some(source) = source {
                let detail = source.fetch_detail(&candidate.source_url).await?;
                candidate.merge_detail(detail);
            }
        }

        let venue_id = self.resolve_venue(candidate, options, outcome).await?;

        match existing {
            Some(mut event) => {
                apply_candidate(&mut event, candidate, options, venue_id);
                self.store.update_event(&event).await?;
                Ok(ItemResult::Updated(summary_of(&event)))
            }
            None => {
                let slug = self.unique_event_slug(&candidate.name).await?;
                let mut event = Event::new(candidate.name.clone(), slug);
                apply_candidate(&mut event, candidate, options, venue_id);
                self.store.create_event(&mut event).await?;
                Ok(ItemResult::Imported(summary_of(&event)))
            }
        }
    }

    /// Explicit default venue, else a venue previously created from the
    /// same source, else a fresh venue from the scraped descriptor.
    async fn resolve_venue(
        &self,
        candidate: &CandidateEvent,
        options: &ImportOptions,
        outcome: &mut ImportOutcome,
    ) -> Result<Option<Uuid>> {
        if let Some(venue_id) = options.venue_id {
            return Ok(Some(venue_id));
        }
        let Some(descriptor) = candidate.venue.as_ref() else {
            return Ok(None);
        };
        if descriptor.name.trim().is_empty() {
            return Ok(None);
        }

        if let Some(existing) = self
            .store
            .find_venue_from_source(&candidate.source_name, &descriptor.name)
            .await?
        {
            return Ok(existing.id);
        }

        let venue_id = self.create_venue(candidate, descriptor).await?;
        outcome.venues_created += 1;
        Ok(Some(venue_id))
    }

    async fn create_venue(
        &self,
        candidate: &CandidateEvent,
        descriptor: &VenueDescriptor,
    ) -> Result<Uuid> {
        let slug = self.unique_venue_slug(&descriptor.name).await?;
        let mut venue = Venue {
            id: None,
            name: descriptor.name.clone(),
            slug,
            street_address: descriptor.street_address.clone(),
            city: descriptor.city.clone(),
            state: descriptor.state.clone(),
            zip: descriptor.zip.clone(),
            source_name: Some(candidate.source_name.clone()),
            created_at: Utc::now(),
        };
        self.store.create_venue(&mut venue).await?;
        venue
            .id
            .ok_or_else(|| crate::error::IngestError::store("venue created without id"))
    }

    /// Probes the store until a free slug is found, appending `-N`.
    pub async fn unique_event_slug(&self, name: &str) -> Result<String> {
        let base = non_empty_slug(name, "event");
        let mut slug = base.clone();
        let mut suffix = 1;
        while self.store.find_event_by_slug(&slug).await?.is_some() {
            slug = format!("{base}-{suffix}");
            suffix += 1;
        }
        Ok(slug)
    }

    async fn unique_venue_slug(&self, name: &str) -> Result<String> {
        let base = non_empty_slug(name, "venue");
        let mut slug = base.clone();
        let mut suffix = 1;
        while self.store.find_venue_by_slug(&slug).await?.is_some() {
            slug = format!("{base}-{suffix}");
            suffix += 1;
        }
        Ok(slug)
    }
}

fn non_empty_slug(name: &str, fallback: &str) -> String {
    let slug = generate_slug(name);
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn summary_of(event: &Event) -> EventSummary {
    EventSummary {
        id: event.id.unwrap_or_default(),
        slug: event.slug.clone(),
        name: event.name.clone(),
    }
}

fn apply_candidate(
    event: &mut Event,
    candidate: &CandidateEvent,
    options: &ImportOptions,
    venue_id: Option<Uuid>,
) {
    event.name = candidate.name.clone();
    event.description = candidate.description.clone();
    event.start_date = candidate.start_date;
    event.end_date = candidate.end_date;
    event.promoter_id = Some(options.promoter_id);
    if venue_id.is_some() {
        event.venue_id = venue_id;
    }
    event.source_name = Some(candidate.source_name.clone());
    event.source_url = Some(candidate.source_url.clone());
    event.ticket_url = candidate.ticket_url.clone();
    event.image_url = candidate.image_url.clone();
    event.price_min = candidate.price_min;
    event.price_max = candidate.price_max;
    event.categories = candidate.vendor_types.clone();
    event.commercial_vendors_allowed = candidate.commercial_vendors_allowed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use chrono::TimeZone;

    fn candidate(name: &str, url: &str) -> CandidateEvent {
        CandidateEvent {
            source_id: generate_slug(name),
            source_name: "midwest_fairs".to_string(),
            source_url: url.to_string(),
            name: name.to_string(),
            start_date: Some(chrono::Utc.with_ymd_and_hms(2025, 10, 4, 0, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    fn options() -> ImportOptions {
        ImportOptions {
            venue_id: None,
            promoter_id: Uuid::new_v4(),
            fetch_details: false,
            update_existing: false,
        }
    }

    #[test]
    fn slug_generation() {
        assert_eq!(generate_slug("Fall Festival"), "fall-festival");
        assert_eq!(generate_slug("Tom & Jerry's Show"), "tom-jerry-s-show");
        assert_eq!(generate_slug("  Spaces  Between  "), "spaces-between");
    }

    #[tokio::test]
    async fn same_name_events_get_suffixed_slugs() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = ImportOrchestrator::new(store.clone(), MatchingConfig::default());

        let outcome = orchestrator
            .import(
                None,
                vec![
                    candidate("Fall Festival", "https://a.example.com/e/1"),
                    candidate("Fall Festival", "https://b.example.com/e/2"),
                ],
                &options(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.imported, 2);
        let slugs: Vec<&str> = outcome
            .created_events
            .iter()
            .map(|s| s.slug.as_str())
            .collect();
        assert!(slugs.contains(&"fall-festival"));
        assert!(slugs.contains(&"fall-festival-1"));
    }

    #[tokio::test]
    async fn existing_events_skip_unless_updating() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = ImportOrchestrator::new(store.clone(), MatchingConfig::default());
        let url = "https://fairs.example.com/event/repeat";

        let first = orchestrator
            .import(None, vec![candidate("Repeat Fair", url)], &options())
            .await
            .unwrap();
        assert_eq!(first.imported, 1);

        let second = orchestrator
            .import(None, vec![candidate("Repeat Fair", url)], &options())
            .await
            .unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.skipped, 1);

        let mut updating = options();
        updating.update_existing = true;
        let mut renamed = candidate("Repeat Fair Deluxe", url);
        renamed.price_min = Some(5.0);
        let third = orchestrator.import(None, vec![renamed], &updating).await.unwrap();
        assert_eq!(third.updated, 1);

        let stored = store.find_event_by_source_url(url).await.unwrap().unwrap();
        assert_eq!(stored.name, "Repeat Fair Deluxe");
        assert_eq!(stored.price_min, Some(5.0));
        // Slug is assigned at creation and stays stable across updates
        assert_eq!(stored.slug, "repeat-fair");
    }

    #[tokio::test]
    async fn scraped_venues_are_created_once_per_source() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = ImportOrchestrator::new(store.clone(), MatchingConfig::default());

        let descriptor = VenueDescriptor {
            name: "County Fairgrounds".to_string(),
            city: Some("Springfield".to_string()),
            state: Some("IL".to_string()),
            ..Default::default()
        };
        let mut first = candidate("Spring Fair", "https://f.example.com/e/1");
        first.venue = Some(descriptor.clone());
        let mut second = candidate("Autumn Fair", "https://f.example.com/e/2");
        second.venue = Some(descriptor);

        let outcome = orchestrator
            .import(None, vec![first, second], &options())
            .await
            .unwrap();

        assert_eq!(outcome.imported, 2);
        assert_eq!(outcome.venues_created, 1);
        let spring = store
            .find_event_by_source_url("https://f.example.com/e/1")
            .await
            .unwrap()
            .unwrap();
        let autumn = store
            .find_event_by_source_url("https://f.example.com/e/2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spring.venue_id, autumn.venue_id);
        assert!(spring.venue_id.is_some());
    }

    #[tokio::test]
    async fn explicit_default_venue_bypasses_creation() {
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = ImportOrchestrator::new(store.clone(), MatchingConfig::default());

        let mut opts = options();
        let default_venue = Uuid::new_v4();
        opts.venue_id = Some(default_venue);

        let mut item = candidate("Craft Expo", "https://f.example.com/e/9");
        item.venue = Some(VenueDescriptor {
            name: "Ignored Hall".to_string(),
            ..Default::default()
        });
        let outcome = orchestrator.import(None, vec![item], &opts).await.unwrap();
        assert_eq!(outcome.venues_created, 0);

        let stored = store
            .find_event_by_source_url("https://f.example.com/e/9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.venue_id, Some(default_venue));
    }
}
