//! Schema.org synchronization for already-imported events.
//!
//! The orchestrator refreshes the side-table snapshot of each event's
//! ticket page; it never mutates the live Event on its own. Applying
//! snapshot fields to an event is a separate, operator-approved step.

use crate::error::{IngestError, Result};
use crate::fetcher::Fetcher;
use crate::html::extract_metadata;
use crate::schema_org::{parse_json_ld, SchemaOrgData, SchemaOrgStatus};
use crate::storage::{Event, RecordStore, SchemaOrgRecord};
use crate::types::SyncProgress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatchParams {
    /// Only events with no snapshot yet.
    #[serde(default)]
    pub only_missing: bool,
    #[serde(default = "default_batch_limit")]
    pub limit: usize,
}

fn default_batch_limit() -> usize {
    25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEventResult {
    pub event_id: Uuid,
    pub name: String,
    pub status: SchemaOrgStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStats {
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub not_found: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    pub results: Vec<SyncEventResult>,
    pub stats: BatchStats,
}

/// The comparable fields an operator may copy from the snapshot onto
/// the live event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncField {
    Name,
    Description,
    StartDate,
    EndDate,
    PriceMin,
    PriceMax,
    ImageUrl,
    TicketUrl,
}

pub const COMPARABLE_FIELDS: [SyncField; 8] = [
    SyncField::Name,
    SyncField::Description,
    SyncField::StartDate,
    SyncField::EndDate,
    SyncField::PriceMin,
    SyncField::PriceMax,
    SyncField::ImageUrl,
    SyncField::TicketUrl,
];

/// One field where the snapshot disagrees with the live event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDiff {
    pub field: SyncField,
    pub current: Option<String>,
    pub incoming: String,
}

fn display_date(date: Option<DateTime<Utc>>) -> Option<String> {
    date.map(|d| d.to_rfc3339())
}

fn date_differs(current: Option<DateTime<Utc>>, incoming: Option<DateTime<Utc>>) -> bool {
    // Calendar-date equality, so timezone formatting noise does not
    // show up as a diff.
    match incoming {
        Some(incoming) => current.map(|c| c.date_naive()) != Some(incoming.date_naive()),
        None => false,
    }
}

/// Flags a field only when the schema-derived value is present and
/// differs from the live event's value.
pub fn diff_fields(event: &Event, data: &SchemaOrgData) -> Vec<FieldDiff> {
    let mut diffs = Vec::new();
    for field in COMPARABLE_FIELDS {
        let diff = match field {
            SyncField::Name => data
                .name
                .as_ref()
                .filter(|incoming| **incoming != event.name)
                .map(|incoming| FieldDiff {
                    field,
                    current: Some(event.name.clone()),
                    incoming: incoming.clone(),
                }),
            SyncField::Description => data
                .description
                .as_ref()
                .filter(|incoming| Some(incoming.as_str()) != event.description.as_deref())
                .map(|incoming| FieldDiff {
                    field,
                    current: event.description.clone(),
                    incoming: incoming.clone(),
                }),
            SyncField::StartDate => (date_differs(event.start_date, data.start_date))
                .then(|| FieldDiff {
                    field,
                    current: display_date(event.start_date),
                    incoming: display_date(data.start_date).unwrap_or_default(),
                }),
            SyncField::EndDate => (date_differs(event.end_date, data.end_date)).then(|| {
                FieldDiff {
                    field,
                    current: display_date(event.end_date),
                    incoming: display_date(data.end_date).unwrap_or_default(),
                }
            }),
            SyncField::PriceMin => data
                .price_min
                .filter(|incoming| Some(*incoming) != event.price_min)
                .map(|incoming| FieldDiff {
                    field,
                    current: event.price_min.map(|p| p.to_string()),
                    incoming: incoming.to_string(),
                }),
            SyncField::PriceMax => data
                .price_max
                .filter(|incoming| Some(*incoming) != event.price_max)
                .map(|incoming| FieldDiff {
                    field,
                    current: event.price_max.map(|p| p.to_string()),
                    incoming: incoming.to_string(),
                }),
            SyncField::ImageUrl => data
                .image_url
                .as_ref()
                .filter(|incoming| Some(incoming.as_str()) != event.image_url.as_deref())
                .map(|incoming| FieldDiff {
                    field,
                    current: event.image_url.clone(),
                    incoming: incoming.clone(),
                }),
            SyncField::TicketUrl => data
                .ticket_url
                .as_ref()
                .filter(|incoming| Some(incoming.as_str()) != event.ticket_url.as_deref())
                .map(|incoming| FieldDiff {
                    field,
                    current: event.ticket_url.clone(),
                    incoming: incoming.clone(),
                }),
        };
        if let Some(diff) = diff {
            diffs.push(diff);
        }
    }
    diffs
}

pub struct SyncOrchestrator {
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn Fetcher>,
    workers: usize,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, fetcher: Arc<dyn Fetcher>, workers: usize) -> Self {
        Self {
            store,
            fetcher,
            workers: workers.max(1),
        }
    }

    /// Events currently eligible for sync under `only_missing`.
    pub async fn count_eligible(&self, only_missing: bool) -> Result<usize> {
        Ok(self
            .store
            .list_sync_candidates(only_missing, usize::MAX)
            .await?
            .len())
    }

    /// Runs one bounded batch: fetch, parse and upsert the snapshot for
    /// up to `limit` eligible events, with a fixed worker pool capping
    /// concurrent outbound requests. Result order is not guaranteed.
    #[instrument(skip(self), fields(limit = params.limit, only_missing = params.only_missing))]
    pub async fn run_batch(&self, params: SyncBatchParams) -> Result<BatchOutput> {
        let events = self
            .store
            .list_sync_candidates(params.only_missing, params.limit)
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();
        for event in events {
            let store = self.store.clone();
            let fetcher = self.fetcher.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                sync_one(store, fetcher, event).await
            });
        }

        let mut results = Vec::new();
        let mut stats = BatchStats::default();
        while let Some(joined) = join_set.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    warn!("Sync worker task failed: {e}");
                    continue;
                }
            };
            stats.processed += 1;
            match result.status {
                SchemaOrgStatus::Available => stats.success += 1,
                SchemaOrgStatus::NotFound => stats.not_found += 1,
                SchemaOrgStatus::Invalid | SchemaOrgStatus::Error => stats.failed += 1,
            }
            results.push(result);
        }
        debug!(
            "Batch done: {} processed, {} success, {} not found, {} failed",
            stats.processed, stats.success, stats.not_found, stats.failed
        );
        Ok(BatchOutput { results, stats })
    }

    /// Differences between an event and its snapshot. Requires an
    /// `available` snapshot.
    pub async fn diff_for_event(&self, event_id: Uuid) -> Result<Vec<FieldDiff>> {
        let (event, data) = self.event_with_snapshot(event_id).await?;
        Ok(diff_fields(&event, &data))
    }

    /// Copies the selected snapshot fields onto the live event and
    /// persists it. The only sync path that mutates an Event.
    pub async fn apply_fields(&self, event_id: Uuid, fields: &[SyncField]) -> Result<Event> {
        let (mut event, data) = self.event_with_snapshot(event_id).await?;
        for field in fields {
            match field {
                SyncField::Name => {
                    if let Some(name) = data.name.clone() {
                        event.name = name;
                    }
                }
                SyncField::Description => {
                    if data.description.is_some() {
                        event.description = data.description.clone();
                    }
                }
                SyncField::StartDate => {
                    if data.start_date.is_some() {
                        event.start_date = data.start_date;
                    }
                }
                SyncField::EndDate => {
                    if data.end_date.is_some() {
                        event.end_date = data.end_date;
                    }
                }
                SyncField::PriceMin => {
                    if data.price_min.is_some() {
                        event.price_min = data.price_min;
                    }
                }
                SyncField::PriceMax => {
                    if data.price_max.is_some() {
                        event.price_max = data.price_max;
                    }
                }
                SyncField::ImageUrl => {
                    if data.image_url.is_some() {
                        event.image_url = data.image_url.clone();
                    }
                }
                SyncField::TicketUrl => {
                    if data.ticket_url.is_some() {
                        event.ticket_url = data.ticket_url.clone();
                    }
                }
            }
        }
        self.store.update_event(&event).await?;
        Ok(event)
    }

    async fn event_with_snapshot(&self, event_id: Uuid) -> Result<(Event, SchemaOrgData)> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| IngestError::Validation(format!("no event with id {event_id}")))?;
        let record = self
            .store
            .get_schema_org_by_event(event_id)
            .await?
            .ok_or_else(|| {
                IngestError::Validation(format!("event {event_id} has no schema.org snapshot"))
            })?;
        let data = record.data.ok_or_else(|| {
            IngestError::Validation(format!(
                "snapshot for event {event_id} is not available (status {:?})",
                record.status
            ))
        })?;
        Ok((event, data))
    }
}

/// Fetches one event's ticket page and refreshes its snapshot.
/// `fetch_count` advances on every attempt, success or failure.
async fn sync_one(
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn Fetcher>,
    event: Event,
) -> SyncEventResult {
    let event_id = event.id.unwrap_or_default();
    let name = event.name.clone();

    let fail = |error: String| SyncEventResult {
        event_id,
        name: name.clone(),
        status: SchemaOrgStatus::Error,
        error: Some(error),
    };

    let Some(ticket_url) = event.ticket_url.as_deref() else {
        return fail("event has no ticket URL".to_string());
    };

    let previous = match store.get_schema_org_by_event(event_id).await {
        Ok(previous) => previous,
        Err(e) => return fail(format!("snapshot lookup failed: {e}")),
    };
    let fetch_count = previous.as_ref().map(|r| r.fetch_count).unwrap_or(0) + 1;
    let created_at = previous
        .as_ref()
        .map(|r| r.created_at)
        .unwrap_or_else(Utc::now);

    let mut record = SchemaOrgRecord {
        id: previous.as_ref().and_then(|r| r.id),
        event_id,
        raw_json_ld: previous.as_ref().and_then(|r| r.raw_json_ld.clone()),
        data: previous.and_then(|r| r.data),
        status: SchemaOrgStatus::Error,
        last_fetched_at: Utc::now(),
        last_error: None,
        fetch_count,
        created_at,
    };

    match fetcher.fetch(ticket_url).await {
        Err(e) => {
            // Keep the previous projection; the status marks it stale.
            record.status = SchemaOrgStatus::Error;
            record.last_error = Some(e.to_string());
        }
        Ok(page) => match extract_metadata(&page.body).json_ld {
            None => {
                record.status = SchemaOrgStatus::NotFound;
                record.raw_json_ld = None;
                record.data = None;
                record.last_error = Some("no JSON-LD Event block on ticket page".to_string());
            }
            Some(raw) => {
                let parsed = parse_json_ld(&raw);
                record.status = parsed.status;
                record.raw_json_ld = Some(parsed.raw_json_ld);
                record.data = parsed.data;
                record.last_error = parsed.error;
            }
        },
    }

    let status = record.status;
    let error = record.last_error.clone();
    if let Err(e) = store.upsert_schema_org(&mut record).await {
        return fail(format!("snapshot upsert failed: {e}"));
    }

    SyncEventResult {
        event_id,
        name,
        status,
        error,
    }
}

/// Explicit run state for the client-side batch loop.
#[derive(Debug, Clone)]
pub enum SyncRun {
    Idle,
    Running(SyncProgress),
    Done(SyncProgress),
    Capped(SyncProgress),
}

impl SyncRun {
    pub fn progress(&self) -> Option<&SyncProgress> {
        match self {
            SyncRun::Idle => None,
            SyncRun::Running(p) | SyncRun::Done(p) | SyncRun::Capped(p) => Some(p),
        }
    }
}

/// Sequential, client-paced batch driver: one batch at a time, awaiting
/// completion before issuing the next, bounded by a hard safety cap.
pub struct SyncDriver {
    orchestrator: Arc<SyncOrchestrator>,
    batch_size: usize,
    safety_cap: usize,
}

impl SyncDriver {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, batch_size: usize, safety_cap: usize) -> Self {
        Self {
            orchestrator,
            batch_size: batch_size.max(1),
            safety_cap: safety_cap.max(1),
        }
    }

    /// Drives batches to exhaustion or the safety cap. Partial progress
    /// is always surfaced, including on a terminal error.
    pub async fn run(&self, only_missing: bool) -> SyncRun {
        let total = match self.orchestrator.count_eligible(only_missing).await {
            Ok(total) => total,
            Err(e) => {
                return SyncRun::Done(SyncProgress {
                    last_error: Some(e.to_string()),
                    ..Default::default()
                })
            }
        };

        let mut progress = SyncProgress {
            total,
            ..Default::default()
        };
        info!("Starting sync run over {total} events");

        for _ in 0..self.safety_cap {
            if progress.processed >= progress.total {
                return SyncRun::Done(progress);
            }
            let remaining = progress.total - progress.processed;
            let limit = self.batch_size.min(remaining);

            let batch = match self
                .orchestrator
                .run_batch(SyncBatchParams {
                    only_missing,
                    limit,
                })
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    // Terminal error: stop issuing batches, keep the
                    // aggregate collected so far.
                    warn!("Sync run stopped on terminal error: {e}");
                    progress.last_error = Some(e.to_string());
                    return SyncRun::Done(progress);
                }
            };

            for result in &batch.results {
                match result.status {
                    SchemaOrgStatus::Available => {
                        progress.success += 1;
                        progress.successful_events.push(result.name.clone());
                    }
                    SchemaOrgStatus::NotFound => {
                        progress.not_found += 1;
                        progress.not_found_events.push(result.name.clone());
                    }
                    SchemaOrgStatus::Invalid | SchemaOrgStatus::Error => {
                        progress.failed += 1;
                        progress.failed_events.push(result.name.clone());
                    }
                }
            }
            progress.processed = (progress.processed + batch.stats.processed).min(progress.total);

            // A short batch means the eligible set is exhausted.
            if batch.results.len() < limit {
                return SyncRun::Done(progress);
            }
        }
        warn!("Sync run hit the safety cap with {} processed", progress.processed);
        SyncRun::Capped(progress)
    }
}
