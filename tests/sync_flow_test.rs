use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use eventdir_ingest::error::{IngestError, Result as IngestResult};
use eventdir_ingest::fetcher::{FetchedPage, Fetcher};
use eventdir_ingest::schema_org::SchemaOrgStatus;
use eventdir_ingest::storage::{Event, InMemoryStore, RecordStore};
use eventdir_ingest::sync::{
    SyncBatchParams, SyncDriver, SyncField, SyncOrchestrator, SyncRun,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct CannedFetcher {
    pages: HashMap<String, String>,
    fetches: AtomicUsize,
}

impl CannedFetcher {
    fn new(pages: HashMap<String, String>) -> Self {
        Self {
            pages,
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Fetcher for CannedFetcher {
    async fn fetch(&self, url: &str) -> IngestResult<FetchedPage> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(url) {
            Some(body) => Ok(FetchedPage {
                status: 200,
                content_type: Some("text/html".to_string()),
                body: body.clone(),
            }),
            None => Err(IngestError::Fetch {
                url: url.to_string(),
                message: "origin returned HTTP 404".to_string(),
            }),
        }
    }
}

fn ticket_page(name: &str, start: &str, price: f64) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"@context": "https://schema.org", "@type": "Event",
          "name": "{name}", "startDate": "{start}",
          "offers": {{"price": {price}}}}}
        </script></head><body>{name}</body></html>"#
    )
}

async fn seed_event(store: &InMemoryStore, name: &str, slug: &str, ticket_url: &str) -> Event {
    let mut event = Event::new(name, slug);
    event.ticket_url = Some(ticket_url.to_string());
    store.create_event(&mut event).await.unwrap();
    event
}

#[tokio::test]
async fn batch_classifies_success_not_found_and_failed() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    seed_event(&store, "Good Fair", "good-fair", "https://t.example.com/good").await;
    seed_event(&store, "Plain Page", "plain-page", "https://t.example.com/plain").await;
    seed_event(&store, "Gone Fair", "gone-fair", "https://t.example.com/gone").await;

    let mut pages = HashMap::new();
    pages.insert(
        "https://t.example.com/good".to_string(),
        ticket_page("Good Fair Updated", "2025-09-01", 10.0),
    );
    pages.insert(
        "https://t.example.com/plain".to_string(),
        "<html><body>no structured data here</body></html>".to_string(),
    );
    let fetcher = Arc::new(CannedFetcher::new(pages));

    let orchestrator = SyncOrchestrator::new(store.clone(), fetcher, 2);
    let output = orchestrator
        .run_batch(SyncBatchParams {
            only_missing: false,
            limit: 10,
        })
        .await?;

    assert_eq!(output.stats.processed, 3);
    assert_eq!(output.stats.success, 1);
    assert_eq!(output.stats.not_found, 1);
    assert_eq!(output.stats.failed, 1);

    let by_name: HashMap<&str, SchemaOrgStatus> = output
        .results
        .iter()
        .map(|r| (r.name.as_str(), r.status))
        .collect();
    assert_eq!(by_name["Good Fair"], SchemaOrgStatus::Available);
    assert_eq!(by_name["Plain Page"], SchemaOrgStatus::NotFound);
    assert_eq!(by_name["Gone Fair"], SchemaOrgStatus::Error);

    // Snapshots recorded for every attempt, success or failure.
    let records = store.list_schema_org().await?;
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.fetch_count == 1));

    // Live events are never touched by sync itself.
    let good = store.find_event_by_slug("good-fair").await?.unwrap();
    assert_eq!(good.name, "Good Fair");
    Ok(())
}

#[tokio::test]
async fn fetch_count_is_monotonic_across_batches() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let event = seed_event(&store, "Fair", "fair", "https://t.example.com/fair").await;

    let fetcher = Arc::new(CannedFetcher::new(HashMap::new()));
    let orchestrator = SyncOrchestrator::new(store.clone(), fetcher, 1);
    let params = SyncBatchParams {
        only_missing: false,
        limit: 5,
    };
    orchestrator.run_batch(params).await?;
    orchestrator.run_batch(params).await?;
    orchestrator.run_batch(params).await?;

    let record = store
        .get_schema_org_by_event(event.id.unwrap())
        .await?
        .unwrap();
    assert_eq!(record.fetch_count, 3);
    assert_eq!(record.status, SchemaOrgStatus::Error);
    assert!(record.last_error.is_some());
    Ok(())
}

#[tokio::test]
async fn driver_issues_ceil_n_over_b_batches_and_stops() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let mut pages = HashMap::new();
    for i in 0..5 {
        let url = format!("https://t.example.com/e{i}");
        seed_event(&store, &format!("Event {i}"), &format!("event-{i}"), &url).await;
        pages.insert(url, ticket_page(&format!("Event {i}"), "2025-06-01", 5.0));
    }
    let fetcher = Arc::new(CannedFetcher::new(pages));

    let orchestrator = Arc::new(SyncOrchestrator::new(store.clone(), fetcher.clone(), 2));
    let driver = SyncDriver::new(orchestrator, 2, 100);
    let run = driver.run(false).await;

    let progress = match run {
        SyncRun::Done(progress) => progress,
        other => panic!("expected a completed run, got {other:?}"),
    };
    assert_eq!(progress.total, 5);
    assert_eq!(progress.processed, 5);
    assert_eq!(progress.success, 5);
    assert!(progress.processed <= progress.total);
    // ceil(5/2) batches of sizes 2, 2, 1: each event fetched once.
    assert_eq!(fetcher.fetches.load(Ordering::SeqCst), 5);
    Ok(())
}

#[tokio::test]
async fn driver_surfaces_partial_progress_at_the_safety_cap() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    for i in 0..10 {
        let url = format!("https://t.example.com/e{i}");
        seed_event(&store, &format!("Event {i}"), &format!("event-{i}"), &url).await;
    }
    let fetcher = Arc::new(CannedFetcher::new(HashMap::new()));

    let orchestrator = Arc::new(SyncOrchestrator::new(store, fetcher, 2));
    let driver = SyncDriver::new(orchestrator, 2, 3);
    let run = driver.run(false).await;

    let progress = match run {
        SyncRun::Capped(progress) => progress,
        other => panic!("expected the safety cap, got {other:?}"),
    };
    assert_eq!(progress.total, 10);
    assert_eq!(progress.processed, 6);
    assert_eq!(progress.failed, 6);
    Ok(())
}

#[tokio::test]
async fn driver_report_separates_not_found_from_failures() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    seed_event(&store, "Good Fair", "good-fair", "https://t.example.com/good").await;
    seed_event(&store, "Plain Page", "plain-page", "https://t.example.com/plain").await;
    seed_event(&store, "Gone Fair", "gone-fair", "https://t.example.com/gone").await;

    let mut pages = HashMap::new();
    pages.insert(
        "https://t.example.com/good".to_string(),
        ticket_page("Good Fair", "2025-09-01", 10.0),
    );
    pages.insert(
        "https://t.example.com/plain".to_string(),
        "<html><body>no structured data here</body></html>".to_string(),
    );
    let fetcher = Arc::new(CannedFetcher::new(pages));

    let orchestrator = Arc::new(SyncOrchestrator::new(store, fetcher, 2));
    let driver = SyncDriver::new(orchestrator, 10, 100);
    let run = driver.run(false).await;

    let progress = match run {
        SyncRun::Done(progress) => progress,
        other => panic!("expected a completed run, got {other:?}"),
    };
    assert_eq!(progress.not_found, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(
        progress.not_found_events,
        vec!["Plain Page".to_string()]
    );
    assert_eq!(progress.failed_events, vec!["Gone Fair".to_string()]);
    assert_eq!(progress.successful_events, vec!["Good Fair".to_string()]);
    Ok(())
}

#[tokio::test]
async fn only_missing_skips_already_snapshotted_events() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let mut pages = HashMap::new();
    for i in 0..3 {
        let url = format!("https://t.example.com/e{i}");
        seed_event(&store, &format!("Event {i}"), &format!("event-{i}"), &url).await;
        pages.insert(url, ticket_page(&format!("Event {i}"), "2025-06-01", 5.0));
    }
    let fetcher = Arc::new(CannedFetcher::new(pages));
    let orchestrator = Arc::new(SyncOrchestrator::new(store.clone(), fetcher.clone(), 1));

    let first = orchestrator
        .run_batch(SyncBatchParams {
            only_missing: true,
            limit: 2,
        })
        .await?;
    assert_eq!(first.stats.processed, 2);

    let second = orchestrator
        .run_batch(SyncBatchParams {
            only_missing: true,
            limit: 2,
        })
        .await?;
    assert_eq!(second.stats.processed, 1);

    let third = orchestrator
        .run_batch(SyncBatchParams {
            only_missing: true,
            limit: 2,
        })
        .await?;
    assert_eq!(third.stats.processed, 0);
    Ok(())
}

#[tokio::test]
async fn diff_flags_changed_fields_and_apply_copies_selected_ones() -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let mut event = Event::new("Harvest Festival", "harvest-festival");
    // Stored at noon UTC; the ticket page publishes the same calendar
    // date in a different timezone.
    event.start_date = Some(Utc.with_ymd_and_hms(2025, 9, 12, 12, 0, 0).unwrap());
    event.price_min = Some(10.0);
    event.ticket_url = Some("https://t.example.com/harvest".to_string());
    store.create_event(&mut event).await?;
    let event_id = event.id.unwrap();

    let mut pages = HashMap::new();
    pages.insert(
        "https://t.example.com/harvest".to_string(),
        ticket_page("Harvest Festival & Craft Fair", "2025-09-12T19:00:00+05:00", 12.0),
    );
    let orchestrator = SyncOrchestrator::new(store.clone(), Arc::new(CannedFetcher::new(pages)), 1);
    orchestrator
        .run_batch(SyncBatchParams {
            only_missing: false,
            limit: 10,
        })
        .await?;

    let diffs = orchestrator.diff_for_event(event_id).await?;
    let fields: Vec<SyncField> = diffs.iter().map(|d| d.field).collect();
    assert!(fields.contains(&SyncField::Name));
    assert!(fields.contains(&SyncField::PriceMin));
    // Same calendar date: timezone noise is not a difference.
    assert!(!fields.contains(&SyncField::StartDate));
    // Nothing published for these, so they are not flagged.
    assert!(!fields.contains(&SyncField::Description));
    assert!(!fields.contains(&SyncField::ImageUrl));

    let updated = orchestrator
        .apply_fields(event_id, &[SyncField::Name])
        .await?;
    assert_eq!(updated.name, "Harvest Festival & Craft Fair");
    // Unselected fields are untouched.
    assert_eq!(updated.price_min, Some(10.0));

    let stored = store.get_event(event_id).await?.unwrap();
    assert_eq!(stored.name, "Harvest Festival & Craft Fair");
    Ok(())
}
