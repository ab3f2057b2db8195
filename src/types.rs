use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scraped venue descriptor attached to a candidate event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueDescriptor {
    pub name: String,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

/// A scraped, not-yet-persisted event awaiting operator review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEvent {
    /// Opaque key from the origin site.
    pub source_id: String,
    pub source_name: String,
    pub source_url: String,
    pub name: String,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub venue: Option<VenueDescriptor>,
    pub image_url: Option<String>,
    pub ticket_url: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub commercial_vendors_allowed: Option<bool>,
    #[serde(default)]
    pub vendor_types: Vec<String>,
}

impl CandidateEvent {
    /// Fills fields this candidate is missing from a richer detail-page
    /// scrape of the same event.
    pub fn merge_detail(&mut self, detail: CandidateEvent) {
        if self.description.is_none() {
            self.description = detail.description;
        }
        if self.start_date.is_none() {
            self.start_date = detail.start_date;
        }
        if self.end_date.is_none() {
            self.end_date = detail.end_date;
        }
        if self.venue.is_none() {
            self.venue = detail.venue;
        }
        if self.image_url.is_none() {
            self.image_url = detail.image_url;
        }
        if self.ticket_url.is_none() {
            self.ticket_url = detail.ticket_url;
        }
        if self.price_min.is_none() {
            self.price_min = detail.price_min;
        }
        if self.price_max.is_none() {
            self.price_max = detail.price_max;
        }
        if self.vendor_types.is_empty() {
            self.vendor_types = detail.vendor_types;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactUrl,
    SimilarNameDate,
    None,
}

/// Summary of the existing event a candidate was matched against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedEvent {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub start_date: Option<DateTime<Utc>>,
    pub status: String,
}

/// The duplicate detector's classification of one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateVerdict {
    pub is_duplicate: bool,
    pub match_type: MatchType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_event: Option<MatchedEvent>,
}

impl DuplicateVerdict {
    pub fn none() -> Self {
        Self {
            is_duplicate: false,
            match_type: MatchType::None,
            similarity: None,
            matched_event: None,
        }
    }
}

/// One scored venue candidate; confidence is the 0-100 rounded score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueMatch {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub address: Option<String>,
    pub confidence: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VenueMatchResult {
    pub match_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_match: Option<VenueMatch>,
    pub alternatives: Vec<VenueMatch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

/// Aggregate result of one import invocation. "Zero of N succeeded" is
/// a valid outcome the operator must see, not an exception.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub imported: u32,
    pub updated: u32,
    pub skipped: u32,
    pub venues_created: u32,
    pub created_events: Vec<EventSummary>,
    pub updated_events: Vec<EventSummary>,
    pub errors: Vec<String>,
}

/// In-memory aggregate across a multi-batch sync run; discarded when
/// the run completes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub not_found: usize,
    pub successful_events: Vec<String>,
    /// Events whose ticket page had no schema.org data; distinct from
    /// genuine failures.
    pub not_found_events: Vec<String>,
    pub failed_events: Vec<String>,
    /// Terminal error that stopped the run early, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Listing parameters passed to a scrape source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingParams {
    /// Upper bound on candidates returned from one listing scrape.
    pub limit: Option<usize>,
}

/// Capability every origin-site adapter implements. Dispatch happens on
/// the tagged source id, not per-site branching in the orchestrators.
#[async_trait::async_trait]
pub trait ScrapeSource: Send + Sync {
    /// Tagged identifier for this origin site.
    fn source_id(&self) -> &str;

    /// Human-readable origin name stamped onto candidates.
    fn source_name(&self) -> &str;

    /// Scrape the origin's listing surface into candidate events.
    async fn list_candidates(&self, params: &ListingParams) -> Result<Vec<CandidateEvent>>;

    /// Scrape one event detail page.
    async fn fetch_detail(&self, url: &str) -> Result<CandidateEvent>;
}
