use crate::error::{IngestError, Result};
use crate::schema_org::{SchemaOrgData, SchemaOrgStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// A catalog event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub venue_id: Option<Uuid>,
    pub promoter_id: Option<Uuid>,
    pub source_name: Option<String>,
    pub source_url: Option<String>,
    pub ticket_url: Option<String>,
    pub image_url: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub categories: Vec<String>,
    pub commercial_vendors_allowed: Option<bool>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            name: name.into(),
            slug: slug.into(),
            description: None,
            start_date: None,
            end_date: None,
            venue_id: None,
            promoter_id: None,
            source_name: None,
            source_url: None,
            ticket_url: None,
            image_url: None,
            price_min: None,
            price_max: None,
            categories: Vec::new(),
            commercial_vendors_allowed: None,
            status: "published".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A catalog venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub id: Option<Uuid>,
    pub name: String,
    pub slug: String,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    /// Origin that scraped this venue into existence, if any.
    pub source_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A catalog promoter (event organizer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promoter {
    pub id: Option<Uuid>,
    pub name: String,
    pub website: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Side-table snapshot of the schema.org data published on an event's
/// ticket page. One per event; updated in place on every fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaOrgRecord {
    pub id: Option<Uuid>,
    pub event_id: Uuid,
    pub raw_json_ld: Option<Value>,
    pub data: Option<SchemaOrgData>,
    pub status: SchemaOrgStatus,
    pub last_fetched_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Incremented on every fetch attempt, success or failure.
    pub fetch_count: u32,
    pub created_at: DateTime<Utc>,
}

/// Record store boundary. The relational catalog behind it is an
/// external collaborator; this core only needs these operations.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Event operations
    async fn create_event(&self, event: &mut Event) -> Result<()>;
    async fn update_event(&self, event: &Event) -> Result<()>;
    async fn get_event(&self, id: Uuid) -> Result<Option<Event>>;
    async fn find_event_by_source_url(&self, url: &str) -> Result<Option<Event>>;
    async fn find_event_by_slug(&self, slug: &str) -> Result<Option<Event>>;
    /// Events whose start date falls within the inclusive window.
    async fn find_events_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>>;
    /// Events eligible for schema.org sync (known ticket URL), least
    /// recently fetched first. `only_missing` keeps just the events
    /// with no snapshot yet.
    async fn list_sync_candidates(&self, only_missing: bool, limit: usize) -> Result<Vec<Event>>;

    // Venue operations
    async fn create_venue(&self, venue: &mut Venue) -> Result<()>;
    async fn get_venue(&self, id: Uuid) -> Result<Option<Venue>>;
    async fn find_venue_by_slug(&self, slug: &str) -> Result<Option<Venue>>;
    /// Venue previously created from the same origin with this name.
    async fn find_venue_from_source(&self, source_name: &str, name: &str)
        -> Result<Option<Venue>>;
    /// Bounded candidate pool for fuzzy matching: state equality when a
    /// state is given, otherwise substring match on the name token.
    async fn list_venue_candidates(
        &self,
        state: Option<&str>,
        name_token: &str,
        cap: usize,
    ) -> Result<Vec<Venue>>;

    // Promoter operations
    async fn create_promoter(&self, promoter: &mut Promoter) -> Result<()>;
    async fn get_promoter(&self, id: Uuid) -> Result<Option<Promoter>>;

    // Schema.org snapshot operations
    async fn get_schema_org_by_event(&self, event_id: Uuid) -> Result<Option<SchemaOrgRecord>>;
    async fn upsert_schema_org(&self, record: &mut SchemaOrgRecord) -> Result<()>;
    async fn list_schema_org(&self) -> Result<Vec<SchemaOrgRecord>>;
}

/// In-memory store for development and testing.
#[derive(Default)]
pub struct InMemoryStore {
    events: Arc<Mutex<HashMap<Uuid, Event>>>,
    venues: Arc<Mutex<HashMap<Uuid, Venue>>>,
    promoters: Arc<Mutex<HashMap<Uuid, Promoter>>>,
    schema_org: Arc<Mutex<HashMap<Uuid, SchemaOrgRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create_event(&self, event: &mut Event) -> Result<()> {
        let mut events = self.events.lock().unwrap();
        // Unique-slug backstop; callers are expected to probe first.
        if events.values().any(|e| e.slug == event.slug) {
            return Err(IngestError::store(format!(
                "slug already taken: {}",
                event.slug
            )));
        }
        let id = Uuid::new_v4();
        event.id = Some(id);
        events.insert(id, event.clone());
        debug!("Created event '{}' with id {}", event.name, id);
        Ok(())
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let id = event
            .id
            .ok_or_else(|| IngestError::store("cannot update event without id"))?;
        let mut events = self.events.lock().unwrap();
        if !events.contains_key(&id) {
            return Err(IngestError::store(format!("no event with id {id}")));
        }
        let mut updated = event.clone();
        updated.updated_at = Utc::now();
        events.insert(id, updated);
        debug!("Updated event '{}' with id {}", event.name, id);
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<Event>> {
        Ok(self.events.lock().unwrap().get(&id).cloned())
    }

    async fn find_event_by_source_url(&self, url: &str) -> Result<Option<Event>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .values()
            .find(|e| e.source_url.as_deref() == Some(url))
            .cloned())
    }

    async fn find_event_by_slug(&self, slug: &str) -> Result<Option<Event>> {
        let events = self.events.lock().unwrap();
        Ok(events.values().find(|e| e.slug == slug).cloned())
    }

    async fn find_events_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        let events = self.events.lock().unwrap();
        Ok(events
            .values()
            .filter(|e| {
                e.start_date
                    .map(|d| d >= from && d <= to)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn list_sync_candidates(&self, only_missing: bool, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.lock().unwrap();
        let schema_org = self.schema_org.lock().unwrap();
        let fetched_at: HashMap<Uuid, DateTime<Utc>> = schema_org
            .values()
            .map(|r| (r.event_id, r.last_fetched_at))
            .collect();

        let mut eligible: Vec<&Event> = events
            .values()
            .filter(|e| e.ticket_url.is_some())
            .filter(|e| {
                let id = match e.id {
                    Some(id) => id,
                    None => return false,
                };
                !only_missing || !fetched_at.contains_key(&id)
            })
            .collect();
        // Never-fetched events first, then least recently fetched.
        eligible.sort_by_key(|e| e.id.and_then(|id| fetched_at.get(&id).copied()));
        Ok(eligible.into_iter().take(limit).cloned().collect())
    }

    async fn create_venue(&self, venue: &mut Venue) -> Result<()> {
        let mut venues = self.venues.lock().unwrap();
        if venues.values().any(|v| v.slug == venue.slug) {
            return Err(IngestError::store(format!(
                "venue slug already taken: {}",
                venue.slug
            )));
        }
        let id = Uuid::new_v4();
        venue.id = Some(id);
        venues.insert(id, venue.clone());
        debug!("Created venue '{}' with id {}", venue.name, id);
        Ok(())
    }

    async fn get_venue(&self, id: Uuid) -> Result<Option<Venue>> {
        Ok(self.venues.lock().unwrap().get(&id).cloned())
    }

    async fn find_venue_by_slug(&self, slug: &str) -> Result<Option<Venue>> {
        let venues = self.venues.lock().unwrap();
        Ok(venues.values().find(|v| v.slug == slug).cloned())
    }

    async fn find_venue_from_source(
        &self,
        source_name: &str,
        name: &str,
    ) -> Result<Option<Venue>> {
        let venues = self.venues.lock().unwrap();
        Ok(venues
            .values()
            .find(|v| {
                v.source_name.as_deref() == Some(source_name)
                    && v.name.eq_ignore_ascii_case(name)
            })
            .cloned())
    }

    async fn list_venue_candidates(
        &self,
        state: Option<&str>,
        name_token: &str,
        cap: usize,
    ) -> Result<Vec<Venue>> {
        let venues = self.venues.lock().unwrap();
        let token = name_token.to_lowercase();
        Ok(venues
            .values()
            .filter(|v| match state {
                Some(state) => v
                    .state
                    .as_deref()
                    .map(|s| s.eq_ignore_ascii_case(state))
                    .unwrap_or(false),
                None => v.name.to_lowercase().contains(&token),
            })
            .take(cap)
            .cloned()
            .collect())
    }

    async fn create_promoter(&self, promoter: &mut Promoter) -> Result<()> {
        let id = Uuid::new_v4();
        promoter.id = Some(id);
        self.promoters.lock().unwrap().insert(id, promoter.clone());
        debug!("Created promoter '{}' with id {}", promoter.name, id);
        Ok(())
    }

    async fn get_promoter(&self, id: Uuid) -> Result<Option<Promoter>> {
        Ok(self.promoters.lock().unwrap().get(&id).cloned())
    }

    async fn get_schema_org_by_event(&self, event_id: Uuid) -> Result<Option<SchemaOrgRecord>> {
        let records = self.schema_org.lock().unwrap();
        Ok(records.values().find(|r| r.event_id == event_id).cloned())
    }

    async fn upsert_schema_org(&self, record: &mut SchemaOrgRecord) -> Result<()> {
        let mut records = self.schema_org.lock().unwrap();
        let existing_id = records
            .values()
            .find(|r| r.event_id == record.event_id)
            .and_then(|r| r.id);
        let id = existing_id.unwrap_or_else(Uuid::new_v4);
        record.id = Some(id);
        records.insert(id, record.clone());
        Ok(())
    }

    async fn list_schema_org(&self) -> Result<Vec<SchemaOrgRecord>> {
        Ok(self.schema_org.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_with_slug(name: &str, slug: &str) -> Event {
        Event::new(name, slug)
    }

    #[tokio::test]
    async fn slug_backstop_rejects_collisions() {
        let store = InMemoryStore::new();
        let mut first = event_with_slug("Fall Festival", "fall-festival");
        store.create_event(&mut first).await.unwrap();

        let mut second = event_with_slug("Fall Festival", "fall-festival");
        let err = store.create_event(&mut second).await.unwrap_err();
        assert!(err.to_string().contains("slug already taken"));
    }

    #[tokio::test]
    async fn venue_candidates_filter_by_state_or_name_token() {
        let store = InMemoryStore::new();
        for (name, state) in [
            ("County Fairgrounds", "IL"),
            ("Riverside Park", "IL"),
            ("County Expo Center", "WI"),
        ] {
            let mut venue = Venue {
                id: None,
                name: name.to_string(),
                slug: crate::import::generate_slug(name),
                street_address: None,
                city: None,
                state: Some(state.to_string()),
                zip: None,
                source_name: None,
                created_at: Utc::now(),
            };
            store.create_venue(&mut venue).await.unwrap();
        }

        let by_state = store
            .list_venue_candidates(Some("il"), "county", 50)
            .await
            .unwrap();
        assert_eq!(by_state.len(), 2);

        let by_token = store.list_venue_candidates(None, "county", 50).await.unwrap();
        assert_eq!(by_token.len(), 2);
    }

    #[tokio::test]
    async fn sync_candidates_prefer_never_fetched_events() {
        let store = InMemoryStore::new();
        let mut stale = event_with_slug("Stale", "stale");
        stale.ticket_url = Some("https://t.example.com/stale".into());
        store.create_event(&mut stale).await.unwrap();

        let mut fresh = event_with_slug("Fresh", "fresh");
        fresh.ticket_url = Some("https://t.example.com/fresh".into());
        store.create_event(&mut fresh).await.unwrap();

        let mut no_ticket = event_with_slug("No Ticket", "no-ticket");
        store.create_event(&mut no_ticket).await.unwrap();

        let mut record = SchemaOrgRecord {
            id: None,
            event_id: stale.id.unwrap(),
            raw_json_ld: None,
            data: None,
            status: crate::schema_org::SchemaOrgStatus::Error,
            last_fetched_at: Utc::now(),
            last_error: Some("boom".into()),
            fetch_count: 1,
            created_at: Utc::now(),
        };
        store.upsert_schema_org(&mut record).await.unwrap();

        let all = store.list_sync_candidates(false, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].slug, "fresh");

        let missing = store.list_sync_candidates(true, 10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].slug, "fresh");
    }
}
