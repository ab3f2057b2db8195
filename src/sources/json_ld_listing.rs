//! Generic adapter for origin sites that publish schema.org Event
//! JSON-LD on their detail pages: listing page -> event links ->
//! per-page structured data.

use crate::config::SourceConfig;
use crate::error::{IngestError, Result};
use crate::fetcher::Fetcher;
use crate::html::{extract_links, extract_metadata};
use crate::schema_org::{parse_json_ld, SchemaOrgData, SchemaOrgStatus};
use crate::types::{CandidateEvent, ListingParams, ScrapeSource, VenueDescriptor};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_LISTING_LIMIT: usize = 25;

pub struct JsonLdListingSource {
    config: SourceConfig,
    fetcher: Arc<dyn Fetcher>,
}

impl JsonLdListingSource {
    pub fn new(config: SourceConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { config, fetcher }
    }

    fn listing_url(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.listing_path
        )
    }

    /// Opaque per-event key: the last meaningful path segment of the
    /// detail URL.
    fn source_key(url: &str) -> String {
        Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(String::from))
            })
            .unwrap_or_else(|| url.to_string())
    }

    fn candidate_from_data(&self, url: &str, data: SchemaOrgData, title: Option<String>) -> CandidateEvent {
        let venue = data.venue_name.as_ref().map(|name| VenueDescriptor {
            name: name.clone(),
            street_address: data.venue_address.clone(),
            city: data.venue_city.clone(),
            state: data.venue_state.clone(),
            zip: None,
        });
        CandidateEvent {
            source_id: Self::source_key(url),
            source_name: self.config.id.clone(),
            source_url: url.to_string(),
            name: data.name.or(title).unwrap_or_default(),
            description: data.description,
            start_date: data.start_date,
            end_date: data.end_date,
            venue,
            image_url: data.image_url,
            ticket_url: data.ticket_url.or_else(|| Some(url.to_string())),
            price_min: data.price_min,
            price_max: data.price_max,
            commercial_vendors_allowed: None,
            vendor_types: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl ScrapeSource for JsonLdListingSource {
    fn source_id(&self) -> &str {
        &self.config.id
    }

    fn source_name(&self) -> &str {
        &self.config.name
    }

    async fn list_candidates(&self, params: &ListingParams) -> Result<Vec<CandidateEvent>> {
        let listing_url = self.listing_url();
        let page = self.fetcher.fetch(&listing_url).await?;

        let base_host = Url::parse(&self.config.base_url)
            .ok()
            .and_then(|u| u.host_str().map(String::from));
        let mut links: Vec<String> = extract_links(&page.body, &listing_url)
            .into_iter()
            .filter(|link| link.contains(&self.config.link_pattern))
            .filter(|link| {
                // Stay on the origin site
                match (&base_host, Url::parse(link)) {
                    (Some(host), Ok(parsed)) => parsed.host_str() == Some(host.as_str()),
                    _ => false,
                }
            })
            .collect();
        links.sort();
        links.dedup();

        let limit = params.limit.unwrap_or(DEFAULT_LISTING_LIMIT);
        let mut candidates = Vec::new();
        for link in links.into_iter().take(limit) {
            match self.fetch_detail(&link).await {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => {
                    // One bad detail page never sinks the listing scrape.
                    warn!("Skipping {link}: {e}");
                }
            }
        }
        info!(
            "Listed {} candidates from {}",
            candidates.len(),
            self.config.id
        );
        Ok(candidates)
    }

    async fn fetch_detail(&self, url: &str) -> Result<CandidateEvent> {
        let page = self.fetcher.fetch(url).await?;
        let metadata = extract_metadata(&page.body);

        if let Some(raw) = metadata.json_ld.as_ref() {
            let parsed = parse_json_ld(raw);
            if parsed.status == SchemaOrgStatus::Available {
                if let Some(data) = parsed.data {
                    debug!("Parsed JSON-LD event from {url}");
                    return Ok(self.candidate_from_data(url, data, metadata.title));
                }
            }
        }

        // No usable structured data; a bare title still makes a
        // reviewable candidate.
        match metadata.title {
            Some(title) if !title.is_empty() => {
                Ok(self.candidate_from_data(url, SchemaOrgData::default(), Some(title)))
            }
            _ => Err(IngestError::Source {
                message: format!("no event data found at {url}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::FetchedPage;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct CannedFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage> {
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

    fn source_config() -> SourceConfig {
        SourceConfig {
            id: "midwest_fairs".to_string(),
            name: "Midwest Fairs".to_string(),
            base_url: "https://fairs.example.com".to_string(),
            listing_path: "/events".to_string(),
            link_pattern: "/event/".to_string(),
        }
    }

    fn detail_page(name: &str, date: &str) -> String {
        format!(
            r#"<html><head><title>{name} | Midwest Fairs</title>
            <script type="application/ld+json">
            {{"@type": "Event", "name": "{name}", "startDate": "{date}",
              "location": {{"@type": "Place", "name": "County Fairgrounds",
                "address": {{"addressLocality": "Springfield", "addressRegion": "IL"}}}}}}
            </script></head><body>{name}</body></html>"#
        )
    }

    #[tokio::test]
    async fn listing_scrape_follows_event_links_and_skips_failures() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://fairs.example.com/events".to_string(),
            r#"<a href="/event/spring-carnival">Spring</a>
               <a href="/event/harvest-festival">Harvest</a>
               <a href="/event/broken-page">Broken</a>
               <a href="/about">About</a>
               <a href="https://elsewhere.example.net/event/offsite">Offsite</a>"#
                .to_string(),
        );
        pages.insert(
            "https://fairs.example.com/event/spring-carnival".to_string(),
            detail_page("Spring Carnival", "2025-04-12"),
        );
        pages.insert(
            "https://fairs.example.com/event/harvest-festival".to_string(),
            detail_page("Harvest Festival", "2025-09-20"),
        );

        let source = JsonLdListingSource::new(
            source_config(),
            Arc::new(CannedFetcher { pages }),
        );
        let mut candidates = source
            .list_candidates(&ListingParams { limit: Some(10) })
            .await
            .unwrap();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "Harvest Festival");
        assert_eq!(candidates[0].source_id, "harvest-festival");
        assert_eq!(candidates[0].source_name, "midwest_fairs");
        let venue = candidates[0].venue.as_ref().unwrap();
        assert_eq!(venue.name, "County Fairgrounds");
        assert_eq!(venue.state.as_deref(), Some("IL"));
    }

    #[tokio::test]
    async fn detail_without_json_ld_falls_back_to_title() {
        let mut pages = HashMap::new();
        pages.insert(
            "https://fairs.example.com/event/mystery".to_string(),
            "<html><head><title>Mystery Market</title></head></html>".to_string(),
        );
        let source = JsonLdListingSource::new(
            source_config(),
            Arc::new(CannedFetcher { pages }),
        );
        let candidate = source
            .fetch_detail("https://fairs.example.com/event/mystery")
            .await
            .unwrap();
        assert_eq!(candidate.name, "Mystery Market");
        assert!(candidate.start_date.is_none());
    }
}
