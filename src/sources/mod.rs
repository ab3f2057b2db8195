//! Origin-site adapters. Each origin implements [`ScrapeSource`] and is
//! dispatched by its tagged source id from the configured registry.

pub mod json_ld_listing;

use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::types::ScrapeSource;
use json_ld_listing::JsonLdListingSource;
use std::sync::Arc;

/// Builds the adapter registered under `source_id`, if any.
pub fn create_source(
    config: &Config,
    source_id: &str,
    fetcher: Arc<dyn Fetcher>,
) -> Option<Box<dyn ScrapeSource>> {
    let source_config = config.sources.iter().find(|s| s.id == source_id)?;
    Some(Box::new(JsonLdListingSource::new(
        source_config.clone(),
        fetcher,
    )))
}

/// Source ids available in this deployment's configuration.
pub fn configured_source_ids(config: &Config) -> Vec<String> {
    config.sources.iter().map(|s| s.id.clone()).collect()
}
