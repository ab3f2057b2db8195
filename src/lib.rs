pub mod ai_extract;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetcher;
pub mod html;
pub mod import;
pub mod logging;
pub mod rate_limit;
pub mod schema_org;
pub mod server;
pub mod similarity;
pub mod sources;
pub mod storage;
pub mod sync;
pub mod types;
pub mod venue_match;
