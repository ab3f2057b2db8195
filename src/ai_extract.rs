//! Best-effort structured extraction via an external AI service.
//!
//! The service is advisory only: any transport, status or parse problem
//! degrades to an explicit fallback variant the caller can render as
//! "could not extract, fill in manually". Nothing here ever errors the
//! request that invoked it.

use crate::html::PageMetadata;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub venue_name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub ticket_url: Option<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
}

/// Either a usable guess with per-field confidence, or a degraded
/// outcome that still carries success semantics to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Extraction {
    Parsed {
        fields: ExtractedFields,
        confidence: HashMap<String, f64>,
    },
    Degraded {
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    success: bool,
    #[serde(default)]
    fields: Option<ExtractedFields>,
    #[serde(default)]
    confidence: Option<HashMap<String, f64>>,
    #[serde(default)]
    error: Option<String>,
}

pub struct AiExtractor {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl AiExtractor {
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    /// Asks the extraction service for a best-effort guess at event
    /// fields from cleaned page text.
    pub async fn extract(&self, text: &str, metadata: &PageMetadata) -> Extraction {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Extraction::Degraded {
                reason: "no extraction service configured".to_string(),
            };
        };

        let payload = json!({
            "text": text,
            "title": metadata.title,
            "imageUrl": metadata.og_image,
        });

        let response = match self.client.post(endpoint).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("AI extraction request failed: {e}");
                return Extraction::Degraded {
                    reason: format!("extraction service unreachable: {e}"),
                };
            }
        };

        // The service reports internal failures as HTTP 200 with
        // success=false so callers never hard-fail.
        let parsed: ServiceResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("AI extraction returned malformed body: {e}");
                return Extraction::Degraded {
                    reason: format!("malformed extraction response: {e}"),
                };
            }
        };

        if !parsed.success {
            return Extraction::Degraded {
                reason: parsed
                    .error
                    .unwrap_or_else(|| "extraction service reported failure".to_string()),
            };
        }
        match parsed.fields {
            Some(fields) => Extraction::Parsed {
                fields,
                confidence: parsed.confidence.unwrap_or_default(),
            },
            None => Extraction::Degraded {
                reason: "extraction service returned no fields".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_endpoint_degrades_instead_of_erroring() {
        let extractor = AiExtractor::new(None);
        let outcome = extractor.extract("some page text", &PageMetadata::default()).await;
        assert!(matches!(outcome, Extraction::Degraded { .. }));
    }
}
