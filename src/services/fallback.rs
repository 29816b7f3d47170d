// Third-party verification fallback client. Consulted only when the SMTP
// path is inconclusive (temp_fail / unknown) and a provider is configured.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::app_config::AppConfig;
use crate::models::FallbackStatus;

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("Fallback provider not configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    BadResponse(String),
}

#[derive(Debug, Clone)]
pub struct FallbackResult {
    pub status: FallbackStatus,
    pub raw_status: String,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    // Providers disagree on the field name; accept the common ones.
    #[serde(alias = "result", alias = "state", alias = "verdict")]
    status: Option<String>,
}

/// Map a provider's status vocabulary onto the canonical three values.
fn map_provider_status(raw: &str) -> FallbackStatus {
    match raw.trim().to_lowercase().as_str() {
        "deliverable" | "valid" | "ok" | "safe" => FallbackStatus::Deliverable,
        "undeliverable" | "invalid" | "rejected" | "disposable" => FallbackStatus::Undeliverable,
        _ => FallbackStatus::Unknown,
    }
}

pub struct FallbackVerifier {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl FallbackVerifier {
    /// Build from config; returns None when no provider URL is set.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let url = config.third_party_verify_url.clone()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .ok()?;
        Some(Self {
            http,
            url,
            api_key: config.third_party_verify_api_key.clone(),
        })
    }

    #[instrument(skip(self))]
    pub async fn verify(&self, email: &str) -> Result<FallbackResult, FallbackError> {
        let mut request = self.http.get(&self.url).query(&[("email", email)]);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            warn!("fallback provider returned {}", response.status());
            return Err(FallbackError::BadResponse(format!(
                "status {}",
                response.status()
            )));
        }

        let body: ProviderResponse = response.json().await?;
        let raw = body
            .status
            .ok_or_else(|| FallbackError::BadResponse("missing status field".to_string()))?;

        Ok(FallbackResult {
            status: map_provider_status(&raw),
            raw_status: raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(map_provider_status("deliverable"), FallbackStatus::Deliverable);
        assert_eq!(map_provider_status("Valid"), FallbackStatus::Deliverable);
        assert_eq!(map_provider_status("undeliverable"), FallbackStatus::Undeliverable);
        assert_eq!(map_provider_status("INVALID"), FallbackStatus::Undeliverable);
        assert_eq!(map_provider_status("risky"), FallbackStatus::Unknown);
        assert_eq!(map_provider_status(""), FallbackStatus::Unknown);
    }
}
