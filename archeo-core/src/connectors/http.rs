//! Shared HTTP plumbing for connectors
//!
//! Maps transport problems and HTTP statuses onto the instrument failure
//! taxonomy so every connector reports them the same way.

use super::RegistryError;
use crate::types::{FailureKind, InstrumentFailure};
use reqwest::{Client, StatusCode};
use std::time::Duration;

const USER_AGENT: &str = concat!("archeo/", env!("CARGO_PKG_VERSION"));

/// Connection timeout for every connector
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client-side ceiling; the orchestrator's per-instrument budget is normally tighter
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Build the HTTP client a connector uses
pub fn build_client(instrument: &str) -> Result<Client, RegistryError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RegistryError::Http {
            instrument: instrument.to_string(),
            reason: e.to_string(),
        })
}

/// Failure for a non-success HTTP status, `None` for success
pub fn check_status(instrument: &str, status: StatusCode) -> Option<InstrumentFailure> {
    if status.is_success() && status != StatusCode::NO_CONTENT {
        return None;
    }

    let kind = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FailureKind::AuthError,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            FailureKind::RateLimited
        }
        StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => FailureKind::NoData,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FailureKind::Timeout,
        _ => FailureKind::Degraded,
    };

    Some(InstrumentFailure::new(
        instrument,
        kind,
        format!("HTTP {}", status),
    ))
}

/// Failure for a transport-level error
pub fn transport_failure(instrument: &str, err: &reqwest::Error) -> InstrumentFailure {
    let kind = if err.is_timeout() {
        FailureKind::Timeout
    } else if let Some(status) = err.status() {
        return check_status(instrument, status).unwrap_or_else(|| {
            InstrumentFailure::new(instrument, FailureKind::Degraded, err.to_string())
        });
    } else {
        FailureKind::Degraded
    };
    InstrumentFailure::new(instrument, kind, err.to_string())
}

/// Failure for an unparseable payload
pub fn parse_failure(instrument: &str, err: impl std::fmt::Display) -> InstrumentFailure {
    InstrumentFailure::new(
        instrument,
        FailureKind::Degraded,
        format!("Failed to parse response: {}", err),
    )
}

/// Failure for an empty result
pub fn no_data(instrument: &str, reason: impl Into<String>) -> InstrumentFailure {
    InstrumentFailure::new(instrument, FailureKind::NoData, reason)
}

/// Send a request and read the JSON body, mapping every failure
pub async fn fetch_json<T>(
    instrument: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, InstrumentFailure>
where
    T: serde::de::DeserializeOwned,
{
    let response = request
        .send()
        .await
        .map_err(|e| transport_failure(instrument, &e))?;

    if let Some(failure) = check_status(instrument, response.status()) {
        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        return Err(InstrumentFailure {
            reason: if detail.is_empty() {
                failure.reason
            } else {
                format!("{}: {}", failure.reason, detail)
            },
            ..failure
        });
    }

    let body = response
        .text()
        .await
        .map_err(|e| transport_failure(instrument, &e))?;

    if body.trim().is_empty() {
        return Err(no_data(instrument, "Empty response body"));
    }

    serde_json::from_str(&body).map_err(|e| parse_failure(instrument, e))
}
