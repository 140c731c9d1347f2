//! Client for the external outbreak-anomaly service.
//!
//! The service is read-only and unauthenticated: `GET {base}/alerts` returns a
//! JSON array of alerts. Detection times may come without a UTC offset, in
//! which case they are taken as UTC.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::OutbreakFeedError;
use crate::models::OutbreakAlert;

#[async_trait]
pub trait OutbreakFeed: Send + Sync {
    async fn fetch_alerts(&self) -> Result<Vec<OutbreakAlert>, OutbreakFeedError>;
}

pub struct HttpOutbreakFeed {
    client: reqwest::Client,
    alerts_url: String,
}

impl HttpOutbreakFeed {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OutbreakFeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            alerts_url: alerts_url(base_url),
        })
    }
}

pub fn alerts_url(base_url: &str) -> String {
    format!("{}/alerts", base_url.trim_end_matches('/'))
}

#[async_trait]
impl OutbreakFeed for HttpOutbreakFeed {
    async fn fetch_alerts(&self) -> Result<Vec<OutbreakAlert>, OutbreakFeedError> {
        let response = self.client.get(&self.alerts_url).send().await?;

        if !response.status().is_success() {
            return Err(OutbreakFeedError::Status(response.status().as_u16()));
        }

        Ok(response.json().await?)
    }
}

pub fn deserialize_detection_time<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_detection_time(&raw).map_err(serde::de::Error::custom)
}

fn parse_detection_time(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid detection_time {raw:?}: {e}"))
}
