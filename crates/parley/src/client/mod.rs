//! HTTP client for a running Parley server.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use reqwest::Url;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Health check response from the server.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `GET /stats` response. Unknown fields are ignored so older CLIs keep
/// working against newer servers.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Stats {
    pub uptime_secs: u64,
    pub connections: ConnectionStats,
    pub sessions: usize,
    pub barge_in: BargeInStats,
    pub pools: Vec<PoolStats>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionStats {
    pub connections: usize,
    pub max_connections: usize,
    pub limit_enabled: bool,
    pub rejected_count: u64,
    pub dropped_messages: u64,
    pub by_session: BTreeMap<String, usize>,
    pub by_topic: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInStats {
    pub handled: u64,
    pub suppressed: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolStats {
    pub name: String,
    pub warm_available: usize,
    pub warm_capacity: usize,
    pub dedicated_active: usize,
    pub dedicated_capacity: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for the Parley HTTP API.
pub struct Client {
    base_url: Url,
    http: reqwest::Client,
}

impl Client {
    /// Create a client for the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { base_url, http })
    }

    /// Check server health.
    pub async fn health(&self) -> Result<HealthResponse> {
        self.get_json("/health").await
    }

    /// Fetch live statistics.
    pub async fn stats(&self) -> Result<Stats> {
        self.get_json("/stats").await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path)?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            anyhow::bail!("Server returned error: {}", response.status());
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_url() {
        assert!(Client::new("not a url").is_err());
        assert!(Client::new("http://127.0.0.1:8090").is_ok());
    }

    #[test]
    fn test_stats_tolerate_missing_and_extra_fields() {
        let stats: Stats = serde_json::from_str(
            r#"{
                "uptime_secs": 12,
                "connections": {"connections": 2, "by_call": {"c1": 2}},
                "pools": [{"name": "tts", "warm_available": 1, "metrics": {}}],
                "future_field": true
            }"#,
        )
        .unwrap();

        assert_eq!(stats.uptime_secs, 12);
        assert_eq!(stats.connections.connections, 2);
        assert_eq!(stats.sessions, 0);
        assert_eq!(stats.pools[0].name, "tts");
        assert_eq!(stats.pools[0].warm_available, 1);
    }
}
