// src/query/probe.rs
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::time::Duration;
use tokio::time::timeout;

use crate::models::server::{Endpoint, ProbeOutcome, Rules, ServerStatus};
use crate::utils::BrowserError;

/// The query protocol used to talk to individual game servers. Every call is
/// idempotent and must give up within `timeout`.
#[async_trait]
pub trait ProbeClient: Send + Sync {
    async fn probe_status(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<ServerStatus, BrowserError>;

    async fn probe_rules(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Rules, BrowserError>;

    async fn probe_players(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Vec<String>, BrowserError>;
}

// The client is trusted to honour the timeout, but a slow one must not stall
// a worker past it either.

pub async fn status_within(
    probe: &dyn ProbeClient,
    endpoint: &Endpoint,
    limit: Duration,
) -> Result<ServerStatus, BrowserError> {
    timeout(limit, probe.probe_status(endpoint, limit))
        .await
        .map_err(|_| BrowserError::ProbeTimeout)?
}

pub async fn rules_within(
    probe: &dyn ProbeClient,
    endpoint: &Endpoint,
    limit: Duration,
) -> Result<Rules, BrowserError> {
    timeout(limit, probe.probe_rules(endpoint, limit))
        .await
        .map_err(|_| BrowserError::ProbeTimeout)?
}

pub async fn players_within(
    probe: &dyn ProbeClient,
    endpoint: &Endpoint,
    limit: Duration,
) -> Result<Vec<String>, BrowserError> {
    timeout(limit, probe.probe_players(endpoint, limit))
        .await
        .map_err(|_| BrowserError::ProbeTimeout)?
}

/// Status, then rules on a best-effort basis. Only a failed status probe fails
/// the whole query.
pub async fn query_server(
    probe: &dyn ProbeClient,
    endpoint: &Endpoint,
    limit: Duration,
) -> Result<ProbeOutcome, BrowserError> {
    let status = status_within(probe, endpoint, limit).await?;
    let probed_at = Utc::now();

    let rules = match rules_within(probe, endpoint, limit).await {
        Ok(rules) => Some(rules),
        Err(e) => {
            debug!("Rules query for {} failed: {}", endpoint, e);
            None
        }
    };

    Ok(ProbeOutcome { status, rules, probed_at })
}


#[cfg(test)]
mod tests {
    use super::testing::{Call, ScriptedProbe};
    use super::*;

    #[tokio::test]
    async fn test_query_server_tolerates_missing_rules() {
        let probe = ScriptedProbe::new();
        let endpoint = Endpoint::new("10.0.0.1", 7777);
        probe.answer(&endpoint, "Alpha", 30);

        let outcome = query_server(&probe, &endpoint, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome.status.name, "Alpha");
        assert!(outcome.rules.is_none());
        assert_eq!(probe.calls(&endpoint, Call::Rules), 1);
    }

    #[tokio::test]
    async fn test_query_server_skips_rules_when_status_fails() {
        let probe = ScriptedProbe::new();
        let endpoint = Endpoint::new("10.0.0.1", 7777);
        probe.fail(&endpoint);

        assert!(query_server(&probe, &endpoint, Duration::from_secs(1)).await.is_err());
        assert_eq!(probe.calls(&endpoint, Call::Rules), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let probe = ScriptedProbe::new();
        let endpoint = Endpoint::new("10.0.0.1", 7777);
        probe.hang(&endpoint);

        let result = status_within(&probe, &endpoint, Duration::from_millis(1500)).await;
        assert_eq!(result, Err(BrowserError::ProbeTimeout));
    }
}
