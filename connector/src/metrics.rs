use metrics::{counter, gauge};
use std::net::SocketAddr;

pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_STALE: &str = "stale";
pub const OUTCOME_FAILURE: &str = "failure";

const CACHE_REFRESH_TOTAL: &str = "oura_cache_refresh_total";
const TOKEN_REQUESTS_TOTAL: &str = "oura_token_requests_total";
const CREDENTIAL_EVICTIONS_TOTAL: &str = "oura_credential_evictions_total";
const CREDENTIAL_ENTRIES: &str = "oura_credential_entries";

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
pub fn init_metrics(listen: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = listen.parse()?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

pub fn record_refresh(cache: &'static str, outcome: &'static str) {
    counter!(CACHE_REFRESH_TOTAL, "cache" => cache, "outcome" => outcome).increment(1);
}

pub fn record_token_request(kind: &'static str, outcome: &'static str) {
    counter!(TOKEN_REQUESTS_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_credential_eviction(reason: &'static str) {
    counter!(CREDENTIAL_EVICTIONS_TOTAL, "reason" => reason).increment(1);
}

#[allow(clippy::cast_precision_loss)]
pub fn set_credential_entries(count: usize) {
    gauge!(CREDENTIAL_ENTRIES).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_a_noop() {
        record_refresh("users", OUTCOME_SUCCESS);
        record_token_request("get", OUTCOME_FAILURE);
        record_credential_eviction("unauthorized");
        set_credential_entries(3);
    }

    #[test]
    fn init_rejects_bad_listen_address() {
        assert!(init_metrics("not-an-address").is_err());
    }
}
