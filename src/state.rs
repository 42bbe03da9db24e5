use crate::api::{FieldQueryResult, Split};
use crate::context::Context;

/// Runtime configuration, environment-driven with defaults that match a
/// locally running core.
#[derive(Clone, Debug)]
pub struct Config {
    pub core_base: String,
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub nav_debounce_ms: u64,
    pub reprobe_cap_secs: u64,
    pub sample_channel_cap: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            core_base: std::env::var("CORE_BASE")
                .unwrap_or_else(|_| "http://localhost:3030".to_string()),
            probe_timeout_ms: std::env::var("PROBE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2000),
            request_timeout_ms: std::env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),
            nav_debounce_ms: std::env::var("NAV_DEBOUNCE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(250),
            reprobe_cap_secs: std::env::var("REPROBE_CAP_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
            sample_channel_cap: std::env::var("SAMPLE_CHANNEL_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64),
        }
    }

    /// SHA256 over the serialized config, for log correlation between
    /// runs with differing settings.
    pub fn config_hash(&self) -> String {
        let encoded = format!(
            "core_base={};probe_timeout_ms={};request_timeout_ms={};nav_debounce_ms={};reprobe_cap_secs={};sample_channel_cap={}",
            self.core_base,
            self.probe_timeout_ms,
            self.request_timeout_ms,
            self.nav_debounce_ms,
            self.reprobe_cap_secs,
            self.sample_channel_cap,
        );
        crate::logging::state_hash(&encoded)
    }
}

pub fn now_ts() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

/// Everything one page session accumulates. Owned by the coordinator
/// and threaded through the pipeline explicitly; nothing here is
/// ambient module state, and all of it dies with the page.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub context: Option<Context>,
    pub split: Option<Split>,
    pub field: Option<FieldQueryResult>,
    pub run_counter: u64,
}
