use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::Duration;

use crate::api::FieldApi;
use crate::logging::{log, obj, v_bool, v_str, Domain, Level};

/// Result of the most recent probe. No history is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Process-wide connectivity flag. The probe is the only writer; the
/// split/field clients and any display surface read it.
#[derive(Clone, Default)]
pub struct ConnectivityFlag {
    inner: Arc<FlagInner>,
}

#[derive(Default)]
struct FlagInner {
    connected: AtomicBool,
    last_checked: Mutex<Option<DateTime<Utc>>>,
}

impl ConnectivityFlag {
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ConnectionState {
        ConnectionState {
            connected: self.is_connected(),
            last_checked: self
                .inner
                .last_checked
                .lock()
                .ok()
                .and_then(|guard| *guard),
        }
    }

    fn record(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::SeqCst);
        if let Ok(mut guard) = self.inner.last_checked.lock() {
            *guard = Some(Utc::now());
        }
    }
}

/// Bounded-timeout liveness check against the core's health endpoint.
/// Every failure mode collapses to `connected=false`; nothing escapes.
pub struct ConnectionProbe {
    api: Arc<dyn FieldApi>,
    flag: ConnectivityFlag,
}

impl ConnectionProbe {
    pub fn new(api: Arc<dyn FieldApi>, flag: ConnectivityFlag) -> Self {
        Self { api, flag }
    }

    pub async fn check(&self) -> ConnectionState {
        let was_connected = self.flag.is_connected();
        let connected = match self.api.probe_health().await {
            Ok(()) => true,
            Err(err) => {
                log(
                    Level::Debug,
                    Domain::Probe,
                    "health_failed",
                    obj(&[("error", v_str(&err.to_string()))]),
                );
                false
            }
        };
        self.flag.record(connected);
        if connected != was_connected {
            log(
                Level::Info,
                Domain::Probe,
                "transition",
                obj(&[("connected", v_bool(connected))]),
            );
        }
        self.flag.snapshot()
    }
}

/// Backoff schedule for re-probing while the core is down: 2^failures
/// seconds with ±30% jitter, capped. Success resets it.
#[derive(Debug, Clone)]
pub struct ProbeSchedule {
    failures: u32,
    cap_secs: u64,
}

impl ProbeSchedule {
    pub fn new(cap_secs: u64) -> Self {
        Self {
            failures: 0,
            cap_secs,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn backoff_secs(&self) -> u64 {
        let base = 2u64.saturating_pow(self.failures.min(8));
        base.min(self.cap_secs)
    }

    pub fn next_delay(&self) -> Duration {
        let secs = self.backoff_secs() as f64;
        let jitter_range = secs * 0.3;
        let jitter: f64 = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_secs_f64((secs + jitter).max(0.5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_starts_disconnected() {
        let flag = ConnectivityFlag::default();
        assert!(!flag.is_connected());
        let state = flag.snapshot();
        assert!(!state.connected);
        assert!(state.last_checked.is_none());
    }

    #[test]
    fn test_flag_record_updates_snapshot() {
        let flag = ConnectivityFlag::default();
        flag.record(true);
        let state = flag.snapshot();
        assert!(state.connected);
        assert!(state.last_checked.is_some());

        flag.record(false);
        assert!(!flag.is_connected());
    }

    #[test]
    fn test_schedule_backoff_progression() {
        let mut sched = ProbeSchedule::new(300);
        assert_eq!(sched.backoff_secs(), 1); // 2^0

        sched.record_failure();
        assert_eq!(sched.backoff_secs(), 2);
        sched.record_failure();
        assert_eq!(sched.backoff_secs(), 4);
        sched.record_failure();
        assert_eq!(sched.backoff_secs(), 8);

        for _ in 0..10 {
            sched.record_failure();
        }
        assert_eq!(sched.backoff_secs(), 256); // 2^8, under the cap
    }

    #[test]
    fn test_schedule_cap_and_reset() {
        let mut sched = ProbeSchedule::new(60);
        for _ in 0..10 {
            sched.record_failure();
        }
        assert_eq!(sched.backoff_secs(), 60);

        sched.record_success();
        assert_eq!(sched.backoff_secs(), 1);
    }

    #[test]
    fn test_next_delay_within_jitter_band() {
        let mut sched = ProbeSchedule::new(300);
        sched.record_failure();
        sched.record_failure();
        for _ in 0..50 {
            let d = sched.next_delay().as_secs_f64();
            assert!((2.8..=5.2).contains(&d), "delay out of band: {}", d);
        }
    }
}
