use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::api::FieldApi;
use crate::context::Context;
use crate::field::FieldClient;
use crate::indicator::{IndicatorRenderer, IndicatorSurface};
use crate::logging::{log, obj, state_hash, v_num, v_str, Domain, Level};
use crate::metrics::PageMetrics;
use crate::probe::{ConnectionProbe, ConnectivityFlag};
use crate::split::SplitClient;
use crate::state::SessionState;
use crate::watcher::PageSample;

/// How one pipeline run ended. Informational only; no variant carries
/// an error, because no failure of this subsystem may reach the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Probe, split, query, and render all ran for the current run.
    Completed,
    /// Probe reported the core down; nothing else was attempted.
    Disconnected,
    /// The location has no resolvable hostname; nothing to correlate.
    NoContext,
    /// A newer run started while this one was in flight; its results
    /// were discarded.
    Superseded,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Disconnected => "disconnected",
            RunOutcome::NoContext => "no_context",
            RunOutcome::Superseded => "superseded",
        }
    }
}

/// Read-only view for display surfaces (popup, dashboard). They render
/// it; they never write back.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub connected: bool,
    pub last_checked: Option<String>,
    pub context: Option<String>,
    pub split_id: Option<String>,
    pub probability: Option<f64>,
    pub correlated_contexts: Vec<String>,
}

/// Owns the session and drives probe → resolve → split → query →
/// render. One coordinator per page load; everything it holds dies
/// with the page.
pub struct Coordinator {
    flag: ConnectivityFlag,
    probe: ConnectionProbe,
    split: SplitClient,
    field: FieldClient,
    renderer: Mutex<IndicatorRenderer>,
    session: Mutex<SessionState>,
    run_seq: AtomicU64,
    page_loaded_at: DateTime<Utc>,
}

impl Coordinator {
    pub fn new(api: Arc<dyn FieldApi>, surface: Box<dyn IndicatorSurface>) -> Self {
        let flag = ConnectivityFlag::default();
        Self {
            probe: ConnectionProbe::new(api.clone(), flag.clone()),
            split: SplitClient::new(api.clone(), flag.clone()),
            field: FieldClient::new(api, flag.clone()),
            flag,
            renderer: Mutex::new(IndicatorRenderer::new(surface)),
            session: Mutex::new(SessionState::default()),
            run_seq: AtomicU64::new(0),
            page_loaded_at: Utc::now(),
        }
    }

    /// Run the full pipeline for the page described by `sample`.
    ///
    /// Each call claims the next run counter; results are applied to
    /// the session only while that counter is still current, so a late
    /// resolution from a superseded navigation can never clobber the
    /// state of a newer one.
    pub async fn run_for(&self, sample: &PageSample) -> RunOutcome {
        let run = self.run_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut session) = self.session.lock() {
            session.run_counter = run;
        }

        let connection = self.probe.check().await;
        if !connection.connected {
            return self.finish(run, RunOutcome::Disconnected);
        }

        let context = match Context::resolve(&sample.location) {
            Some(ctx) => ctx,
            None => {
                log(
                    Level::Debug,
                    Domain::System,
                    "no_context",
                    obj(&[("location", v_str(&sample.location))]),
                );
                return self.finish(run, RunOutcome::NoContext);
            }
        };

        self.split
            .record_metrics(PageMetrics::measure(sample, self.page_loaded_at));
        let split = self.split.get(&context).await;
        if !self.is_current(run) {
            return self.finish(run, RunOutcome::Superseded);
        }

        // Split has resolved (either way) for this context; the query
        // may now go out.
        let field = self.field.query(&context, split.as_ref()).await;

        {
            let mut session = match self.session.lock() {
                Ok(session) => session,
                Err(_) => return self.finish(run, RunOutcome::Superseded),
            };
            if session.run_counter != run {
                log(
                    Level::Debug,
                    Domain::System,
                    "stale_run_discarded",
                    obj(&[
                        ("run", v_num(run as f64)),
                        ("current", v_num(session.run_counter as f64)),
                    ]),
                );
                return RunOutcome::Superseded;
            }
            session.context = Some(context);
            session.split = split;
            session.field = field.clone();

            // Render inside the guard so a superseded run can never
            // repaint over a newer one.
            if let Ok(mut renderer) = self.renderer.lock() {
                renderer.render(field.as_ref());
            }
        }

        self.finish(run, RunOutcome::Completed)
    }

    fn is_current(&self, run: u64) -> bool {
        self.session
            .lock()
            .map(|session| session.run_counter == run)
            .unwrap_or(false)
    }

    fn finish(&self, run: u64, outcome: RunOutcome) -> RunOutcome {
        let report = self.status();
        let digest = serde_json::to_string(&report).unwrap_or_default();
        log(
            Level::Debug,
            Domain::System,
            "run_finished",
            obj(&[
                ("run", v_num(run as f64)),
                ("outcome", v_str(outcome.as_str())),
                ("state_hash", v_str(&state_hash(&digest))),
            ]),
        );
        outcome
    }

    /// Snapshot for display surfaces.
    pub fn status(&self) -> StatusReport {
        let connection = self.flag.snapshot();
        let session = self
            .session
            .lock()
            .map(|session| session.clone())
            .unwrap_or_default();
        StatusReport {
            connected: connection.connected,
            last_checked: connection
                .last_checked
                .map(|ts| ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            context: session.context.map(|c| c.as_str().to_string()),
            split_id: session.split.map(|s| s.id),
            probability: session.field.as_ref().map(|f| f.probability),
            correlated_contexts: session
                .field
                .map(|f| f.correlated_contexts)
                .unwrap_or_default(),
        }
    }

    /// Read side of the process-wide connectivity flag.
    pub fn connectivity(&self) -> &ConnectivityFlag {
        &self.flag
    }
}
