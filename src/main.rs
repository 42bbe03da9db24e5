use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use fieldlink::api::http::HttpFieldApi;
use fieldlink::api::FieldApi;
use fieldlink::indicator::InMemorySurface;
use fieldlink::logging::{json_log, obj, v_bool, v_num, v_str};
use fieldlink::pipeline::{Coordinator, RunOutcome};
use fieldlink::probe::ProbeSchedule;
use fieldlink::state::Config;
use fieldlink::watcher::{NavigationWatcher, PageSample};

/// Minimal embedding harness: stdin lines are the page-sample feed
/// (one location per line), the indicator lands on an in-memory
/// surface, and status reports go to the structured log. A real host
/// wires the same pieces to its DOM bridge instead.
#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    json_log(
        "startup",
        obj(&[
            ("core_base", v_str(&cfg.core_base)),
            ("config_hash", v_str(&cfg.config_hash())),
        ]),
    );

    let api: Arc<dyn FieldApi> = Arc::new(HttpFieldApi::new(&cfg));
    let surface = Arc::new(Mutex::new(InMemorySurface::default()));
    let coordinator = Coordinator::new(api.clone(), Box::new(surface.clone()));

    // Which core instance we are talking to; display only.
    match api.fetch_source().await {
        Ok(source) => json_log("source", obj(&[("id", v_str(&source.id))])),
        Err(_) => json_log("source", obj(&[("id", v_str("unavailable"))])),
    }

    let (sample_tx, sample_rx) = mpsc::channel::<PageSample>(cfg.sample_channel_cap);
    let watcher = NavigationWatcher::new(Duration::from_millis(cfg.nav_debounce_ms));
    let mut subscription = watcher.spawn(sample_rx);

    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let location = line.trim().to_string();
            if location.is_empty() {
                continue;
            }
            if sample_tx.send(PageSample::bare(location)).await.is_err() {
                break;
            }
        }
    });

    let mut schedule = ProbeSchedule::new(cfg.reprobe_cap_secs);
    while let Some(event) = subscription.next_event().await {
        let mut sample = event.sample;
        loop {
            match coordinator.run_for(&sample).await {
                RunOutcome::Disconnected => {
                    schedule.record_failure();
                    let delay = schedule.next_delay();
                    json_log(
                        "reconnect",
                        obj(&[
                            ("location", v_str(&sample.location)),
                            ("retry_in_secs", v_num(delay.as_secs_f64())),
                        ]),
                    );
                    tokio::select! {
                        _ = sleep(delay) => {}
                        next = subscription.next_event() => match next {
                            // A newer navigation supersedes the retry.
                            Some(e) => sample = e.sample,
                            None => return Ok(()),
                        },
                    }
                }
                outcome => {
                    schedule.record_success();
                    let report = coordinator.status();
                    json_log(
                        "pipeline",
                        obj(&[
                            ("outcome", v_str(outcome.as_str())),
                            ("connected", v_bool(report.connected)),
                            (
                                "context",
                                v_str(report.context.as_deref().unwrap_or("-")),
                            ),
                            (
                                "split_id",
                                v_str(report.split_id.as_deref().unwrap_or("-")),
                            ),
                            (
                                "probability",
                                report
                                    .probability
                                    .map(v_num)
                                    .unwrap_or(serde_json::Value::Null),
                            ),
                            (
                                "correlated",
                                serde_json::json!(report.correlated_contexts),
                            ),
                        ]),
                    );
                    break;
                }
            }
        }
    }

    Ok(())
}
