use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::api::{FieldApi, Split};
use crate::context::Context;
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::metrics::PageMetrics;
use crate::probe::ConnectivityFlag;

/// Fetches and caches the split assignment per context.
///
/// One `OnceCell` per context gives both guarantees at once: concurrent
/// callers for the same context ride a single in-flight request, and
/// the resolved outcome (success or failure) stays cached for the rest
/// of the page lifetime. The core is idempotent per context, so a
/// cached assignment is as good as a fresh one.
pub struct SplitClient {
    api: Arc<dyn FieldApi>,
    flag: ConnectivityFlag,
    cells: Mutex<HashMap<Context, Arc<OnceCell<Option<Split>>>>>,
    latest_metrics: Mutex<Option<PageMetrics>>,
}

impl SplitClient {
    pub fn new(api: Arc<dyn FieldApi>, flag: ConnectivityFlag) -> Self {
        Self {
            api,
            flag,
            cells: Mutex::new(HashMap::new()),
            latest_metrics: Mutex::new(None),
        }
    }

    /// Latest engagement measurement; rides the next split request.
    pub fn record_metrics(&self, metrics: PageMetrics) {
        if let Ok(mut guard) = self.latest_metrics.lock() {
            *guard = Some(metrics);
        }
    }

    /// Resolve the split for a context. `None` when the core is
    /// unreachable (flag down, no network call), when the request
    /// fails, or when the response is out of contract.
    pub async fn get(&self, context: &Context) -> Option<Split> {
        if !self.flag.is_connected() {
            log(
                Level::Debug,
                Domain::Split,
                "skipped_disconnected",
                obj(&[("context", v_str(context.as_str()))]),
            );
            return None;
        }

        let cell = match self.cells.lock() {
            Ok(mut map) => map
                .entry(context.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone(),
            Err(_) => return None,
        };

        cell.get_or_init(|| async {
            let metrics = self
                .latest_metrics
                .lock()
                .ok()
                .and_then(|guard| (*guard).clone());
            match self.api.create_split(context, metrics.as_ref()).await {
                Ok(split) if split.context == context.as_str() => {
                    log(
                        Level::Info,
                        Domain::Split,
                        "assigned",
                        obj(&[
                            ("context", v_str(context.as_str())),
                            ("split_id", v_str(&split.id)),
                        ]),
                    );
                    Some(split)
                }
                Ok(other) => {
                    log(
                        Level::Warn,
                        Domain::Split,
                        "context_mismatch",
                        obj(&[
                            ("requested", v_str(context.as_str())),
                            ("returned", v_str(&other.context)),
                        ]),
                    );
                    None
                }
                Err(err) => {
                    log(
                        Level::Warn,
                        Domain::Split,
                        "request_failed",
                        obj(&[
                            ("context", v_str(context.as_str())),
                            ("error", v_str(&err.to_string())),
                        ]),
                    );
                    None
                }
            }
        })
        .await
        .clone()
    }
}
