use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::api::{FieldApi, FieldQueryResult, Split};
use crate::context::Context;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};
use crate::probe::ConnectivityFlag;

/// Queries the field for a context: probability plus correlated
/// contexts. Same in-flight dedup and per-context caching discipline as
/// the split client; additionally validates the probability range.
///
/// The coordinator only calls `query` after the split for the same
/// context has resolved, and threads the outcome in for correlation.
pub struct FieldClient {
    api: Arc<dyn FieldApi>,
    flag: ConnectivityFlag,
    cells: Mutex<HashMap<Context, Arc<OnceCell<Option<FieldQueryResult>>>>>,
}

impl FieldClient {
    pub fn new(api: Arc<dyn FieldApi>, flag: ConnectivityFlag) -> Self {
        Self {
            api,
            flag,
            cells: Mutex::new(HashMap::new()),
        }
    }

    pub async fn query(&self, context: &Context, split: Option<&Split>) -> Option<FieldQueryResult> {
        if !self.flag.is_connected() {
            log(
                Level::Debug,
                Domain::Field,
                "skipped_disconnected",
                obj(&[("context", v_str(context.as_str()))]),
            );
            return None;
        }

        let split_id = split.map(|s| s.id.as_str()).unwrap_or("none");
        let cell = match self.cells.lock() {
            Ok(mut map) => map
                .entry(context.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone(),
            Err(_) => return None,
        };

        cell.get_or_init(|| async {
            match self.api.query_field(context).await {
                Ok(result) if result.is_valid() => {
                    log(
                        Level::Debug,
                        Domain::Field,
                        "resolved",
                        obj(&[
                            ("context", v_str(context.as_str())),
                            ("split_id", v_str(split_id)),
                            ("probability", v_num(result.probability)),
                            ("correlated", v_num(result.correlated_contexts.len() as f64)),
                        ]),
                    );
                    Some(result)
                }
                Ok(invalid) => {
                    log(
                        Level::Warn,
                        Domain::Field,
                        "probability_out_of_range",
                        obj(&[
                            ("context", v_str(context.as_str())),
                            ("probability", v_num(invalid.probability)),
                        ]),
                    );
                    None
                }
                Err(err) => {
                    log(
                        Level::Warn,
                        Domain::Field,
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
