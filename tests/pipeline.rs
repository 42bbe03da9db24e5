//! Pipeline integration tests against a scripted core API.
//!
//! The stub records every request in arrival order, so the tests can
//! assert the properties the pipeline guarantees: one in-flight request
//! per (context, operation), split-before-query ordering, zero traffic
//! while disconnected, cache reuse across same-host navigation, and
//! stale-run discard.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use fieldlink::api::{FieldApi, FieldQueryResult, SourceInfo, Split};
use fieldlink::context::Context;
use fieldlink::field::FieldClient;
use fieldlink::indicator::{InMemorySurface, Tier};
use fieldlink::metrics::PageMetrics;
use fieldlink::pipeline::{Coordinator, RunOutcome};
use fieldlink::probe::{ConnectionProbe, ConnectivityFlag};
use fieldlink::split::SplitClient;
use fieldlink::watcher::PageSample;

#[derive(Default)]
struct ScriptedApi {
    healthy: AtomicBool,
    split_delay_ms: Mutex<HashMap<String, u64>>,
    failing_splits: Mutex<HashSet<String>>,
    probabilities: Mutex<HashMap<String, f64>>,
    correlated: Mutex<HashMap<String, Vec<String>>>,
    metrics_seen: Mutex<Vec<bool>>,
    journal: Mutex<Vec<String>>,
}

impl ScriptedApi {
    fn connected() -> Arc<Self> {
        let api = Arc::new(Self::default());
        api.healthy.store(true, Ordering::SeqCst);
        api
    }

    fn disconnected() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_split_delay(&self, context: &str, ms: u64) {
        self.split_delay_ms
            .lock()
            .unwrap()
            .insert(context.to_string(), ms);
    }

    fn fail_split(&self, context: &str) {
        self.failing_splits
            .lock()
            .unwrap()
            .insert(context.to_string());
    }

    fn set_probability(&self, context: &str, p: f64) {
        self.probabilities
            .lock()
            .unwrap()
            .insert(context.to_string(), p);
    }

    fn set_correlated(&self, context: &str, contexts: &[&str]) {
        self.correlated.lock().unwrap().insert(
            context.to_string(),
            contexts.iter().map(|s| s.to_string()).collect(),
        );
    }

    fn push(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.journal()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl FieldApi for ScriptedApi {
    async fn probe_health(&self) -> Result<()> {
        self.push("health".to_string());
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("core not running"))
        }
    }

    async fn create_split(
        &self,
        context: &Context,
        metrics: Option<&PageMetrics>,
    ) -> Result<Split> {
        self.push(format!("split:{}", context));
        self.metrics_seen.lock().unwrap().push(metrics.is_some());
        let delay = self
            .split_delay_ms
            .lock()
            .unwrap()
            .get(context.as_str())
            .copied();
        if let Some(ms) = delay {
            sleep(Duration::from_millis(ms)).await;
        }
        if self
            .failing_splits
            .lock()
            .unwrap()
            .contains(context.as_str())
        {
            return Err(anyhow!("split unavailable"));
        }
        Ok(Split {
            id: format!("s-{}", context),
            context: context.as_str().to_string(),
        })
    }

    async fn query_field(&self, context: &Context) -> Result<FieldQueryResult> {
        self.push(format!("query:{}", context));
        let probability = self
            .probabilities
            .lock()
            .unwrap()
            .get(context.as_str())
            .copied()
            .unwrap_or(0.5);
        let correlated_contexts = self
            .correlated
            .lock()
            .unwrap()
            .get(context.as_str())
            .cloned()
            .unwrap_or_default();
        Ok(FieldQueryResult {
            probability,
            correlated_contexts,
        })
    }

    async fn fetch_source(&self) -> Result<SourceInfo> {
        self.push("source".to_string());
        Ok(SourceInfo {
            id: "src-test".to_string(),
        })
    }
}

fn shared_surface() -> Arc<Mutex<InMemorySurface>> {
    Arc::new(Mutex::new(InMemorySurface::default()))
}

async fn connected_flag(api: &Arc<ScriptedApi>) -> ConnectivityFlag {
    let flag = ConnectivityFlag::default();
    let probe = ConnectionProbe::new(api.clone() as Arc<dyn FieldApi>, flag.clone());
    probe.check().await;
    flag
}

// ---------------------------------------------------------------------------
// Split client: dedup and caching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_split_calls_share_one_request() {
    let api = ScriptedApi::connected();
    api.set_split_delay("example.com", 50);
    let flag = connected_flag(&api).await;
    let client = Arc::new(SplitClient::new(api.clone() as Arc<dyn FieldApi>, flag));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let ctx = Context::resolve("https://example.com/page").unwrap();
            client.get(&ctx).await
        }));
    }
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    assert_eq!(api.count("split:"), 1, "dedup must collapse to one request");
    let first = results[0].clone();
    assert_eq!(first.as_ref().unwrap().id, "s-example.com");
    for result in &results {
        assert_eq!(*result, first, "all callers observe the same outcome");
    }
}

#[tokio::test]
async fn resolved_split_is_cached_for_the_page() {
    let api = ScriptedApi::connected();
    let flag = connected_flag(&api).await;
    let client = SplitClient::new(api.clone() as Arc<dyn FieldApi>, flag);
    let ctx = Context::resolve("https://example.com/").unwrap();

    let first = client.get(&ctx).await;
    let second = client.get(&ctx).await;

    assert_eq!(api.count("split:"), 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn failed_split_resolves_to_none_for_all_callers() {
    let api = ScriptedApi::connected();
    api.fail_split("example.com");
    api.set_split_delay("example.com", 30);
    let flag = connected_flag(&api).await;
    let client = Arc::new(SplitClient::new(api.clone() as Arc<dyn FieldApi>, flag));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let ctx = Context::resolve("https://example.com/").unwrap();
            client.get(&ctx).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), None);
    }
    assert_eq!(api.count("split:"), 1);
}

#[tokio::test]
async fn disconnected_split_client_stays_off_the_network() {
    let api = ScriptedApi::disconnected();
    let flag = ConnectivityFlag::default();
    let client = SplitClient::new(api.clone() as Arc<dyn FieldApi>, flag);
    let ctx = Context::resolve("https://example.com/").unwrap();

    assert_eq!(client.get(&ctx).await, None);
    assert_eq!(api.count("split:"), 0);
}

// ---------------------------------------------------------------------------
// Field client: validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn out_of_range_probability_is_a_protocol_failure() {
    let api = ScriptedApi::connected();
    api.set_probability("example.com", 1.5);
    let flag = connected_flag(&api).await;
    let client = FieldClient::new(api.clone() as Arc<dyn FieldApi>, flag);
    let ctx = Context::resolve("https://example.com/").unwrap();

    assert_eq!(client.query(&ctx, None).await, None);
    assert_eq!(api.count("query:"), 1);

    // The failure outcome is cached like any other.
    assert_eq!(client.query(&ctx, None).await, None);
    assert_eq!(api.count("query:"), 1);
}

#[tokio::test]
async fn correlated_contexts_keep_server_order() {
    let api = ScriptedApi::connected();
    api.set_probability("example.com", 0.8);
    api.set_correlated("example.com", &["z.com", "a.com", "m.com"]);
    let flag = connected_flag(&api).await;
    let client = FieldClient::new(api.clone() as Arc<dyn FieldApi>, flag);
    let ctx = Context::resolve("https://example.com/").unwrap();

    let result = client.query(&ctx, None).await.unwrap();
    assert_eq!(result.correlated_contexts, vec!["z.com", "a.com", "m.com"]);
}

// ---------------------------------------------------------------------------
// Coordinator: gating, ordering, caching, stale runs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnected_probe_blocks_the_whole_pipeline() {
    let api = ScriptedApi::disconnected();
    let coordinator = Coordinator::new(api.clone() as Arc<dyn FieldApi>, Box::new(shared_surface()));

    let outcome = coordinator.run_for(&PageSample::bare("https://example.com/")).await;

    assert_eq!(outcome, RunOutcome::Disconnected);
    assert_eq!(api.count("split:"), 0);
    assert_eq!(api.count("query:"), 0);
    assert_eq!(api.count("health"), 1);
    assert!(!coordinator.status().connected);
}

#[tokio::test]
async fn split_resolves_before_query_is_issued() {
    let api = ScriptedApi::connected();
    api.set_probability("example.com", 0.8);
    let coordinator = Coordinator::new(api.clone() as Arc<dyn FieldApi>, Box::new(shared_surface()));

    let outcome = coordinator.run_for(&PageSample::bare("https://example.com/")).await;
    assert_eq!(outcome, RunOutcome::Completed);

    let journal = api.journal();
    let split_at = journal.iter().position(|e| e == "split:example.com").unwrap();
    let query_at = journal.iter().position(|e| e == "query:example.com").unwrap();
    assert!(split_at < query_at, "split must resolve before the query");
}

#[tokio::test]
async fn split_request_carries_page_metrics() {
    let api = ScriptedApi::connected();
    let coordinator = Coordinator::new(api.clone() as Arc<dyn FieldApi>, Box::new(shared_surface()));

    coordinator.run_for(&PageSample::bare("https://example.com/")).await;

    let seen = api.metrics_seen.lock().unwrap().clone();
    assert_eq!(seen, vec![true]);
}

#[tokio::test]
async fn failed_split_still_resolves_the_field() {
    let api = ScriptedApi::connected();
    api.fail_split("example.com");
    api.set_probability("example.com", 0.8);
    let coordinator = Coordinator::new(api.clone() as Arc<dyn FieldApi>, Box::new(shared_surface()));

    let outcome = coordinator.run_for(&PageSample::bare("https://example.com/")).await;

    assert_eq!(outcome, RunOutcome::Completed);
    let report = coordinator.status();
    assert_eq!(report.split_id, None);
    assert_eq!(report.probability, Some(0.8));
}

#[tokio::test]
async fn hostless_location_runs_nothing() {
    let api = ScriptedApi::connected();
    let coordinator = Coordinator::new(api.clone() as Arc<dyn FieldApi>, Box::new(shared_surface()));

    let outcome = coordinator.run_for(&PageSample::bare("about:blank")).await;

    assert_eq!(outcome, RunOutcome::NoContext);
    assert_eq!(api.count("split:"), 0);
    assert_eq!(api.count("query:"), 0);
}

#[tokio::test]
async fn path_only_navigation_reuses_cached_results() {
    let api = ScriptedApi::connected();
    api.set_probability("a.com", 0.8);
    api.set_probability("b.com", 0.2);
    let coordinator = Coordinator::new(api.clone() as Arc<dyn FieldApi>, Box::new(shared_surface()));

    coordinator.run_for(&PageSample::bare("https://a.com/first")).await;
    coordinator.run_for(&PageSample::bare("https://a.com/second")).await;
    assert_eq!(api.count("split:a.com"), 1);
    assert_eq!(api.count("query:a.com"), 1);

    // A host change triggers exactly one new split+query pair.
    coordinator.run_for(&PageSample::bare("https://b.com/")).await;
    assert_eq!(api.count("split:b.com"), 1);
    assert_eq!(api.count("query:b.com"), 1);
    assert_eq!(api.count("split:"), 2);
    assert_eq!(api.count("query:"), 2);
}

#[tokio::test]
async fn stale_run_results_are_discarded() {
    let api = ScriptedApi::connected();
    api.set_split_delay("slow.com", 200);
    api.set_probability("slow.com", 0.9);
    api.set_probability("fast.com", 0.2);
    let surface = shared_surface();
    let coordinator = Arc::new(Coordinator::new(
        api.clone() as Arc<dyn FieldApi>,
        Box::new(surface.clone()),
    ));

    let slow = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator.run_for(&PageSample::bare("https://slow.com/")).await
        })
    };
    sleep(Duration::from_millis(50)).await;
    let fast = coordinator.run_for(&PageSample::bare("https://fast.com/")).await;
    assert_eq!(fast, RunOutcome::Completed);

    let slow = slow.await.unwrap();
    assert_eq!(slow, RunOutcome::Superseded);

    // Session and indicator reflect the newer run only.
    let report = coordinator.status();
    assert_eq!(report.context.as_deref(), Some("fast.com"));
    assert_eq!(report.probability, Some(0.2));
    assert_eq!(api.count("query:slow.com"), 0, "superseded run must not query");

    let surface = surface.lock().unwrap();
    assert_eq!(surface.nodes().len(), 1);
    assert_eq!(surface.nodes()[0].tier, Tier::Red);
}

#[tokio::test]
async fn indicator_matches_probability_tiers_end_to_end() {
    let api = ScriptedApi::connected();
    api.set_probability("green.com", 0.8);
    api.set_correlated("green.com", &["a.com"]);
    api.set_probability("yellow.com", 0.5);
    let surface = shared_surface();
    let coordinator = Coordinator::new(api.clone() as Arc<dyn FieldApi>, Box::new(surface.clone()));

    coordinator.run_for(&PageSample::bare("https://green.com/")).await;
    {
        let surface = surface.lock().unwrap();
        assert_eq!(surface.nodes().len(), 1);
        assert_eq!(surface.nodes()[0].tier, Tier::Green);
    }
    let report = coordinator.status();
    assert_eq!(report.correlated_contexts, vec!["a.com"]);

    coordinator.run_for(&PageSample::bare("https://yellow.com/")).await;
    let surface = surface.lock().unwrap();
    assert_eq!(surface.nodes().len(), 1, "still exactly one indicator node");
    assert_eq!(surface.nodes()[0].tier, Tier::Yellow);
    assert_eq!(surface.nodes()[0].probability, 0.5);
}
