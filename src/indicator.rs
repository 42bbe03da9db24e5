use crate::api::FieldQueryResult;
use crate::logging::{log, obj, v_num, v_str, Domain, Level};

pub const INDICATOR_NODE_ID: &str = "field-indicator";

/// Three-tier mapping from probability to indicator color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Green,
    Yellow,
    Red,
}

impl Tier {
    pub fn for_probability(p: f64) -> Self {
        if p > 0.66 {
            Tier::Green
        } else if p > 0.33 {
            Tier::Yellow
        } else {
            Tier::Red
        }
    }

    pub fn css_color(&self) -> &'static str {
        match self {
            Tier::Green => "#00ff00",
            Tier::Yellow => "#ffff00",
            Tier::Red => "#ff0000",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Green => "green",
            Tier::Yellow => "yellow",
            Tier::Red => "red",
        }
    }
}

/// The single visual element the pipeline maintains.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorNode {
    pub id: &'static str,
    pub tier: Tier,
    pub probability: f64,
}

impl IndicatorNode {
    /// Style contract for DOM-backed hosts. `pointer-events: none` and
    /// `position: fixed` keep the node from intercepting input or
    /// shifting page layout.
    pub fn style(&self) -> String {
        format!(
            "position: fixed; bottom: 10px; right: 10px; width: 8px; height: 8px; \
             border-radius: 50%; background: {}; opacity: 0.5; z-index: 10000; \
             pointer-events: none; transition: opacity 0.3s;",
            self.tier.css_color()
        )
    }
}

/// Where the indicator lands: a DOM bridge in an extension host, an
/// in-memory surface in tests and the demo binary.
pub trait IndicatorSurface: Send {
    fn upsert(&mut self, node: &IndicatorNode);
    fn remove(&mut self, id: &str);
}

#[derive(Default)]
pub struct InMemorySurface {
    nodes: Vec<IndicatorNode>,
}

impl InMemorySurface {
    pub fn nodes(&self) -> &[IndicatorNode] {
        &self.nodes
    }
}

impl IndicatorSurface for InMemorySurface {
    fn upsert(&mut self, node: &IndicatorNode) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.id == node.id) {
            *existing = node.clone();
        } else {
            self.nodes.push(node.clone());
        }
    }

    fn remove(&mut self, id: &str) {
        self.nodes.retain(|n| n.id != id);
    }
}

/// Shared handle so a host (or test) can keep inspecting the surface
/// after handing it to the renderer.
impl IndicatorSurface for std::sync::Arc<std::sync::Mutex<InMemorySurface>> {
    fn upsert(&mut self, node: &IndicatorNode) {
        if let Ok(mut surface) = self.lock() {
            surface.upsert(node);
        }
    }

    fn remove(&mut self, id: &str) {
        if let Ok(mut surface) = self.lock() {
            surface.remove(id);
        }
    }
}

/// Upserts exactly one node per render: create-if-absent,
/// update-if-present, never a duplicate.
///
/// On `None` (disconnected or any upstream failure) the last rendered
/// node is deliberately left in place: probe gating already bounds how
/// stale it can get, and a flickering indicator is worse than a briefly
/// outdated one. This choice is fixed and covered by tests.
pub struct IndicatorRenderer {
    surface: Box<dyn IndicatorSurface>,
    current: Option<IndicatorNode>,
}

impl IndicatorRenderer {
    pub fn new(surface: Box<dyn IndicatorSurface>) -> Self {
        Self {
            surface,
            current: None,
        }
    }

    pub fn render(&mut self, result: Option<&FieldQueryResult>) {
        let Some(result) = result else {
            return;
        };
        let node = IndicatorNode {
            id: INDICATOR_NODE_ID,
            tier: Tier::for_probability(result.probability),
            probability: result.probability,
        };
        if self.current.as_ref() != Some(&node) {
            log(
                Level::Debug,
                Domain::Render,
                "upsert",
                obj(&[
                    ("tier", v_str(node.tier.as_str())),
                    ("probability", v_num(node.probability)),
                ]),
            );
        }
        self.surface.upsert(&node);
        self.current = Some(node);
    }

    pub fn current(&self) -> Option<&IndicatorNode> {
        self.current.as_ref()
    }
}
