//! fieldlink: client-side coordination for the local field core.
//!
//! Given a feed of page samples from a host surface, resolves the
//! page's context, obtains a stable split assignment, queries the
//! field probability and its correlated contexts, and maintains a
//! single unobtrusive indicator. Re-validates on in-page navigation,
//! deduplicates requests, and degrades silently when the core is
//! unreachable.

pub mod api;
pub mod context;
pub mod field;
pub mod indicator;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod probe;
pub mod split;
pub mod state;
pub mod watcher;
