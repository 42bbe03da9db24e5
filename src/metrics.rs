use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::watcher::PageSample;

/// Page engagement measurement. Computed per navigation and attached to
/// the split request payload so the core can weigh assignments by how
/// the page is actually being read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMetrics {
    pub url: String,
    pub path: String,
    pub title: String,
    pub time_on_page: f64,
    pub scroll_depth: f64,
    pub word_count: usize,
    pub timestamp: u64,
}

impl PageMetrics {
    pub fn measure(sample: &PageSample, loaded_at: DateTime<Utc>) -> Self {
        let parsed = Url::parse(&sample.location).ok();
        let url = parsed
            .as_ref()
            .and_then(|u| u.host_str())
            .unwrap_or("")
            .to_string();
        let path = parsed
            .as_ref()
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| "/".to_string());

        let now = Utc::now();
        let time_on_page = (now - loaded_at).num_milliseconds().max(0) as f64 / 1000.0;
        let scroll_depth = if sample.document_height > 0.0 {
            ((sample.scroll_offset + sample.viewport_height) / sample.document_height)
                .clamp(0.0, 1.0)
        } else {
            0.0
        };
        let word_count = sample.visible_text.split_whitespace().count();

        Self {
            url,
            path,
            title: sample.title.clone(),
            time_on_page,
            scroll_depth,
            word_count,
            timestamp: now.timestamp_millis() as u64,
        }
    }
}
