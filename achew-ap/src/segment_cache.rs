//! Per-segment source URLs
//!
//! Segment ids are renumbered when chapters change, so URLs carry a cache
//! epoch: after `clear` every URL differs from any previously handed out.

use std::collections::HashMap;

#[derive(Debug)]
pub struct SegmentUrlCache {
    base_url: String,
    epoch: u64,
    urls: HashMap<String, String>,
}

impl SegmentUrlCache {
    /// `base_url` is the normalized server URL (no trailing slash)
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            epoch: 0,
            urls: HashMap::new(),
        }
    }

    pub fn url_for(&mut self, segment_id: &str) -> String {
        let base = &self.base_url;
        let epoch = self.epoch;
        self.urls
            .entry(segment_id.to_string())
            .or_insert_with(|| {
                format!(
                    "{}/api/audio/segment/{}?v={}",
                    base,
                    urlencoding::encode(segment_id),
                    epoch
                )
            })
            .clone()
    }

    /// Forget every cached URL and start a new epoch
    pub fn clear(&mut self) {
        self.urls.clear();
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_is_stable_within_epoch() {
        let mut cache = SegmentUrlCache::new("http://localhost:8000");
        let url = cache.url_for("3");
        assert_eq!(url, "http://localhost:8000/api/audio/segment/3?v=0");
        assert_eq!(cache.url_for("3"), url);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_segment_id_stays_one_path_segment() {
        let mut cache = SegmentUrlCache::new("http://localhost:8000");
        assert_eq!(
            cache.url_for("a/b?c#d"),
            "http://localhost:8000/api/audio/segment/a%2Fb%3Fc%23d?v=0"
        );
    }

    #[test]
    fn test_clear_never_reuses_urls() {
        let mut cache = SegmentUrlCache::new("http://localhost:8000");
        let before = cache.url_for("3");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.epoch(), 1);
        assert_ne!(cache.url_for("3"), before);
    }
}
