//! Builder-style options used when writing frames into a memory.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// Tunable options for writing frames into a memory. Absence of a field means
/// the engine default; the builder makes it easy to set only what you need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Override the logical creation time (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Text indexed instead of the payload (for binary content).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_text: Option<String>,
    /// Derive tags from kind and uri extension.
    #[serde(default = "default_true")]
    pub auto_tag: bool,
    /// Mine ISO dates from content into `Frame::content_dates`.
    #[serde(default = "default_true")]
    pub extract_dates: bool,
    /// Accepted for wire compatibility; graph extraction is not performed here.
    #[serde(default = "default_true")]
    pub extract_triplets: bool,
    /// Store no raw payload, only searchable text and the content hash.
    #[serde(default)]
    pub no_raw: bool,
    /// Skip ingestion when an active frame already has this payload checksum;
    /// returns the existing frame id instead of creating a duplicate.
    #[serde(default)]
    pub dedup: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            uri: None,
            title: None,
            timestamp: None,
            track: None,
            kind: None,
            tags: BTreeMap::new(),
            labels: Vec::new(),
            search_text: None,
            auto_tag: true,
            extract_dates: true,
            extract_triplets: true,
            no_raw: false,
            dedup: false,
        }
    }
}

impl PutOptions {
    #[must_use]
    pub fn builder() -> PutOptionsBuilder {
        PutOptionsBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PutOptionsBuilder {
    inner: PutOptions,
}

impl PutOptionsBuilder {
    pub fn uri<S: Into<String>>(mut self, uri: S) -> Self {
        self.inner.uri = Some(uri.into());
        self
    }

    pub fn title<S: Into<String>>(mut self, title: S) -> Self {
        self.inner.title = Some(title.into());
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.inner.timestamp = Some(timestamp);
        self
    }

    pub fn track<S: Into<String>>(mut self, track: S) -> Self {
        self.inner.track = Some(track.into());
        self
    }

    pub fn kind<S: Into<String>>(mut self, kind: S) -> Self {
        self.inner.kind = Some(kind.into());
        self
    }

    pub fn tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.inner.tags.insert(key.into(), value.into());
        self
    }

    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.inner.labels.push(label.into());
        self
    }

    pub fn search_text<S: Into<String>>(mut self, text: S) -> Self {
        self.inner.search_text = Some(text.into());
        self
    }

    #[must_use]
    pub fn auto_tag(mut self, enabled: bool) -> Self {
        self.inner.auto_tag = enabled;
        self
    }

    #[must_use]
    pub fn extract_dates(mut self, enabled: bool) -> Self {
        self.inner.extract_dates = enabled;
        self
    }

    #[must_use]
    pub fn extract_triplets(mut self, enabled: bool) -> Self {
        self.inner.extract_triplets = enabled;
        self
    }

    #[must_use]
    pub fn no_raw(mut self, enabled: bool) -> Self {
        self.inner.no_raw = enabled;
        self
    }

    #[must_use]
    pub fn dedup(mut self, enabled: bool) -> Self {
        self.inner.dedup = enabled;
        self
    }

    #[must_use]
    pub fn build(self) -> PutOptions {
        self.inner
    }
}
