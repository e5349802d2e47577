//! Session configuration

use crate::constants::{DEFAULT_ENRICH_DEPTH_LIMIT, DEFAULT_HISTORY_LIMIT};

/// Tunables for a [`crate::session::DebugSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Maximum nesting of heap enrichment calls before they are skipped
    pub enrich_depth_limit: usize,
    /// Frame label given to variables opened while no function is active
    pub global_frame_label: String,
    /// Frame label written for heap records
    pub heap_frame_label: String,
    /// Byte budget for drivers that record snapshot history
    pub history_limit_bytes: usize,
}

impl SessionConfig {
    pub fn new() -> Self {
        SessionConfig {
            enrich_depth_limit: DEFAULT_ENRICH_DEPTH_LIMIT,
            global_frame_label: "global".to_string(),
            heap_frame_label: "heap".to_string(),
            history_limit_bytes: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_enrich_depth_limit(mut self, limit: usize) -> Self {
        self.enrich_depth_limit = limit;
        self
    }

    pub fn with_global_frame_label(mut self, label: impl Into<String>) -> Self {
        self.global_frame_label = label.into();
        self
    }

    pub fn with_heap_frame_label(mut self, label: impl Into<String>) -> Self {
        self.heap_frame_label = label.into();
        self
    }

    pub fn with_history_limit(mut self, bytes: usize) -> Self {
        self.history_limit_bytes = bytes;
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = SessionConfig::default();
        assert_eq!(config.enrich_depth_limit, 50);
        assert_eq!(config.global_frame_label, "global");
        assert_eq!(config.heap_frame_label, "heap");
    }

    #[test]
    fn test_builder_overrides() {
        let config = SessionConfig::new()
            .with_enrich_depth_limit(3)
            .with_global_frame_label("<top>")
            .with_history_limit(1024);
        assert_eq!(config.enrich_depth_limit, 3);
        assert_eq!(config.global_frame_label, "<top>");
        assert_eq!(config.history_limit_bytes, 1024);
        assert_eq!(config.heap_frame_label, "heap");
    }
}
