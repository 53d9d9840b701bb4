//! Listener configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resolver::TargetTypes;

/// Tunables of an [`EventListener`](super::EventListener).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Sleep between two polling passes.
    pub poll_interval: Duration,
    /// Name of the worker thread.
    pub thread_name: String,
    /// Target types whose names can be resolved to ids.
    pub target_types: TargetTypes,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            thread_name: "eventwatch-listener".to_string(),
            target_types: TargetTypes::default(),
        }
    }
}

impl ListenerConfig {
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    #[must_use]
    pub fn with_target_types(mut self, target_types: TargetTypes) -> Self {
        self.target_types = target_types;
        self
    }
}
