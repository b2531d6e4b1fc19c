use std::collections::HashMap;
use std::time::Duration;

use opwatch_core::DEFAULT_MAX_ATTEMPTS;

/// Path templates for the backend endpoints.
///
/// `{kind}` and `{id}` are only substituted when they make up a whole path
/// segment; each substituted value is percent-encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTemplates {
    pub status: String,
    pub stream: String,
    pub cancel: String,
    pub current: String,
}

impl Default for EndpointTemplates {
    fn default() -> Self {
        Self {
            status: "/api/{kind}/status/{id}".to_string(),
            stream: "/api/{kind}/stream/{id}".to_string(),
            cancel: "/api/{kind}/cancel/{id}".to_string(),
            current: "/api/{kind}/current".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub base_url: String,
    pub endpoints: EndpointTemplates,
    pub default_poll_interval: Duration,
    pub poll_intervals: HashMap<String, Duration>,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
    /// Applies to status, cancel and current queries; the push stream has no total timeout.
    pub request_timeout: Duration,
    pub push_enabled: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            endpoints: EndpointTemplates::default(),
            default_poll_interval: Duration::from_millis(1500),
            poll_intervals: HashMap::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            push_enabled: true,
        }
    }
}

impl MonitorSettings {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_poll_interval(mut self, kind: impl Into<String>, interval: Duration) -> Self {
        self.poll_intervals.insert(kind.into(), interval);
        self
    }

    pub fn poll_interval_for(&self, kind: &str) -> Duration {
        self.poll_intervals
            .get(kind)
            .copied()
            .unwrap_or(self.default_poll_interval)
    }
}
