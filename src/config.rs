use std::time::Duration;

use crate::transport::DeviceFilter;

/// Tunables of the link to the scale.
///
/// The defaults suit Acaia-compatible scales. Every field has a `with_*` setter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleConfig {
    /// Advertised name prefixes which identify a scale
    pub name_prefixes: Vec<String>,
    /// How long to scan before giving up with `DeviceNotFound`
    pub scan_timeout: Duration,
    /// Pause between the handshake writes. The scale drops commands which arrive too quickly.
    pub handshake_step_delay: Duration,
    pub heartbeat_interval: Duration,
    /// Wait after an unexpected drop before scanning again
    pub reconnect_backoff: Duration,
    /// Upper bound on a single write
    pub write_timeout: Duration,
    /// Whether an unexpected drop triggers a reconnection attempt
    pub auto_reconnect: bool,
    /// Number of past sessions kept by the diagnostics recorder
    pub session_history_len: usize,
}

impl ScaleConfig {
    const DEFAULT_NAME_PREFIXES: [&'static str; 4] = ["ACAIA", "PEARL", "LUNAR", "PROCH"];

    pub fn with_name_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_handshake_step_delay(mut self, delay: Duration) -> Self {
        self.handshake_step_delay = delay;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_session_history_len(mut self, len: usize) -> Self {
        self.session_history_len = len;
        self
    }

    /// The scan predicate built from the configured name prefixes
    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter::new(self.name_prefixes.clone())
    }
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            name_prefixes: Self::DEFAULT_NAME_PREFIXES.iter().map(|p| p.to_string()).collect(),
            scan_timeout: Duration::from_secs(30),
            handshake_step_delay: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(3),
            reconnect_backoff: Duration::from_secs(2),
            write_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            session_history_len: 10,
        }
    }
}

#[test]
fn test_builder_overrides_defaults() {
    let config = ScaleConfig::default()
        .with_name_prefixes(["CANDY"])
        .with_heartbeat_interval(Duration::from_secs(1))
        .with_auto_reconnect(false);
    assert_eq!(config.name_prefixes, vec!["CANDY".to_string()]);
    assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
    assert!(!config.auto_reconnect);
    assert_eq!(config.scan_timeout, ScaleConfig::default().scan_timeout);
    assert!(config.device_filter().matches("CANDY-01"));
}
