//! Run configuration

use crate::path::{HostArch, PathResolver, View};
use std::time::Duration;

/// Default bound on a single registry call
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings for one reconciliation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Run-wide purge default; keys may override it. `None` means off.
    pub purge_values: Option<bool>,
    /// View for paths without a `32:` prefix
    pub default_view: View,
    /// Concurrent actions in flight
    pub max_workers: usize,
    /// Bound on each backend call
    pub action_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            purge_values: None,
            default_view: View::Native,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

impl RunConfig {
    #[must_use]
    pub fn with_purge_values(mut self, purge: Option<bool>) -> Self {
        self.purge_values = purge;
        self
    }

    #[must_use]
    pub fn with_default_view(mut self, view: View) -> Self {
        self.default_view = view;
        self
    }

    /// At least one worker is always kept
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    #[must_use]
    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    /// Path resolver for a registry on `host`
    #[must_use]
    pub fn resolver(&self, host: HostArch) -> PathResolver {
        PathResolver::new(host, self.default_view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RunConfig::default();
        assert_eq!(config.purge_values, None);
        assert_eq!(config.default_view, View::Native);
        assert!(config.max_workers >= 1);
        assert_eq!(config.action_timeout, Duration::from_secs(30));
    }

    #[test]
    fn builders() {
        let config = RunConfig::default()
            .with_purge_values(Some(true))
            .with_default_view(View::Redirected32)
            .with_max_workers(0);
        assert_eq!(config.max_workers, 1);
        assert_eq!(
            config.resolver(HostArch::X86).parse(r"HKLM\Software").unwrap().view(),
            View::Native
        );
        assert_eq!(
            config.resolver(HostArch::X64).parse(r"HKLM\Software").unwrap().view(),
            View::Redirected32
        );
    }
}
