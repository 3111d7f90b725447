// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Resource manager configuration, loaded from a RON file.

use kiln_core::platform::StaticResource;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors raised while loading the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// The offending file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid RON for [`RtrmConfig`].
    #[error("invalid config {path}: {source}")]
    Parse {
        /// The offending file.
        path: String,
        /// Parser error, with its position.
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Run-time resource manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtrmConfig {
    /// Interval of the background optimization in ms, 0 to only optimize on events.
    pub opt_interval_ms: u64,
    /// Deferral of an optimization after an execution start, in ms.
    pub exc_start_defer_ms: u64,
    /// Deferral of an optimization after an execution stop, in ms.
    pub exc_stop_defer_ms: u64,
    /// Deferral of an optimization after an explicit request, in ms.
    pub opt_request_defer_ms: u64,
    /// Terminate-and-wait rounds on shutdown.
    pub worker_termination_rounds: u32,
    /// Wait for workers to exit, per round, in ms.
    pub worker_termination_timeout_ms: u64,
    /// Upper bound of one dispatcher sleep, in ms.
    pub dispatch_recheck_ms: u64,
    /// Name of the scheduling policy to load.
    pub scheduling_policy: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Static resource description; host discovery is used when absent.
    pub platform: Option<Vec<StaticResource>>,
}

impl Default for RtrmConfig {
    fn default() -> Self {
        Self {
            opt_interval_ms: 0,
            exc_start_defer_ms: 50,
            exc_stop_defer_ms: 50,
            opt_request_defer_ms: 100,
            worker_termination_rounds: 3,
            worker_termination_timeout_ms: 300,
            dispatch_recheck_ms: 100,
            scheduling_policy: "yamca".to_string(),
            log_filter: "info".to_string(),
            platform: None,
        }
    }
}

impl RtrmConfig {
    /// Parses a configuration from RON text.
    pub fn from_ron(text: &str) -> Result<Self, ron::error::SpannedError> {
        ron::de::from_str(text)
    }

    /// Loads the configuration at `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("RM: no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        Self::from_ron(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Background optimization interval, `None` when disabled.
    pub fn opt_interval(&self) -> Option<Duration> {
        (self.opt_interval_ms > 0).then(|| Duration::from_millis(self.opt_interval_ms))
    }

    /// Deferral after an execution start.
    pub fn exc_start_defer(&self) -> Duration {
        Duration::from_millis(self.exc_start_defer_ms)
    }

    /// Deferral after an execution stop.
    pub fn exc_stop_defer(&self) -> Duration {
        Duration::from_millis(self.exc_stop_defer_ms)
    }

    /// Deferral after an optimization request.
    pub fn opt_request_defer(&self) -> Duration {
        Duration::from_millis(self.opt_request_defer_ms)
    }

    /// Per-round wait for workers on shutdown.
    pub fn worker_termination_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_termination_timeout_ms)
    }

    /// Upper bound of one dispatcher sleep.
    pub fn dispatch_recheck(&self) -> Duration {
        Duration::from_millis(self.dispatch_recheck_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::resource::ResourceKind;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RtrmConfig::default();
        assert_eq!(config.opt_interval(), None);
        assert_eq!(config.exc_start_defer(), Duration::from_millis(50));
        assert_eq!(config.opt_request_defer(), Duration::from_millis(100));
        assert_eq!(config.worker_termination_rounds, 3);
        assert_eq!(config.scheduling_policy, "yamca");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RtrmConfig::load(dir.path().join("absent.ron")).unwrap();
        assert_eq!(config, RtrmConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"(
                opt_interval_ms: 2000,
                scheduling_policy: "yamca",
                platform: Some([
                    (path: "sys0.cpu0.pe0", kind: ProcessingElement, capacity: 100),
                    (path: "sys0.mem0", kind: Memory, capacity: 4096, cluster: 0),
                ]),
            )"#
        )
        .unwrap();

        let config = RtrmConfig::load(file.path()).unwrap();
        assert_eq!(config.opt_interval(), Some(Duration::from_secs(2)));
        assert_eq!(config.exc_stop_defer_ms, 50);
        let platform = config.platform.unwrap();
        assert_eq!(platform.len(), 2);
        assert_eq!(platform[1].kind, ResourceKind::Memory);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(opt_interval_ms: \"soon\")").unwrap();
        let err = RtrmConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        let source = std::error::Error::source(&err).expect("parse error source");
        assert!(source.is::<ron::error::SpannedError>());
        assert!(err.to_string().ends_with(&source.to_string()));
    }
}
