//! Configuration and tunables
//!
//! All timing, fan-out, and lifecycle tunables live here with
//! compile-time defaults; a TOML file may override any of them. The
//! catalog and query-parsing limits are fixed constants and are not
//! configurable.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Presentation mode served by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Browser-driven: start page + incremental JSON polling
    Javascript,
    /// Single-shot synchronous HTML results page
    Text,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Presentation mode
    pub mode: Mode,
    /// SQLite database path for the result store
    pub database_path: String,

    /// Per-port TCP connect deadline, seconds
    pub tcp_timeout_secs: u64,
    /// Per-port UDP response deadline, seconds
    pub udp_timeout_secs: u64,
    /// ICMPv6 echo reply deadline, seconds
    pub icmpv6_timeout_secs: u64,

    /// Maximum concurrent TCP probe workers
    pub max_tcp_children: usize,
    /// Contiguous ports handed to one TCP worker
    pub max_tcp_ports_per_child: usize,
    /// Maximum concurrent UDP probe workers
    pub max_udp_children: usize,
    /// Contiguous ports handed to one UDP worker
    pub max_udp_ports_per_child: usize,

    /// Seconds after scan start before results are force-deleted
    pub delete_timeout_secs: u64,
    /// Poll interval while waiting for the client to signal completion
    pub teststate_poll_secs: u64,
    /// Grace period before deletion, letting late JSON polls subside
    pub delete_wait_secs: u64,
    /// Age beyond which `tidy` purges stored rows
    pub retention_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Javascript,
            database_path: "ipscan.db".to_string(),
            tcp_timeout_secs: 1,
            udp_timeout_secs: 1,
            icmpv6_timeout_secs: 1,
            max_tcp_children: 8,
            max_tcp_ports_per_child: 8,
            max_udp_children: 4,
            max_udp_ports_per_child: 4,
            delete_timeout_secs: 300,
            teststate_poll_secs: 2,
            delete_wait_secs: 10,
            retention_secs: 900,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;
        Self::load_from_str(&contents)
    }

    /// Load configuration from a TOML string
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.tcp_timeout_secs == 0 || self.udp_timeout_secs == 0 || self.icmpv6_timeout_secs == 0
        {
            return Err(Error::Config(
                "probe timeouts must be greater than 0".to_string(),
            ));
        }
        if self.max_tcp_children == 0 || self.max_udp_children == 0 {
            return Err(Error::Config(
                "worker fan-out caps must be greater than 0".to_string(),
            ));
        }
        if self.max_tcp_ports_per_child == 0 || self.max_udp_ports_per_child == 0 {
            return Err(Error::Config(
                "ports-per-worker chunks must be greater than 0".to_string(),
            ));
        }
        if self.teststate_poll_secs == 0 {
            return Err(Error::Config(
                "teststate_poll_secs must be greater than 0".to_string(),
            ));
        }
        if self.delete_timeout_secs < self.teststate_poll_secs {
            return Err(Error::Config(
                "delete_timeout_secs must cover at least one poll interval".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }

    pub fn udp_timeout(&self) -> Duration {
        Duration::from_secs(self.udp_timeout_secs)
    }

    pub fn icmpv6_timeout(&self) -> Duration {
        Duration::from_secs(self.icmpv6_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_from_str_overrides() {
        let config = Config::load_from_str(
            r#"
            mode = "text"
            tcp_timeout_secs = 2
            max_tcp_children = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, Mode::Text);
        assert_eq!(config.tcp_timeout_secs, 2);
        assert_eq!(config.max_tcp_children, 16);
        // Unlisted fields keep their defaults
        assert_eq!(config.udp_timeout_secs, 1);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = Config::load_from_str("tcp_timeout_secs = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_fanout_rejected() {
        let result = Config::load_from_str("max_udp_children = 0");
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_timeout_covers_poll() {
        let result = Config::load_from_str(
            r#"
            delete_timeout_secs = 1
            teststate_poll_secs = 2
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_toml_rejected() {
        assert!(Config::load_from_str("mode = 7").is_err());
    }
}
