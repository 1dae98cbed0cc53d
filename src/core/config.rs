use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

fn default_max_clientid_len() -> usize {
    1024
}

fn default_cache_acl() -> bool {
    true
}

fn default_retry_interval_secs() -> u64 {
    30
}

/// Per-connection protocol options.
///
/// The host broker builds one of these (usually once, cloned per session)
/// and hands it to `Session::new`. Loading from files, flags, or the
/// environment is the host's concern.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// Upper bound on the CONNECT client identifier, in bytes.
    #[serde(default = "default_max_clientid_len")]
    pub max_clientid_len: usize,
    /// Memoize publish ACL decisions per session, keyed by topic name.
    #[serde(default = "default_cache_acl")]
    pub cache_acl: bool,
    /// Seconds between retransmissions of an unacknowledged QoS 1 publish.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Opaque headers captured from a websocket upgrade, passed through untouched.
    #[serde(default)]
    pub ws_initial_headers: Vec<(String, String)>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_clientid_len: default_max_clientid_len(),
            cache_acl: default_cache_acl(),
            retry_interval_secs: default_retry_interval_secs(),
            ws_initial_headers: Vec::new(),
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_clientid_len == 0 {
            bail!("max_clientid_len must be greater than zero");
        }
        if self.retry_interval_secs == 0 {
            bail!("retry_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}
