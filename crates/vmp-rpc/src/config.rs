//! Configuration for the RPC manager.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for an [`RpcManager`](crate::RpcManager).
///
/// ```rust
/// use std::time::Duration;
/// use vmp_rpc::RpcConfig;
///
/// let config = RpcConfig {
///     default_timeout: Duration::from_secs(5),
///     ..RpcConfig::default()
/// };
/// assert_eq!(config.id_prefix, "rpc-");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Timeout for calls that don't specify one.
    ///
    /// Default: 30 seconds.
    pub default_timeout: Duration,

    /// Prepended to every correlation id so they're easy to spot in logs.
    ///
    /// Default: `"rpc-"`.
    pub id_prefix: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            id_prefix: "rpc-".to_owned(),
        }
    }
}
