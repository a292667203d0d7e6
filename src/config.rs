//! Configuration surface for the node. Every parameter the spec calls out as "sourced from
//! consensus, not hard-coded" (quorum size, top-K storer count, pool capacity and TTL) lives
//! here as plain data, never as a constant baked into [`crate::pool`] or [`crate::reactor`].

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Path to, and invocation defaults for, the external `git` executable.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GitConfig {
    /// Path to the `git` binary, or a bare name to resolve via `PATH`.
    pub executable: PathBuf,
    /// Root directory under which repositories (by name) live on disk.
    pub repo_root: PathBuf,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("git"),
            repo_root: PathBuf::from("repos"),
        }
    }
}

/// Push pool sizing and eviction parameters. The spec's Open Questions list these as
/// consensus-sourced, not compiled-in constants: `NodeConfig::pool` is populated from the
/// consensus layer's parameters at startup, not hand-picked here.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of push notes resident in the pool at once (`N` in the spec).
    pub capacity: usize,
    /// How long an admitted note may sit in the pool before TTL eviction (`T` in the spec).
    #[serde(deserialize_with = "string_or_duration_secs")]
    pub ttl: Duration,
    /// Interval of the background sweeper that evicts expired notes.
    #[serde(deserialize_with = "string_or_duration_secs")]
    pub clean_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(3600),
            clean_interval: Duration::from_secs(60),
        }
    }
}

/// Reactor quorum and anti-duplication cache sizing.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReactorConfig {
    /// Minimum distinct endorsements required before a note is promoted (`Q` in the spec).
    pub quorum_size: usize,
    /// Number of top storer nodes (by the consensus layer's ranking) expected to endorse.
    pub top_k_storers: usize,
    /// Capacity of each anti-duplication LRU cache (note senders, endorsement senders,
    /// cached endorsements).
    pub cache_capacity: usize,
    /// Per-entry TTL for the anti-duplication caches.
    #[serde(deserialize_with = "string_or_duration_secs")]
    pub cache_ttl: Duration,
    /// Hard per-object deadline for DHT announce calls.
    #[serde(deserialize_with = "string_or_duration_secs")]
    pub dht_announce_timeout: Duration,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            quorum_size: 3,
            top_k_storers: 5,
            cache_capacity: 4096,
            cache_ttl: Duration::from_secs(600),
            dht_announce_timeout: Duration::from_secs(60),
        }
    }
}

/// Top-level node configuration: the composition of every ambient parameter the push
/// pipeline, pool, and reactor need, sourced at startup from the node's own config file plus
/// whatever the consensus layer reports.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct NodeConfig {
    pub git: GitConfig,
    pub pool: PoolConfig,
    pub reactor: ReactorConfig,
}

fn string_or_duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrU64 {
        String(String),
        U64(u64),
    }

    let secs = match StringOrU64::deserialize(deserializer)? {
        StringOrU64::String(v) => v
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid duration `{v}`: {e}")))?,
        StringOrU64::U64(v) => v,
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = NodeConfig::default();
        assert!(cfg.pool.capacity > 0);
        assert!(cfg.reactor.quorum_size <= cfg.reactor.top_k_storers);
    }

    #[test]
    fn duration_deserializes_from_either_shape() {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(deserialize_with = "string_or_duration_secs")]
            d: Duration,
        }
        let from_str: Wrapper = serde_json::from_str(r#"{"d":"30"}"#).unwrap();
        let from_num: Wrapper = serde_json::from_str(r#"{"d":30}"#).unwrap();
        assert_eq!(from_str.d, Duration::from_secs(30));
        assert_eq!(from_num.d, Duration::from_secs(30));
    }
}
