use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dispatch::ExecutionMode;
use crate::raft::RaftConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for one node. Every field has a default, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node_id: u64,
    pub cluster_size: u64,
    pub host: String,
    /// Node `i` listens on `host:base_port + i` unless `peers` says otherwise.
    pub base_port: u16,
    pub peers: BTreeMap<u64, String>,
    pub byzantine: bool,
    pub majority_vote: bool,
    pub update_system: bool,
    pub tick_interval_ms: u64,
    pub election_jitter_ms: u64,
    pub rpc_timeout_ms: u64,
    pub extended_rpc_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: 1,
            cluster_size: 3,
            host: "127.0.0.1".to_string(),
            base_port: 8000,
            peers: BTreeMap::new(),
            byzantine: false,
            majority_vote: false,
            update_system: false,
            tick_interval_ms: 5000,
            election_jitter_ms: 1000,
            rpc_timeout_ms: 200,
            extended_rpc_timeout_ms: 300,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Initial cluster membership: the explicit peer map if one is given,
    /// otherwise `cluster_size` nodes on consecutive ports.
    pub fn addresses(&self) -> Result<BTreeMap<u64, String>, ConfigError> {
        if !self.peers.is_empty() {
            return Ok(self.peers.clone());
        }
        (1..=self.cluster_size)
            .map(|id| {
                let port = u64::from(self.base_port) + id;
                if port > u64::from(u16::MAX) {
                    return Err(ConfigError::Invalid(format!(
                        "node {id} would listen on port {port}"
                    )));
                }
                Ok((id, format!("{}:{}", self.host, port)))
            })
            .collect()
    }

    pub fn self_address(&self) -> Result<String, ConfigError> {
        self.addresses()?
            .remove(&self.node_id)
            .ok_or_else(|| {
                ConfigError::Invalid(format!("node {} is not a cluster member", self.node_id))
            })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.is_empty() && self.cluster_size == 0 {
            return Err(ConfigError::Invalid("cluster_size must be at least 1".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be positive".into()));
        }
        if self.rpc_timeout_ms == 0 || self.extended_rpc_timeout_ms == 0 {
            return Err(ConfigError::Invalid("RPC timeouts must be positive".into()));
        }

        let addresses = self.addresses()?;
        if !addresses.contains_key(&self.node_id) {
            return Err(ConfigError::Invalid(format!(
                "node {} is not a cluster member",
                self.node_id
            )));
        }
        let mut seen = HashSet::new();
        for (id, addr) in &addresses {
            if !seen.insert(addr.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "address {addr} of node {id} is used twice"
                )));
            }
        }
        Ok(())
    }

    pub fn raft_config(&self) -> Result<RaftConfig, ConfigError> {
        self.validate()?;
        let mut raft = RaftConfig::new(self.node_id, &self.self_address()?);
        for (id, addr) in self.addresses()? {
            raft.add_peer(id, &addr);
        }
        raft.tick_interval_ms = self.tick_interval_ms;
        raft.election_jitter_ms = self.election_jitter_ms;
        raft.rpc_timeout_ms = self.rpc_timeout_ms;
        raft.update_system = self.update_system;
        Ok(raft)
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.majority_vote {
            ExecutionMode::MajorityVote
        } else {
            ExecutionMode::Single
        }
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.extended_rpc_timeout_ms)
    }
}

/// Parses `1=127.0.0.1:8001,2=127.0.0.1:8002` into a peer map.
pub fn parse_peers(raw: &str) -> Result<BTreeMap<u64, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| -> Result<(u64, String), ConfigError> {
            let (id, addr) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::Invalid(format!("peer `{entry}` is not id=addr")))?;
            let id = id
                .trim()
                .parse::<u64>()
                .map_err(|e| ConfigError::Invalid(format!("peer id `{id}`: {e}")))?;
            Ok((id, addr.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_describe_a_three_node_local_cluster() {
        let cfg = Config::default();
        assert_eq!(cfg.cluster_size, 3);
        assert_eq!(cfg.tick_interval_ms, 5000);
        assert_eq!(cfg.rpc_timeout_ms, 200);
        assert_eq!(cfg.extended_rpc_timeout_ms, 300);
        assert_eq!(cfg.execution_mode(), ExecutionMode::Single);

        let addrs = cfg.addresses().expect("addresses");
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[&1], "127.0.0.1:8001");
        assert_eq!(addrs[&3], "127.0.0.1:8003");
        assert_eq!(cfg.self_address().expect("self"), "127.0.0.1:8001");
    }

    #[test]
    fn explicit_peers_override_port_layout() {
        let cfg = Config {
            node_id: 2,
            peers: parse_peers("1=10.0.0.1:9000, 2=10.0.0.2:9000").expect("peers"),
            ..Config::default()
        };
        cfg.validate().expect("valid");
        let raft = cfg.raft_config().expect("raft config");
        assert_eq!(raft.address, "10.0.0.2:9000");
        assert_eq!(raft.peers.len(), 2);
    }

    #[test]
    fn validate_rejects_bad_membership() {
        let outsider = Config {
            node_id: 4,
            ..Config::default()
        };
        assert!(matches!(outsider.validate(), Err(ConfigError::Invalid(_))));

        let empty = Config {
            cluster_size: 0,
            ..Config::default()
        };
        assert!(empty.validate().is_err());

        let duplicate = Config {
            peers: parse_peers("1=a:1,2=a:1").expect("peers"),
            ..Config::default()
        };
        assert!(duplicate.validate().is_err());

        let overflow = Config {
            base_port: u16::MAX,
            ..Config::default()
        };
        assert!(overflow.addresses().is_err());
    }

    #[test]
    fn parse_peers_rejects_malformed_entries() {
        assert!(parse_peers("1:127.0.0.1:8001").is_err());
        assert!(parse_peers("one=127.0.0.1:8001").is_err());
        assert!(parse_peers("").expect("empty").is_empty());
    }

    #[test]
    fn load_reads_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{"node_id": 5, "cluster_size": 5, "majority_vote": true, "byzantine": true}}"#
        )
        .expect("write");

        let cfg = Config::load(file.path()).expect("load");
        assert_eq!(cfg.node_id, 5);
        assert!(cfg.byzantine);
        assert_eq!(cfg.execution_mode(), ExecutionMode::MajorityVote);
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.self_address().expect("self"), "127.0.0.1:8005");
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = Config::load(dir.path().join("nope.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").expect("write");
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse(_))));
    }
}
