//! Capability wiring for the node.
//!
//! The source this spec is drawn from has a `Manager` that reaches into every component and
//! vice versa (see spec §9). Here that cycle is broken: [`Services`] is a small capability
//! record built once at startup and cloned into each component's constructor; no component
//! holds, or depends on, a [`Node`]. `Node` itself only exists to own the long-lived component
//! handles (pool, reactor) for the process that wires everything together (the HTTP front,
//! typically).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use ring::signature::Ed25519KeyPair;

use crate::config::NodeConfig;
use crate::policy::Policy;
use crate::pool::PushPool;
use crate::pushnote::PushNote;
use crate::reactor::Reactor;

/// A repository's contributors, effective policies, and per-reference nonce counters, as
/// maintained by the external consensus layer. The node reads this; it never mutates it
/// directly.
#[derive(Debug, Clone)]
pub struct RepoState {
    pub contributors: Vec<String>,
    pub namespace: Option<String>,
    pub policies: Vec<Policy>,
    /// Per-reference nonce, keyed by full ref name.
    pub ref_nonces: std::collections::HashMap<String, u64>,
}

/// `RepoStateKeeper.GetRepo(name) → {...}` (spec §6).
#[async_trait]
pub trait RepoStateKeeper: Send + Sync {
    async fn get_repo(&self, name: &str) -> Option<RepoState>;
}

/// `PushKeyKeeper.Get(id) → { pubKey, isNil }` (spec §6). Returns `None` for an unknown id
/// rather than modeling `isNil` as a separate field.
#[async_trait]
pub trait PushKeyKeeper: Send + Sync {
    async fn get(&self, push_key_id: &str) -> Option<Vec<u8>>;
}

/// Mempool events the event loop (C10) subscribes to.
#[derive(Debug, Clone)]
pub enum MempoolEvent {
    TxAdded([u8; 32]),
    TxRemoved([u8; 32]),
    TxRejected([u8; 32]),
    TxCommitted(PushNote),
}

/// `Mempool.Add(pushTx)` plus the `TxAdded|TxRemoved|TxRejected|TxCommitted` event stream
/// (spec §6).
#[async_trait]
pub trait Mempool: Send + Sync {
    async fn add(&self, note: PushNote, endorsements: Vec<crate::pushnote::PushEndorsement>);
}

/// `DHT.Announce(key, ctx)`, `DHT.Find(key)` (spec §6). `key` is `<repoName>/<hex40-hash>`.
#[async_trait]
pub trait DhtClient: Send + Sync {
    async fn announce(&self, key: String) -> Result<(), String>;
}

/// The consensus layer's current ranking of storer nodes for a repository, used by the
/// reactor to decide whether this node should endorse (top-K gating, spec §4.8).
#[async_trait]
pub trait StorerRanking: Send + Sync {
    async fn is_top_k(&self, repo_name: &str, node_pub_key: &[u8], k: usize) -> bool;
}

/// The merge-compliance hook (spec §4.6, §9 open question): when a reference update's `TxDetail`
/// carries a `mergeProposalID`, the update must correspond to that proposal's declared base,
/// target, and hashes. The proposal record itself lives behind the consensus interface — this
/// node only calls the hook and acts on its verdict, per the spec's explicit note that the fetch
/// path is left to that interface.
#[async_trait]
pub trait MergeChecker: Send + Sync {
    async fn check(
        &self,
        repo_name: &str,
        merge_proposal_id: &str,
        reference: &str,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<(), String>;
}

/// Capability bundle passed by value (as an `Arc`-cloned record) into every component that
/// needs an external collaborator. Components depend on this, never on [`Node`].
#[derive(Clone)]
pub struct Services {
    pub config: Arc<NodeConfig>,
    pub repo_state: Arc<dyn RepoStateKeeper>,
    pub push_keys: Arc<dyn PushKeyKeeper>,
    pub mempool: Arc<dyn Mempool>,
    pub dht: Arc<dyn DhtClient>,
    pub storer_ranking: Arc<dyn StorerRanking>,
    pub merge_checker: Arc<dyn MergeChecker>,
    pub node_key: Arc<Ed25519KeyPair>,
}

impl Services {
    pub fn git_bin(&self) -> PathBuf {
        self.config.git.executable.clone()
    }

    pub fn repo_dir(&self, repo_name: &str) -> PathBuf {
        crate::state::repo_path(&self.config.git.repo_root, repo_name)
    }
}

/// Owns the long-lived component handles built from one [`Services`] instance. Holds no
/// business logic of its own — it is a wiring point, not a god object.
pub struct Node {
    pub services: Services,
    pub pool: Arc<PushPool>,
    pub reactor: Arc<Reactor>,
}

impl Node {
    pub fn new(services: Services) -> Self {
        let pool = Arc::new(PushPool::new(services.config.pool.clone()));
        let reactor = Arc::new(Reactor::new(services.clone(), pool.clone()));
        Self {
            services,
            pool,
            reactor,
        }
    }
}
