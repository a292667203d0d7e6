//! End-to-end exercises of the push pipeline (C1/C2/C5/C6) against a real `git` binary, in the
//! spirit of the crate's own removed `decode-index-pack` integration test: build a source
//! history with `git` itself, synthesize the reference-update request the mediator expects
//! (reusing [`mediator::build_reference_update_request`], the same helper the reactor uses to
//! replay commands), and drive it through [`push::handle_stream`] against fake collaborators.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};

use decentra_git::config::{GitConfig, NodeConfig, PoolConfig, ReactorConfig};
use decentra_git::errors::PushError;
use decentra_git::internal::object::commit::Commit;
use decentra_git::mediator::{self, UpdateCommand};
use decentra_git::node::{
    DhtClient, MergeChecker, Mempool, PushKeyKeeper, RepoState, RepoStateKeeper, Services, StorerRanking,
};
use decentra_git::policy::{Policy, PolicyLevel, PolicySubject};
use decentra_git::pool::PushPool;
use decentra_git::push;
use decentra_git::pushnote::PushEndorsement;
use decentra_git::state::{self, SnapshotFilter};
use decentra_git::token::{self, TxDetail};

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn git {args:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn init_source_repo(dir: &Path) {
    run_git(dir, &["init", "--initial-branch=master", "."]);
    run_git(dir, &["config", "user.email", "pusher@example.com"]);
    run_git(dir, &["config", "user.name", "pusher"]);
}

/// Write `name` with `contents`, stage it, and commit with a message carrying the push-token
/// armor `embedded_push_token` expects to recover, per [`Commit::push_token_armor`].
fn commit_with_embedded_token(dir: &Path, name: &str, contents: &str, token: &str, subject: &str) -> String {
    std::fs::write(dir.join(name), contents).unwrap();
    run_git(dir, &["add", name]);
    let message = format!("{subject}\n\n{}", Commit::push_token_armor(token));
    run_git(dir, &["commit", "-m", &message]);
    run_git(dir, &["rev-parse", "HEAD"])
}

fn generate_key() -> Ed25519KeyPair {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
}

fn object_list(repo_dir: &Path, commit_hash: &str) -> Vec<String> {
    run_git(repo_dir, &["rev-list", "--objects", commit_hash])
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|s| s.to_string())
        .collect()
}

struct FakeRepoState {
    contributors: Vec<String>,
    allowed_dirs: Vec<String>,
}

#[async_trait]
impl RepoStateKeeper for FakeRepoState {
    async fn get_repo(&self, _name: &str) -> Option<RepoState> {
        let policies = self
            .allowed_dirs
            .iter()
            .map(|dir| Policy {
                subject: PolicySubject::All,
                object: dir.clone(),
                action: "update".to_string(),
                level: PolicyLevel(2),
            })
            .collect();
        Some(RepoState {
            contributors: self.contributors.clone(),
            namespace: None,
            policies,
            ref_nonces: std::collections::HashMap::new(),
        })
    }
}

struct FakePushKeys {
    push_key_id: String,
    public_key: Vec<u8>,
}

#[async_trait]
impl PushKeyKeeper for FakePushKeys {
    async fn get(&self, push_key_id: &str) -> Option<Vec<u8>> {
        (push_key_id == self.push_key_id).then(|| self.public_key.clone())
    }
}

struct NoopMempool;

#[async_trait]
impl Mempool for NoopMempool {
    async fn add(&self, _note: decentra_git::pushnote::PushNote, _endorsements: Vec<PushEndorsement>) {}
}

struct NoopDht;

#[async_trait]
impl DhtClient for NoopDht {
    async fn announce(&self, _key: String) -> Result<(), String> {
        Ok(())
    }
}

struct NoopRanking;

#[async_trait]
impl StorerRanking for NoopRanking {
    async fn is_top_k(&self, _repo_name: &str, _node_pub_key: &[u8], _k: usize) -> bool {
        false
    }
}

/// None of these scenarios push a reference carrying a `mergeProposalID`, so the hook is never
/// actually consulted; it always approves.
struct NoopMergeChecker;

#[async_trait]
impl MergeChecker for NoopMergeChecker {
    async fn check(
        &self,
        _repo_name: &str,
        _merge_proposal_id: &str,
        _reference: &str,
        _old_hash: &str,
        _new_hash: &str,
    ) -> Result<(), String> {
        Ok(())
    }
}

fn test_services(repo_root: PathBuf, contributors: Vec<String>, allowed_dirs: Vec<String>, push_key_id: &str, push_key_pub: Vec<u8>) -> (Services, Arc<PushPool>) {
    let config = NodeConfig {
        git: GitConfig {
            executable: PathBuf::from("git"),
            repo_root,
        },
        pool: PoolConfig::default(),
        reactor: ReactorConfig::default(),
    };
    let pool = Arc::new(PushPool::new(config.pool.clone()));
    let node_key = generate_key();
    let services = Services {
        config: Arc::new(config),
        repo_state: Arc::new(FakeRepoState {
            contributors,
            allowed_dirs,
        }),
        push_keys: Arc::new(FakePushKeys {
            push_key_id: push_key_id.to_string(),
            public_key: push_key_pub,
        }),
        mempool: Arc::new(NoopMempool),
        dht: Arc::new(NoopDht),
        storer_ranking: Arc::new(NoopRanking),
        merge_checker: Arc::new(NoopMergeChecker),
        node_key: Arc::new(node_key),
    };
    (services, pool)
}

/// Wraps an in-memory buffer as the `AsyncRead` body `push::handle_stream` expects, the same
/// trick `protocol::http`'s own `InMemoryAsyncReader` uses to hand a fully-buffered request body
/// to the mediator.
struct InMemoryBody(std::io::Cursor<Vec<u8>>);

impl tokio::io::AsyncRead for InMemoryBody {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let n = std::io::Read::read(&mut this.0, buf.initialize_unfilled())?;
        buf.set_filled(before + n);
        std::task::Poll::Ready(Ok(()))
    }
}

const ZERO_HASH: &str = "0000000000000000000000000000000000000000";

#[tokio::test]
async fn fresh_branch_push_is_admitted_as_push_note() {
    let workdir = tempfile::tempdir().unwrap();
    let source_dir = workdir.path().join("source");
    std::fs::create_dir(&source_dir).unwrap();
    init_source_repo(&source_dir);

    let push_key = generate_key();
    // Account nonce 2, matching the fresh-branch-push scenario: empty pre-state means the
    // per-reference consensus nonce starts at 0, so the emitted reference nonce is 1 — distinct
    // from the pusher's account nonce, which is echoed verbatim.
    let detail = TxDetail::new("pk1", 2, "0.2", "refs/heads/master", None, None);
    let signed = token::sign_tx_detail(&push_key, detail);
    let token_str = token::encode_push_token(&signed);

    let commit_hash = commit_with_embedded_token(&source_dir, "README.md", "hello\n", &token_str, "initial commit");
    let objects = object_list(&source_dir, &commit_hash);

    let target_dir = workdir.path().join("target.git");
    std::fs::create_dir(&target_dir).unwrap();
    run_git(&target_dir, &["init", "--bare", "."]);

    let commands = vec![UpdateCommand {
        ref_name: "refs/heads/master".to_string(),
        old_hash: ZERO_HASH.to_string(),
        new_hash: commit_hash.clone(),
    }];
    let body = mediator::build_reference_update_request(&PathBuf::from("git"), &source_dir, &commands, &objects)
        .await
        .unwrap();

    let (services, pool) = test_services(
        workdir.path().to_path_buf(),
        vec!["pk1".to_string()],
        vec!["refs/heads".to_string()],
        "pk1",
        push_key.public_key().as_ref().to_vec(),
    );

    let reader = InMemoryBody(std::io::Cursor::new(body.to_vec()));
    let outcome = push::handle_stream(&services, &pool, "target.git", &token_str, reader)
        .await
        .expect("push should be admitted");

    assert_eq!(outcome.note.references.len(), 1);
    let reference = &outcome.note.references[0];
    assert_eq!(reference.name, "refs/heads/master");
    assert_eq!(reference.old_hash, ZERO_HASH);
    assert_eq!(reference.new_hash, commit_hash);
    assert_eq!(reference.fee, "0.2");
    // The emitted reference nonce is the per-ref consensus nonce (`repoState.refs[name].nonce +
    // 1`, here 0 + 1 since ref_nonces starts empty), not the pusher's account nonce (2).
    assert_eq!(reference.nonce, 1);
    assert_eq!(reference.pusher_account_nonce, 2);
    assert!(!reference.objects.is_empty());
    assert!(outcome.note.verify_node_signature().is_ok());
    assert_eq!(pool.len(), 1);

    let post = state::snapshot(&PathBuf::from("git"), &target_dir, SnapshotFilter::All)
        .await
        .unwrap();
    assert_eq!(post.get("refs/heads/master").map(|r| r.data.clone()), Some(commit_hash));
}

#[tokio::test]
async fn multi_ref_push_reverts_every_reference_when_one_fails() {
    let workdir = tempfile::tempdir().unwrap();
    let source_dir = workdir.path().join("source");
    std::fs::create_dir(&source_dir).unwrap();
    init_source_repo(&source_dir);

    let push_key = generate_key();

    let master_detail = TxDetail::new("pk1", 1, "0.2", "refs/heads/master", None, None);
    let master_signed = token::sign_tx_detail(&push_key, master_detail);
    let master_token_str = token::encode_push_token(&master_signed);
    let master_hash = commit_with_embedded_token(
        &source_dir,
        "master.txt",
        "master content\n",
        &master_token_str,
        "master commit",
    );

    run_git(&source_dir, &["checkout", "--orphan", "feature"]);
    run_git(&source_dir, &["rm", "-rf", "."]);

    let feature_detail = TxDetail::new("pk1", 1, "0.2", "refs/heads/feature", None, None);
    let feature_signed = token::sign_tx_detail(&push_key, feature_detail);
    // The HTTP auth token stays validly signed...
    let feature_http_token = token::encode_push_token(&feature_signed);
    // ...but the token embedded in the pushed commit is tampered, so the validator's signature
    // check on the object itself fails even though the caller authenticated correctly.
    let mut tampered = feature_signed;
    tampered.signature[0] ^= 0xff;
    let feature_embedded_token = token::encode_push_token(&tampered);
    let feature_hash = commit_with_embedded_token(
        &source_dir,
        "feature.txt",
        "feature content\n",
        &feature_embedded_token,
        "feature commit",
    );

    let mut objects = object_list(&source_dir, &master_hash);
    objects.extend(object_list(&source_dir, &feature_hash));

    let target_dir = workdir.path().join("target.git");
    std::fs::create_dir(&target_dir).unwrap();
    run_git(&target_dir, &["init", "--bare", "."]);

    let commands = vec![
        UpdateCommand {
            ref_name: "refs/heads/master".to_string(),
            old_hash: ZERO_HASH.to_string(),
            new_hash: master_hash.clone(),
        },
        UpdateCommand {
            ref_name: "refs/heads/feature".to_string(),
            old_hash: ZERO_HASH.to_string(),
            new_hash: feature_hash.clone(),
        },
    ];
    let body = mediator::build_reference_update_request(&PathBuf::from("git"), &source_dir, &commands, &objects)
        .await
        .unwrap();

    let (services, pool) = test_services(
        workdir.path().to_path_buf(),
        vec!["pk1".to_string()],
        vec!["refs/heads".to_string()],
        "pk1",
        push_key.public_key().as_ref().to_vec(),
    );

    let auth_username = format!("{master_token_str},{feature_http_token}");
    let reader = InMemoryBody(std::io::Cursor::new(body.to_vec()));
    let err = push::handle_stream(&services, &pool, "target.git", &auth_username, reader)
        .await
        .expect_err("a bad signature on one reference should fail the whole push");

    assert!(matches!(err, PushError::BadSignature(reference) if reference == "refs/heads/feature"));
    assert_eq!(pool.len(), 0, "note must not be admitted when any reference fails");

    let post = state::snapshot(&PathBuf::from("git"), &target_dir, SnapshotFilter::All)
        .await
        .unwrap();
    assert!(
        post.get("refs/heads/master").is_none(),
        "the reference that passed validation must still be reverted once its sibling failed"
    );
    assert!(post.get("refs/heads/feature").is_none());
}
