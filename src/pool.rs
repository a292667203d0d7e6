//! Push pool (C7): a fee-prioritized pool keyed by note id, with a per-(repo, ref) uniqueness
//! constraint, replace-by-fee semantics, and TTL eviction.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::errors::PushError;
use crate::pushnote::PushNote;

/// A pool-resident note plus its derived ordering fields.
#[derive(Debug, Clone)]
struct Item {
    note: PushNote,
    fee_rate: f64,
    time_added: Instant,
}

#[derive(Default)]
struct Indexes {
    /// The ordered container; index into this vec is not stable across removals, so every
    /// other index stores note ids, and `by_id` is consulted for the authoritative item.
    container: Vec<[u8; 32]>,
    by_id: HashMap<[u8; 32], Item>,
    /// (repo, ref) -> note id currently staged for that reference.
    by_ref: HashMap<(String, String), [u8; 32]>,
    /// (repo, ref) -> nonce currently staged for that reference.
    ref_nonce: HashMap<(String, String), u64>,
    by_repo: HashMap<String, Vec<[u8; 32]>>,
}

/// Fee-prioritized, per-reference pool described in spec §4.7.
pub struct PushPool {
    config: PoolConfig,
    indexes: RwLock<Indexes>,
}

impl PushPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            indexes: RwLock::new(Indexes::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.indexes.read().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, id: &[u8; 32]) -> bool {
        self.indexes.read().unwrap().by_id.contains_key(id)
    }

    pub fn get(&self, id: &[u8; 32]) -> Option<PushNote> {
        self.indexes
            .read()
            .unwrap()
            .by_id
            .get(id)
            .map(|item| item.note.clone())
    }

    pub fn repo_has_note(&self, repo: &str) -> bool {
        self.indexes
            .read()
            .unwrap()
            .by_repo
            .get(repo)
            .is_some_and(|ids| !ids.is_empty())
    }

    /// `Add(note, skipValidate=false)`. The `validate` closure stands in for "run note
    /// validator"; `skip_validate = true` is used by the reactor, which has already run the
    /// full receive-pack validation pipeline before admitting.
    pub fn add(
        &self,
        note: PushNote,
        skip_validate: bool,
        validate: impl FnOnce(&PushNote) -> Result<(), String>,
    ) -> Result<(), PushError> {
        let id = note.id();
        let mut indexes = self.indexes.write().unwrap();

        if indexes.by_id.len() >= self.config.capacity && !indexes.by_id.contains_key(&id) {
            return Err(PushError::FullPool);
        }
        if indexes.by_id.contains_key(&id) {
            return Err(PushError::DuplicateNote(note.id_hex()));
        }

        let mut replaceables: Vec<[u8; 32]> = Vec::new();
        for reference in &note.references {
            let key = (note.repo_name.clone(), reference.name.clone());
            if let Some(existing_id) = indexes.by_ref.get(&key) {
                let existing_nonce = *indexes.ref_nonce.get(&key).unwrap_or(&0);
                if existing_nonce > reference.nonce {
                    return Err(PushError::StalerNonceAlreadyStaged(reference.name.clone()));
                }
                if existing_nonce == reference.nonce {
                    let existing_fee = indexes
                        .by_id
                        .get(existing_id)
                        .map(|i| i.note.total_fee())
                        .unwrap_or(0.0);
                    if existing_fee >= note.total_fee() {
                        return Err(PushError::InferiorFeeRBF(reference.name.clone()));
                    }
                }
                replaceables.push(*existing_id);
            }
        }

        if !replaceables.is_empty() {
            let replaced_total: f64 = replaceables
                .iter()
                .filter_map(|id| indexes.by_id.get(id))
                .map(|i| i.note.total_fee())
                .sum();
            if note.total_fee() <= replaced_total {
                return Err(PushError::InferiorFeeRBF(note.repo_name.clone()));
            }
        }

        if !skip_validate {
            validate(&note).map_err(PushError::InvalidNote)?;
        }

        for old_id in &replaceables {
            remove_locked(&mut indexes, old_id);
        }

        let fee_rate = note.fee_rate();
        let repo = note.repo_name.clone();
        for reference in &note.references {
            let key = (repo.clone(), reference.name.clone());
            indexes.by_ref.insert(key.clone(), id);
            indexes.ref_nonce.insert(key, reference.nonce);
        }
        indexes.by_repo.entry(repo).or_default().push(id);
        indexes.container.push(id);
        indexes.by_id.insert(
            id,
            Item {
                note,
                fee_rate,
                time_added: Instant::now(),
            },
        );

        Ok(())
    }

    pub fn remove(&self, note: &PushNote) {
        let mut indexes = self.indexes.write().unwrap();
        remove_locked(&mut indexes, &note.id());
    }

    pub fn remove_by_id(&self, id: &[u8; 32]) {
        let mut indexes = self.indexes.write().unwrap();
        remove_locked(&mut indexes, id);
    }

    /// Sweep items where `now − timeAdded ≥ T`. Intended to be called by a single periodic
    /// sweeper task (spec §9: "cooperative pool TTL... avoid per-item timers").
    pub fn remove_old(&self) -> usize {
        let ttl: Duration = self.config.ttl;
        let mut indexes = self.indexes.write().unwrap();
        let expired: Vec<[u8; 32]> = indexes
            .by_id
            .iter()
            .filter(|(_, item)| item.time_added.elapsed() >= ttl)
            .map(|(id, _)| *id)
            .collect();
        let count = expired.len();
        for id in expired {
            remove_locked(&mut indexes, &id);
        }
        count
    }

    /// The fee rate recorded for `id`, if present — exposed for tests asserting RBF ordering.
    pub fn fee_rate_of(&self, id: &[u8; 32]) -> Option<f64> {
        self.indexes.read().unwrap().by_id.get(id).map(|i| i.fee_rate)
    }
}

fn remove_locked(indexes: &mut Indexes, id: &[u8; 32]) {
    let Some(item) = indexes.by_id.remove(id) else {
        return;
    };
    indexes.container.retain(|existing| existing != id);
    for reference in &item.note.references {
        let key = (item.note.repo_name.clone(), reference.name.clone());
        if indexes.by_ref.get(&key) == Some(id) {
            indexes.by_ref.remove(&key);
            indexes.ref_nonce.remove(&key);
        }
    }
    if let Some(ids) = indexes.by_repo.get_mut(&item.note.repo_name) {
        ids.retain(|existing| existing != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pushnote::ReferenceUpdate;

    fn note(repo: &str, reference: &str, nonce: u64, fee: &str) -> PushNote {
        let mut n = PushNote::new(
            repo.to_string(),
            vec![ReferenceUpdate {
                name: reference.to_string(),
                old_hash: "0".repeat(40),
                new_hash: "c".repeat(40),
                nonce,
                fee: fee.to_string(),
                signature: vec![],
                pusher_account_nonce: nonce,
                objects: vec!["c".repeat(40)],
            }],
            "pk1".to_string(),
            0,
        );
        n.set_size(100);
        n
    }

    fn pool(capacity: usize) -> PushPool {
        PushPool::new(PoolConfig {
            capacity,
            ttl: Duration::from_secs(3600),
            clean_interval: Duration::from_secs(60),
        })
    }

    #[test]
    fn admits_and_reports_by_id() {
        let p = pool(10);
        let n = note("repo", "refs/heads/master", 1, "0.2");
        let id = n.id();
        p.add(n, false, |_| Ok(())).unwrap();
        assert!(p.has(&id));
        assert_eq!(p.len(), 1);
        assert!(p.repo_has_note("repo"));
    }

    #[test]
    fn rejects_duplicate_note() {
        let p = pool(10);
        let n = note("repo", "refs/heads/master", 1, "0.2");
        p.add(n.clone(), false, |_| Ok(())).unwrap();
        let err = p.add(n, false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, PushError::DuplicateNote(_)));
    }

    #[test]
    fn higher_fee_displaces_lower_at_same_nonce() {
        let p = pool(10);
        let a = note("repo", "refs/heads/master", 1, "0.2");
        let a_id = a.id();
        p.add(a, false, |_| Ok(())).unwrap();

        let b = note("repo", "refs/heads/master", 1, "0.5");
        let b_id = b.id();
        p.add(b, false, |_| Ok(())).unwrap();

        assert!(!p.has(&a_id));
        assert!(p.has(&b_id));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn equal_fee_at_same_nonce_is_inferior_rbf() {
        let p = pool(10);
        let a = note("repo", "refs/heads/master", 1, "0.2");
        p.add(a, false, |_| Ok(())).unwrap();

        let b = note("repo", "refs/heads/master", 1, "0.2");
        let err = p.add(b, false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, PushError::InferiorFeeRBF(_)));
    }

    #[test]
    fn higher_nonce_already_staged_blocks_lower_nonce_arrival() {
        let p = pool(10);
        let a = note("repo", "refs/heads/master", 5, "0.2");
        p.add(a, false, |_| Ok(())).unwrap();

        let b = note("repo", "refs/heads/master", 1, "0.9");
        let err = p.add(b, false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, PushError::StalerNonceAlreadyStaged(_)));
    }

    #[test]
    fn pool_never_exceeds_capacity() {
        let p = pool(1);
        let a = note("repo", "refs/heads/a", 1, "0.2");
        p.add(a, false, |_| Ok(())).unwrap();
        let b = note("repo", "refs/heads/b", 1, "0.2");
        let err = p.add(b, false, |_| Ok(())).unwrap_err();
        assert!(matches!(err, PushError::FullPool));
    }

    #[test]
    fn remove_old_evicts_expired_items() {
        let p = PushPool::new(PoolConfig {
            capacity: 10,
            ttl: Duration::from_millis(1),
            clean_interval: Duration::from_secs(60),
        });
        let n = note("repo", "refs/heads/master", 1, "0.2");
        let id = n.id();
        p.add(n, false, |_| Ok(())).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let removed = p.remove_old();
        assert_eq!(removed, 1);
        assert!(!p.has(&id));
    }

    #[test]
    fn different_refs_do_not_conflict() {
        let p = pool(10);
        let a = note("repo", "refs/heads/a", 1, "0.2");
        let b = note("repo", "refs/heads/b", 1, "0.2");
        p.add(a, false, |_| Ok(())).unwrap();
        p.add(b, false, |_| Ok(())).unwrap();
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn skip_validate_bypasses_validator() {
        let p = pool(10);
        let n = note("repo", "refs/heads/master", 1, "0.2");
        p.add(n, true, |_| Err("would have failed".to_string()))
            .unwrap();
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn remove_drops_all_indexes() {
        let p = pool(10);
        let n = note("repo", "refs/heads/master", 1, "0.2");
        p.add(n.clone(), false, |_| Ok(())).unwrap();
        p.remove(&n);
        assert!(!p.has(&n.id()));
        assert!(!p.repo_has_note("repo"));
    }
}
