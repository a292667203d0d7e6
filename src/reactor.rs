//! Reactor (C8): the P2P side of the push pipeline. Deduplicates inbound notes and
//! endorsements against small TTL'd caches, re-validates and admits inbound notes, and tracks
//! endorsements toward quorum before handing a promoted note to the mempool.
//!
//! Building and sending the actual wire bytes to peers is a transport concern this crate leaves
//! to its caller — [`Reactor::build_broadcast_payload`] returns the reference-update-request
//! bytes a transport would fan out; no peer-to-peer transport crate is pulled in here (none of
//! the source material this crate is grounded on commits to one at this layer either).

use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use dashmap::DashMap;

use crate::errors::PushError;
use crate::mediator::{self, UpdateCommand};
use crate::node::Services;
use crate::pool::PushPool;
use crate::pushnote::{PushEndorsement, PushNote};
use crate::token;

type NoteSenderKey = ([u8; 32], Vec<u8>);

/// P2P note/endorsement deduplication and quorum tracking, built from one [`Services`] and the
/// node's [`PushPool`].
pub struct Reactor {
    services: Services,
    pool: Arc<PushPool>,
    note_senders: DashMap<NoteSenderKey, Instant>,
    endorsement_senders: DashMap<NoteSenderKey, Instant>,
    endorsements: DashMap<[u8; 32], Vec<PushEndorsement>>,
}

impl Reactor {
    pub fn new(services: Services, pool: Arc<PushPool>) -> Self {
        Self {
            services,
            pool,
            note_senders: DashMap::new(),
            endorsement_senders: DashMap::new(),
            endorsements: DashMap::new(),
        }
    }

    fn cache_ttl(&self) -> std::time::Duration {
        self.services.config.reactor.cache_ttl
    }

    fn cache_capacity(&self) -> usize {
        self.services.config.reactor.cache_capacity
    }

    /// Evict stale entries and, if still over capacity, the single oldest entry — keeps the
    /// anti-duplication caches small without a background sweeper of their own.
    fn touch(map: &DashMap<NoteSenderKey, Instant>, ttl: std::time::Duration, capacity: usize, key: NoteSenderKey) -> bool {
        let now = Instant::now();
        map.retain(|_, seen_at| now.duration_since(*seen_at) < ttl);

        if map.contains_key(&key) {
            return true;
        }

        if map.len() >= capacity {
            if let Some(oldest_key) = map
                .iter()
                .min_by_key(|entry| *entry.value())
                .map(|entry| entry.key().clone())
            {
                map.remove(&oldest_key);
            }
        }
        map.insert(key, now);
        false
    }

    fn seen_note(&self, note_id: [u8; 32], sender: &[u8]) -> bool {
        Self::touch(
            &self.note_senders,
            self.cache_ttl(),
            self.cache_capacity(),
            (note_id, sender.to_vec()),
        )
    }

    fn seen_endorsement(&self, note_id: [u8; 32], sender: &[u8]) -> bool {
        Self::touch(
            &self.endorsement_senders,
            self.cache_ttl(),
            self.cache_capacity(),
            (note_id, sender.to_vec()),
        )
    }

    /// Re-validate and admit a note received from a peer. A no-op (not an error) if this
    /// `(note, sender)` pair was already seen, or the note is already pooled.
    pub async fn handle_inbound_note(&self, note: PushNote, sender_pub_key: &[u8]) -> Result<(), PushError> {
        let note_id = note.id();
        if self.seen_note(note_id, sender_pub_key) {
            return Ok(());
        }
        if self.pool.has(&note_id) {
            return Ok(());
        }

        note.verify_node_signature()?;

        let git_bin = self.services.git_bin();
        let repo_dir = self.services.repo_dir(&note.repo_name);

        for reference in &note.references {
            if reference.is_delete() {
                continue;
            }
            let Some(kind) = crate::state::RefKind::from_ref_name(&reference.name) else {
                return Err(PushError::MalformedRef(reference.name.clone()));
            };
            let embedded = crate::validator::recover_tx_detail(&git_bin, &repo_dir, kind, &reference.new_hash).await?;
            let push_key_pub = self
                .services
                .push_keys
                .get(&embedded.push_key_id)
                .await
                .ok_or_else(|| PushError::UnknownPushKey(embedded.push_key_id.clone()))?;
            token::verify_tx_detail(&embedded, &push_key_pub)?;
            if embedded.push_key_id != note.push_key_id || embedded.nonce != reference.pusher_account_nonce {
                return Err(PushError::TxDetailMismatch(
                    reference.name.clone(),
                    "embedded token disagrees with relayed reference update".to_string(),
                ));
            }
        }

        let commands: Vec<UpdateCommand> = note
            .references
            .iter()
            .map(|r| UpdateCommand {
                ref_name: r.name.clone(),
                old_hash: r.old_hash.clone(),
                new_hash: r.new_hash.clone(),
            })
            .collect();
        let objects: Vec<String> = note.references.iter().flat_map(|r| r.objects.clone()).collect();
        let body = mediator::build_reference_update_request(&git_bin, &repo_dir, &commands, &objects).await?;

        let outcome = mediator::drive_receive_pack(&git_bin, &repo_dir, &body[..]).await?;
        if !outcome.exit_success {
            return Err(PushError::GitSubprocessFailure(
                "replaying relayed push note failed".to_string(),
            ));
        }

        self.pool.add(note, true, |_| Ok(()))?;
        Ok(())
    }

    /// Record an endorsement from a peer and promote its note if quorum is now reached.
    pub async fn handle_inbound_endorsement(&self, endorsement: PushEndorsement) -> Result<(), PushError> {
        if self.seen_endorsement(endorsement.push_note_id, &endorsement.sender_pub_key) {
            return Ok(());
        }
        endorsement.verify()?;

        let note_id = endorsement.push_note_id;
        self.endorsements.entry(note_id).or_insert_with(Vec::new).push(endorsement);

        self.maybe_promote(note_id).await
    }

    /// `MaybePromote`: once a note's distinct-sender endorsement count reaches quorum, sort
    /// endorsements by sender public key (deterministic ordering across nodes) and hand the note
    /// to the mempool.
    async fn maybe_promote(&self, note_id: [u8; 32]) -> Result<(), PushError> {
        let quorum = self.services.config.reactor.quorum_size;

        let mut endorsements = match self.endorsements.get(&note_id) {
            Some(entry) => entry.value().clone(),
            None => return Ok(()),
        };
        endorsements.sort_by(|a, b| a.sender_pub_key.cmp(&b.sender_pub_key));
        endorsements.dedup_by(|a, b| a.sender_pub_key == b.sender_pub_key);

        if endorsements.len() < quorum {
            return Ok(());
        }

        let Some(note) = self.pool.get(&note_id) else {
            return Ok(());
        };

        self.services.mempool.add(note.clone(), endorsements).await;
        self.pool.remove_by_id(&note_id);
        self.endorsements.remove(&note_id);
        Ok(())
    }

    /// Whether this node should endorse a note for `repo_name`, per the consensus layer's
    /// current top-K storer ranking.
    pub async fn should_endorse(&self, repo_name: &str, node_pub_key: &[u8]) -> bool {
        self.services
            .storer_ranking
            .is_top_k(repo_name, node_pub_key, self.services.config.reactor.top_k_storers)
            .await
    }

    /// Build the wire bytes a transport would fan out to broadcast `note`'s objects to peers.
    pub async fn build_broadcast_payload(&self, note: &PushNote) -> Result<BytesMut, PushError> {
        let git_bin = self.services.git_bin();
        let repo_dir = self.services.repo_dir(&note.repo_name);
        let commands: Vec<UpdateCommand> = note
            .references
            .iter()
            .map(|r| UpdateCommand {
                ref_name: r.name.clone(),
                old_hash: r.old_hash.clone(),
                new_hash: r.new_hash.clone(),
            })
            .collect();
        let objects: Vec<String> = note.references.iter().flat_map(|r| r.objects.clone()).collect();
        mediator::build_reference_update_request(&git_bin, &repo_dir, &commands, &objects).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn touch_reports_previously_seen_keys() {
        let map: DashMap<NoteSenderKey, Instant> = DashMap::new();
        let key: NoteSenderKey = ([1u8; 32], vec![2, 3]);
        assert!(!Reactor::touch(&map, Duration::from_secs(60), 10, key.clone()));
        assert!(Reactor::touch(&map, Duration::from_secs(60), 10, key));
    }

    #[test]
    fn touch_evicts_oldest_when_over_capacity() {
        let map: DashMap<NoteSenderKey, Instant> = DashMap::new();
        for i in 0..3u8 {
            Reactor::touch(&map, Duration::from_secs(60), 2, ([i; 32], vec![i]));
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(map.len(), 2);
        assert!(!map.contains_key(&([0u8; 32], vec![0])));
    }
}
