//! Push handler (C6): the top-level orchestration of one inbound push per spec §4.6 —
//! `HandleStream` drives the mediator, `HandleUpdate` walks the resulting ref-level diff, and
//! `handleReference` (folded into the loop body here) validates and polices each one.
//!
//! Every changed reference is evaluated independently: a reference that fails policy or
//! validation is reverted and its exclusively-attributed objects best-effort deleted on the
//! spot, but the loop keeps going so every reference gets a verdict. Once all references have
//! been decided, the note as a whole is still all-or-nothing — if anything failed, the
//! references that did pass are reverted too, and the first error encountered is what gets
//! reported.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncRead;

use crate::errors::PushError;
use crate::mediator;
use crate::node::Services;
use crate::policy::PolicyEnforcer;
use crate::pool::PushPool;
use crate::pushnote::{PushNote, ReferenceUpdate};
use crate::state::{self, ChangeAction, SnapshotFilter};
use crate::token::{self, TxDetail};
use crate::validator;

/// The outcome of a successfully admitted push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub note: PushNote,
    /// `git receive-pack`'s own pkt-line report (unpack status + per-ref ok/ng), already framed
    /// however the client's requested capabilities (report-status, side-band-64k) dictate —
    /// relayed verbatim rather than re-synthesized.
    pub report: Vec<u8>,
}

fn action_name(action: ChangeAction) -> &'static str {
    match action {
        ChangeAction::New | ChangeAction::Update => "update",
        ChangeAction::Remove => "delete",
    }
}

fn zero_hash() -> String {
    "0".repeat(40)
}

/// Drive one inbound push end to end: authenticate, run `git receive-pack`, validate and police
/// every changed reference, and — on success — construct, sign, and admit a [`PushNote`].
pub async fn handle_stream(
    services: &Services,
    pool: &PushPool,
    repo_name: &str,
    auth_username: &str,
    body: impl AsyncRead + Unpin,
) -> Result<PushOutcome, PushError> {
    let tokens = token::decode_auth_tokens(auth_username)?;
    let push_key_id = tokens[0].push_key_id.clone();

    let repo_state = services
        .repo_state
        .get_repo(repo_name)
        .await
        .ok_or_else(|| PushError::NotAContributor(push_key_id.clone()))?;
    if !repo_state.contributors.contains(&push_key_id) {
        return Err(PushError::NotAContributor(push_key_id));
    }

    let push_key_pub = services
        .push_keys
        .get(&push_key_id)
        .await
        .ok_or_else(|| PushError::UnknownPushKey(push_key_id.clone()))?;

    let git_bin = services.git_bin();
    let repo_dir = services.repo_dir(repo_name);
    let policy = PolicyEnforcer::new(Vec::new(), Vec::new(), repo_state.policies.clone());

    let pre_state = state::snapshot(&git_bin, &repo_dir, SnapshotFilter::All).await?;

    let outcome = mediator::drive_receive_pack(&git_bin, &repo_dir, body).await?;
    if !outcome.exit_success {
        state::revert(&git_bin, &repo_dir, &pre_state, None).await?;
        return Err(PushError::GitSubprocessFailure(
            "git receive-pack exited non-zero".to_string(),
        ));
    }

    let post_state = state::snapshot(&git_bin, &repo_dir, SnapshotFilter::All).await?;
    let changes = state::diff(&pre_state, &post_state);

    let result = handle_update(
        services,
        &git_bin,
        &repo_dir,
        repo_name,
        &policy,
        &push_key_id,
        &push_key_pub,
        &tokens,
        &pre_state,
        &repo_state.ref_nonces,
        &changes,
    )
    .await;

    // `handle_update` already reverts every reference it touched (passed or failed) before
    // returning an error, per spec §4.6's per-reference revert-and-continue design — no
    // additional whole-snapshot revert is needed here.
    let references = match result {
        Ok(references) => references,
        Err(err) => return Err(err),
    };

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let mut note = PushNote::new(repo_name.to_string(), references, push_key_id, timestamp);
    note.set_size(outcome.pushed_bytes);
    note.sign(&services.node_key);

    // The push already went through validate_change + check_policy above; the pool's own
    // validator hook is for notes arriving from peers, not ones this node just produced itself.
    pool.add(note.clone(), true, |_| Ok(()))?;

    if let Err(e) = services.dht.announce(format!("{}/{}", note.repo_name, note.id_hex())).await {
        tracing::warn!(error = %e, note_id = %note.id_hex(), "DHT announce failed for admitted push note");
    }

    Ok(PushOutcome {
        note,
        report: outcome.report,
    })
}

/// `HandleUpdate`: walk every changed reference independently per spec §4.6. A reference that
/// fails authorization or validation is reverted and its exclusively-attributed objects deleted
/// on the spot, but the loop continues so every reference gets a verdict — the first collected
/// error is what's eventually reported. Once every reference has been decided, if *any* failed,
/// the references that passed are reverted too: the note is all-or-nothing even though the
/// per-reference work wasn't short-circuited.
#[allow(clippy::too_many_arguments)]
async fn handle_update(
    services: &Services,
    git_bin: &std::path::Path,
    repo_dir: &std::path::Path,
    repo_name: &str,
    policy: &PolicyEnforcer,
    push_key_id: &str,
    push_key_pub: &[u8],
    tokens: &[TxDetail],
    pre_state: &state::State,
    ref_nonces: &std::collections::HashMap<String, u64>,
    changes: &state::Changes,
) -> Result<Vec<ReferenceUpdate>, PushError> {
    let mut references = Vec::with_capacity(changes.changes.len());
    let mut passed_changes = Vec::with_capacity(changes.changes.len());
    let mut errors = Vec::new();

    for change in &changes.changes {
        match handle_reference(
            services,
            git_bin,
            repo_dir,
            repo_name,
            policy,
            push_key_id,
            push_key_pub,
            tokens,
            pre_state,
            ref_nonces,
            change,
        )
        .await
        {
            Ok(reference) => {
                references.push(reference);
                passed_changes.push(change.clone());
            }
            Err(err) => {
                revert_single_reference(git_bin, repo_dir, pre_state, change).await;
                errors.push(err);
            }
        }
    }

    if let Some(first) = errors.into_iter().next() {
        for change in &passed_changes {
            revert_single_reference(git_bin, repo_dir, pre_state, change).await;
        }
        return Err(first);
    }

    Ok(references)
}

/// One changed reference's authorization, validation, and object attribution.
#[allow(clippy::too_many_arguments)]
async fn handle_reference(
    services: &Services,
    git_bin: &std::path::Path,
    repo_dir: &std::path::Path,
    repo_name: &str,
    policy: &PolicyEnforcer,
    push_key_id: &str,
    push_key_pub: &[u8],
    tokens: &[TxDetail],
    pre_state: &state::State,
    ref_nonces: &std::collections::HashMap<String, u64>,
    change: &state::ItemChange,
) -> Result<ReferenceUpdate, PushError> {
    let name = change.item.name.as_str();
    let action = action_name(change.action);

    let expected = tokens
        .iter()
        .find(|t| t.reference == name)
        .ok_or_else(|| PushError::MissingToken(name.to_string()))?;

    policy.check_policy(push_key_id, name, action)?;

    let (old_hash, new_hash) = match change.action {
        ChangeAction::New => (
            pre_state.get(name).map(|r| r.data.clone()).unwrap_or_else(zero_hash),
            change.item.data.clone(),
        ),
        ChangeAction::Update => (
            pre_state
                .get(name)
                .map(|r| r.data.clone())
                .ok_or_else(|| PushError::MalformedRef(name.to_string()))?,
            change.item.data.clone(),
        ),
        ChangeAction::Remove => (change.item.data.clone(), zero_hash()),
    };

    let embedded = validator::validate_change(git_bin, repo_dir, name, &new_hash, expected, push_key_pub).await?;

    if let Some(proposal_id) = &embedded.merge_proposal_id {
        services
            .merge_checker
            .check(repo_name, proposal_id, name, &old_hash, &new_hash)
            .await
            .map_err(|reason| PushError::MergeProposalRejected(name.to_string(), reason))?;
    }

    let objects = mediator::attribute_objects(git_bin, repo_dir, &old_hash, &new_hash).await?;

    let ref_nonce = ref_nonces.get(name).copied().unwrap_or(0) + 1;

    Ok(ReferenceUpdate {
        name: name.to_string(),
        old_hash,
        new_hash,
        nonce: ref_nonce,
        fee: embedded.fee.clone(),
        signature: embedded.signature.clone(),
        pusher_account_nonce: embedded.nonce,
        objects,
    })
}

/// Revert exactly one reference to its pre-push value and best-effort delete whatever loose
/// objects its (failed or now-superseded) walk exclusively attributed to it.
async fn revert_single_reference(
    git_bin: &std::path::Path,
    repo_dir: &std::path::Path,
    pre_state: &state::State,
    change: &state::ItemChange,
) {
    let single = state::Changes {
        size_changed: false,
        changes: vec![change.clone()],
    };
    if let Err(e) = state::revert(git_bin, repo_dir, pre_state, Some(single)).await {
        tracing::warn!(reference = %change.item.name, error = %e, "failed to revert single reference");
        return;
    }

    let name = change.item.name.as_str();
    let (old_hash, new_hash) = match change.action {
        ChangeAction::New => (
            pre_state.get(name).map(|r| r.data.clone()).unwrap_or_else(zero_hash),
            change.item.data.clone(),
        ),
        ChangeAction::Update => (
            pre_state.get(name).map(|r| r.data.clone()).unwrap_or_else(zero_hash),
            change.item.data.clone(),
        ),
        ChangeAction::Remove => (change.item.data.clone(), zero_hash()),
    };
    if let Ok(objects) = mediator::attribute_objects(git_bin, repo_dir, &old_hash, &new_hash).await {
        mediator::delete_loose_objects(repo_dir, &objects).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_name_maps_new_and_update_to_update() {
        assert_eq!(action_name(ChangeAction::New), "update");
        assert_eq!(action_name(ChangeAction::Update), "update");
        assert_eq!(action_name(ChangeAction::Remove), "delete");
    }

    #[test]
    fn zero_hash_is_forty_zeros() {
        assert_eq!(zero_hash(), "0".repeat(40));
    }
}
