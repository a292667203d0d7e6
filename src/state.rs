//! Repository snapshotter (C1): reads refs/tags/notes into immutable [`State`] objects via the
//! `git` executable, computes diffs between snapshots, and reverts a live repository back to a
//! prior snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::errors::PushError;

type Blake2b256 = Blake2b<U32>;

/// The kind of object a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RefKind {
    Branch,
    Tag,
    Note,
}

impl RefKind {
    pub fn from_ref_name(name: &str) -> Option<Self> {
        if name.starts_with("refs/heads/") {
            Some(RefKind::Branch)
        } else if name.starts_with("refs/tags/") {
            Some(RefKind::Tag)
        } else if name.starts_with("refs/notes/") {
            Some(RefKind::Note)
        } else {
            None
        }
    }
}

/// One entry in a [`State`]: a reference's kind, name, and the hash it currently points at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefObject {
    pub kind: RefKind,
    pub name: String,
    pub data: String,
}

/// An immutable snapshot of a repository's `refs/heads`, `refs/tags`, and `refs/notes`
/// namespaces, keyed by ref name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    refs: BTreeMap<String, RefObject>,
}

impl State {
    pub fn get(&self, name: &str) -> Option<&RefObject> {
        self.refs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RefObject> {
        self.refs.values()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Blake2b-256 over a canonical serialization with sorted keys. `BTreeMap` already
    /// iterates in sorted key order, so a plain bincode encoding of the map is canonical.
    pub fn content_hash(&self) -> [u8; 32] {
        let entries: Vec<(&String, &RefObject)> = self.refs.iter().collect();
        let bytes = bincode::encode_to_vec(
            entries
                .iter()
                .map(|(k, v)| {
                    let kind_tag: u8 = match v.kind {
                        RefKind::Branch => 0,
                        RefKind::Tag => 1,
                        RefKind::Note => 2,
                    };
                    (k.as_str(), kind_tag, v.name.as_str(), v.data.as_str())
                })
                .collect::<Vec<_>>(),
            bincode::config::standard(),
        )
        .expect("State entries are always encodable");
        let mut hasher = Blake2b256::new();
        hasher.update(&bytes);
        hasher.finalize().into()
    }
}

/// The action a single changed ref requires to go from `old` to `new`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    New,
    Update,
    Remove,
}

/// A single changed reference between two snapshots.
#[derive(Debug, Clone)]
pub struct ItemChange {
    pub item: RefObject,
    pub action: ChangeAction,
}

/// The result of [`diff`]: whether the overall ref set changed size, plus the list of changes.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub size_changed: bool,
    pub changes: Vec<ItemChange>,
}

/// `Diff(old, new) → Changes`. Items present only in `new` are `new`; items present only in
/// `old` are `remove`; items present in both with differing data are `update`.
pub fn diff(old: &State, new: &State) -> Changes {
    let mut changes = Vec::new();

    for (name, new_item) in &new.refs {
        match old.refs.get(name) {
            None => changes.push(ItemChange {
                item: new_item.clone(),
                action: ChangeAction::New,
            }),
            Some(old_item) if old_item.data != new_item.data => changes.push(ItemChange {
                item: new_item.clone(),
                action: ChangeAction::Update,
            }),
            Some(_) => {}
        }
    }

    for (name, old_item) in &old.refs {
        if !new.refs.contains_key(name) {
            changes.push(ItemChange {
                item: old_item.clone(),
                action: ChangeAction::Remove,
            });
        }
    }

    Changes {
        size_changed: old.refs.len() != new.refs.len(),
        changes,
    }
}

/// Filter restricting [`snapshot`] to a single reference name, used during per-reference
/// validation.
pub enum SnapshotFilter<'a> {
    All,
    OnlyRef(&'a str),
}

/// `Snapshot(repo, filter?) → State`. Enumerates refs under `refs/heads`, `refs/tags`,
/// `refs/notes` by shelling out to `git for-each-ref`.
pub async fn snapshot(
    git_bin: &Path,
    repo_dir: &Path,
    filter: SnapshotFilter<'_>,
) -> Result<State, PushError> {
    let mut cmd = Command::new(git_bin);
    cmd.arg("for-each-ref")
        .arg("--format=%(objectname) %(refname)")
        .current_dir(repo_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match filter {
        SnapshotFilter::All => {
            cmd.arg("refs/heads").arg("refs/tags").arg("refs/notes");
        }
        SnapshotFilter::OnlyRef(name) => {
            cmd.arg(name);
        }
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;

    if !output.status.success() {
        return Err(PushError::GitSubprocessFailure(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    let mut refs = BTreeMap::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Some((hash, name)) = line.split_once(' ') else {
            continue;
        };
        let Some(kind) = RefKind::from_ref_name(name) else {
            continue;
        };
        refs.insert(
            name.to_string(),
            RefObject {
                kind,
                name: name.to_string(),
                data: hash.to_string(),
            },
        );
    }

    Ok(State { refs })
}

async fn run_git(git_bin: &Path, repo_dir: &Path, args: &[&str]) -> Result<(), PushError> {
    let output = Command::new(git_bin)
        .args(args)
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    if !output.status.success() {
        return Err(PushError::RevertFailure(format!(
            "`git {}` failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// `Revert(repo, target, filter?, precomputedChanges?) → Changes`. Brings the on-disk repo
/// back to `target`, one ref-level action per changed ref per spec §4.1's table.
pub async fn revert(
    git_bin: &Path,
    repo_dir: &Path,
    target: &State,
    precomputed: Option<Changes>,
) -> Result<Changes, PushError> {
    let current = snapshot(git_bin, repo_dir, SnapshotFilter::All).await?;
    let changes = match precomputed {
        Some(c) => c,
        None => diff(target, &current),
    };

    for change in &changes.changes {
        let name = change.item.name.as_str();
        match (change.item.kind, change.action) {
            (RefKind::Branch, ChangeAction::New) => {
                run_git(git_bin, repo_dir, &["update-ref", "-d", name]).await?;
            }
            (RefKind::Branch, ChangeAction::Update) => {
                let old = target
                    .get(name)
                    .map(|r| r.data.as_str())
                    .ok_or_else(|| PushError::RevertFailure(format!("no old hash for {name}")))?;
                run_git(git_bin, repo_dir, &["update-ref", name, old]).await?;
            }
            (RefKind::Branch, ChangeAction::Remove) => {
                run_git(git_bin, repo_dir, &["update-ref", name, &change.item.data]).await?;
            }
            (RefKind::Tag, ChangeAction::New) => {
                run_git(git_bin, repo_dir, &["tag", "-d", tag_short_name(name)]).await?;
            }
            (RefKind::Tag, ChangeAction::Update) => {
                let old = target
                    .get(name)
                    .map(|r| r.data.as_str())
                    .ok_or_else(|| PushError::RevertFailure(format!("no old hash for {name}")))?;
                run_git(git_bin, repo_dir, &["update-ref", name, old]).await?;
            }
            (RefKind::Tag, ChangeAction::Remove) => {
                run_git(git_bin, repo_dir, &["update-ref", name, &change.item.data]).await?;
            }
            (RefKind::Note, _) => {
                // Notes are reverted via update-ref on their refs/notes/<name> pointer
                // regardless of action: a missing target entry means the note ref is deleted.
                match target.get(name) {
                    Some(old) => run_git(git_bin, repo_dir, &["update-ref", name, &old.data]).await?,
                    None => run_git(git_bin, repo_dir, &["update-ref", "-d", name]).await?,
                }
            }
        }
    }

    Ok(changes)
}

fn tag_short_name(full: &str) -> &str {
    full.strip_prefix("refs/tags/").unwrap_or(full)
}

/// Resolve the on-disk directory for a repository by name under `repo_root`.
pub fn repo_path(repo_root: &Path, repo_name: &str) -> PathBuf {
    repo_root.join(repo_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(kind: RefKind, name: &str, data: &str) -> RefObject {
        RefObject {
            kind,
            name: name.to_string(),
            data: data.to_string(),
        }
    }

    fn state_of(items: Vec<RefObject>) -> State {
        State {
            refs: items.into_iter().map(|i| (i.name.clone(), i)).collect(),
        }
    }

    #[test]
    fn diff_detects_new_update_remove() {
        let old = state_of(vec![
            obj(RefKind::Branch, "refs/heads/master", "aaa"),
            obj(RefKind::Branch, "refs/heads/gone", "bbb"),
        ]);
        let new = state_of(vec![
            obj(RefKind::Branch, "refs/heads/master", "ccc"),
            obj(RefKind::Branch, "refs/heads/feature", "ddd"),
        ]);

        let changes = diff(&old, &new);
        assert!(changes.size_changed);
        let actions: Vec<(String, ChangeAction)> = changes
            .changes
            .iter()
            .map(|c| (c.item.name.clone(), c.action))
            .collect();
        assert!(actions.contains(&("refs/heads/master".to_string(), ChangeAction::Update)));
        assert!(actions.contains(&("refs/heads/feature".to_string(), ChangeAction::New)));
        assert!(actions.contains(&("refs/heads/gone".to_string(), ChangeAction::Remove)));
    }

    #[test]
    fn diff_of_equal_states_is_empty() {
        let s = state_of(vec![obj(RefKind::Branch, "refs/heads/master", "aaa")]);
        let changes = diff(&s, &s.clone());
        assert!(!changes.size_changed);
        assert!(changes.changes.is_empty());
    }

    #[test]
    fn content_hash_is_stable_and_order_independent() {
        let a = state_of(vec![
            obj(RefKind::Branch, "refs/heads/master", "aaa"),
            obj(RefKind::Tag, "refs/tags/v1", "bbb"),
        ]);
        let b = state_of(vec![
            obj(RefKind::Tag, "refs/tags/v1", "bbb"),
            obj(RefKind::Branch, "refs/heads/master", "aaa"),
        ]);
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn content_hash_changes_with_content() {
        let a = state_of(vec![obj(RefKind::Branch, "refs/heads/master", "aaa")]);
        let b = state_of(vec![obj(RefKind::Branch, "refs/heads/master", "bbb")]);
        assert_ne!(a.content_hash(), b.content_hash());
    }

    /// A small alphabet of branch names and hash-ish values, so quickcheck's random `Vec<u8>`
    /// inputs land on realistic collisions between `old` and `new` instead of near-certainly
    /// disjoint ref sets.
    use quickcheck::Arbitrary;

    #[derive(Clone, Debug)]
    struct RefFixture(Vec<(u8, u8)>);

    impl Arbitrary for RefFixture {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            let len = usize::arbitrary(g) % 6;
            RefFixture((0..len).map(|_| (u8::arbitrary(g) % 4, u8::arbitrary(g) % 4)).collect())
        }
    }

    fn state_from_fixture(fixture: &RefFixture) -> State {
        state_of(
            fixture
                .0
                .iter()
                .map(|(name, hash)| obj(RefKind::Branch, &format!("refs/heads/b{name}"), &format!("h{hash}")))
                .collect(),
        )
    }

    /// Apply a [`Changes`] (as produced by [`diff`]) to `old` the same way [`revert`] would read
    /// it, but in the forward direction: `new`/`update` actions set the entry to its `new.refs`
    /// value, `remove` actions delete it. This models spec §8's "Diff(old, new) applied as
    /// updates to old yields new" without shelling out to git.
    fn apply_changes(old: &State, changes: &Changes) -> State {
        let mut refs = old.refs.clone();
        for change in &changes.changes {
            match change.action {
                ChangeAction::New | ChangeAction::Update => {
                    refs.insert(change.item.name.clone(), change.item.clone());
                }
                ChangeAction::Remove => {
                    refs.remove(&change.item.name);
                }
            }
        }
        State { refs }
    }

    #[quickcheck_macros::quickcheck]
    fn diff_applied_as_updates_reconstructs_new(old: RefFixture, new: RefFixture) -> bool {
        let old = state_from_fixture(&old);
        let new = state_from_fixture(&new);
        let changes = diff(&old, &new);
        apply_changes(&old, &changes) == new
    }

    #[quickcheck_macros::quickcheck]
    fn diff_of_identical_states_has_no_changes(s: RefFixture) -> bool {
        let s = state_from_fixture(&s);
        let changes = diff(&s, &s.clone());
        changes.changes.is_empty() && !changes.size_changed
    }
}
