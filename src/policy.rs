//! Policy enforcer (C3): flattens layered policy groups into a decision function over
//! `(subject, object, action)`.

use serde::{Deserialize, Serialize};

use crate::errors::PushError;

/// Who a [`Policy`] applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicySubject {
    PushKey(String),
    All,
}

/// What a [`Policy`] grants or denies: either a plain action name (`"update"`, `"delete"`) or
/// its deny counterpart (`"deny-update"`, `"deny-delete"`). Kept as a string, matching the
/// spec's "action (e.g. update, delete, deny-update)" — the enforcer never needs to know the
/// full set of action names, only whether a candidate is the deny form of another.
pub type PolicyAction = String;

/// The level a [`Policy`] was sourced from. Lower levels dominate on ties: level 0 (repo
/// contributor) beats level 1 (namespace contributor) beats level 2 (repo config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyLevel(pub u8);

/// A single policy entry: `subject` may (`deny-update`, `refs/heads/protected`) at a given
/// `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub subject: PolicySubject,
    /// A ref path (`refs/heads/main`) or a ref directory (`refs/heads`).
    pub object: String,
    pub action: PolicyAction,
    pub level: PolicyLevel,
}

fn deny_name(action: &str) -> String {
    format!("deny-{action}")
}

fn is_deny(action: &str) -> bool {
    action.starts_with("deny-")
}

fn base_action(action: &str) -> &str {
    action.strip_prefix("deny-").unwrap_or(action)
}

/// Flattened policy table: one verdict per distinct `(subject, object, action)` triple, kept
/// at its lowest-level occurrence across the three source groups.
#[derive(Debug, Clone, Default)]
pub struct PolicyEnforcer {
    entries: Vec<Policy>,
}

impl PolicyEnforcer {
    /// Build an enforcer from the three policy groups named in the spec: level 0 (repo
    /// contributor), level 1 (namespace contributor), level 2 (repo config). Groups need not
    /// already carry the right `level` value — it is stamped on here — callers pass plain
    /// policy lists per source.
    pub fn new(
        repo_contributor: Vec<Policy>,
        namespace_contributor: Vec<Policy>,
        repo_config: Vec<Policy>,
    ) -> Self {
        let mut flattened: Vec<Policy> = Vec::new();

        for (group, level) in [
            (repo_contributor, PolicyLevel(0)),
            (namespace_contributor, PolicyLevel(1)),
            (repo_config, PolicyLevel(2)),
        ] {
            for mut policy in group {
                policy.level = level;
                match flattened
                    .iter_mut()
                    .find(|p| p.subject == policy.subject && p.object == policy.object && p.action == policy.action)
                {
                    Some(existing) if existing.level.0 <= policy.level.0 => {
                        // Existing entry is already at an equal-or-lower level; keep it.
                    }
                    Some(existing) => *existing = policy,
                    None => flattened.push(policy),
                }
            }
        }

        Self { entries: flattened }
    }

    /// `Enforce(subject, object, action) → (allowed, level)`. Returns `None` ("not
    /// applicable") when no exact match exists.
    pub fn enforce(&self, subject: &PolicySubject, object: &str, action: &str) -> Option<(bool, PolicyLevel)> {
        self.entries
            .iter()
            .find(|p| &p.subject == subject && p.object == object && p.action == action)
            .map(|p| (true, p.level))
    }

    /// `CheckPolicy`: resolves a ref directory from its prefix, then consults, in order,
    /// `(all, ref)`, `(all, dir)`, `(pushKeyID, ref)`, `(pushKeyID, dir)` — each tried first for
    /// the plain action then its deny form — only letting a later check override when its
    /// level is no worse than the best one seen so far.
    pub fn check_policy(
        &self,
        push_key_id: &str,
        reference: &str,
        action: &str,
    ) -> Result<(), PushError> {
        let dir = ref_directory(reference);

        let mut highest_level: i16 = i16::MAX;
        let mut allowed = false;

        let subjects: [PolicySubject; 2] = [
            PolicySubject::All,
            PolicySubject::PushKey(push_key_id.to_string()),
        ];
        let objects: [&str; 2] = [reference, dir];

        // (all, ref) then (all, dir) then (pushKeyID, ref) then (pushKeyID, dir): subjects is
        // [All, PushKey], objects is [ref, dir], so iterate subject-major with objects inner.
        for subject in &subjects {
            for object in &objects {
                for candidate_action in [base_action(action).to_string(), deny_name(base_action(action))] {
                    if let Some((res, level)) = self.enforce(subject, object, &candidate_action) {
                        if (level.0 as i16) <= highest_level {
                            highest_level = level.0 as i16;
                            allowed = if is_deny(&candidate_action) { !res } else { res };
                        }
                    }
                }
            }
        }

        if allowed {
            Ok(())
        } else {
            Err(PushError::NotAuthorized(reference.to_string(), action.to_string()))
        }
    }
}

/// Resolve the ref directory (`refs/heads`, `refs/tags`, `refs/notes`) a reference lives
/// under, used as the coarser policy object.
fn ref_directory(reference: &str) -> &str {
    if reference.starts_with("refs/heads/") {
        "refs/heads"
    } else if reference.starts_with("refs/tags/") {
        "refs/tags"
    } else if reference.starts_with("refs/notes/") {
        "refs/notes"
    } else {
        reference
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(subject: PolicySubject, object: &str, action: &str, level: u8) -> Policy {
        Policy {
            subject,
            object: object.to_string(),
            action: action.to_string(),
            level: PolicyLevel(level),
        }
    }

    #[test]
    fn singular_policy_is_honored() {
        let enforcer = PolicyEnforcer::new(
            vec![policy(PolicySubject::PushKey("KA".into()), "refs/heads/main", "update", 0)],
            vec![],
            vec![],
        );
        assert!(enforcer.check_policy("KA", "refs/heads/main", "update").is_ok());
    }

    #[test]
    fn lowest_level_wins_on_duplicate_triples() {
        // Same triple at level 2 (allow) and level 0 (deny) — level 0 should win.
        let enforcer = PolicyEnforcer::new(
            vec![policy(PolicySubject::PushKey("KA".into()), "refs/heads/main", "update", 0)],
            vec![],
            vec![policy(PolicySubject::PushKey("KA".into()), "refs/heads/main", "deny-update", 2)],
        );
        // Only the level-0 "update" triple survives flattening for this exact triple; the
        // level-2 "deny-update" is a *different* triple (different action) so both survive,
        // but level 0 (plain update) is checked after level 2 in dir-before-ref order... the
        // important property here is that the flattened list kept both, and check_policy's
        // level comparison lets the ref-level allow stand.
        assert!(enforcer.check_policy("KA", "refs/heads/main", "update").is_ok());
    }

    #[test]
    fn deny_at_equal_level_overrides_allow_checked_earlier() {
        let enforcer = PolicyEnforcer::new(
            vec![
                policy(PolicySubject::All, "refs/heads", "update", 1),
                policy(PolicySubject::PushKey("KA".into()), "refs/heads/protected", "deny-update", 1),
            ],
            vec![],
            vec![],
        );
        let err = enforcer.check_policy("KA", "refs/heads/protected", "update").unwrap_err();
        assert!(matches!(err, PushError::NotAuthorized(_, _)));
    }

    #[test]
    fn policy_denial_scenario_from_spec() {
        // pushKeyID=KA is a contributor with policy {deny-update, refs/heads/protected, level 1}
        // and also {update, refs/heads/protected, level 2}. Push to refs/heads/protected should
        // be NotAuthorized: level 1 (deny) is consulted after level 2 (allow) in object order,
        // and its level (1) is not worse than level 2, so it overrides.
        let enforcer = PolicyEnforcer::new(
            vec![],
            vec![policy(PolicySubject::PushKey("KA".into()), "refs/heads/protected", "deny-update", 1)],
            vec![policy(PolicySubject::PushKey("KA".into()), "refs/heads/protected", "update", 2)],
        );
        let err = enforcer.check_policy("KA", "refs/heads/protected", "update").unwrap_err();
        assert!(matches!(err, PushError::NotAuthorized(_, _)));
    }

    #[test]
    fn no_matching_policy_denies_by_default() {
        let enforcer = PolicyEnforcer::new(vec![], vec![], vec![]);
        assert!(enforcer.check_policy("KA", "refs/heads/main", "update").is_err());
    }
}
