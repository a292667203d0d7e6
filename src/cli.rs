//! Shared arg-parsing and remote-rewriting logic for the `sign-commit`/`sign-tag`/`sign-note`
//! binaries (spec §6: thin front ends that mint a push token and splice it into the pushing
//! repo's remote URLs, replacing a `gpg-program`-style signer hook).
//!
//! No CLI-parsing crate: none of the pack's example repos take a dependency on one for a
//! handful of named flags, so parsing is hand-rolled the same way the rest of this crate
//! hand-rolls its pkt-line and base64 handling rather than reaching for a crate per call site.

use std::env;
use std::path::PathBuf;
use std::process::Command;

use ring::signature::Ed25519KeyPair;

/// The flags common to all three signing binaries (spec §6).
#[derive(Debug, Default)]
pub struct SignArgs {
    pub fee: String,
    pub nonce: u64,
    pub push_key_id: String,
    pub passphrase: Option<String>,
    pub remote: String,
    pub reset_tokens: bool,
    /// Non-flag arguments, in order. `sign-tag`/`sign-note` read the tag/notes-ref name to
    /// sign from here — git invokes these binaries with the object name as a bare trailing
    /// argument, mirroring how it invokes `gpg.program`.
    pub positional: Vec<String>,
}

/// Parse `--flag value` / `--flag=value` pairs from the process's own argv. `--reset-tokens` is
/// a bare switch; every other flag takes a value.
pub fn parse_args() -> Result<SignArgs, String> {
    let mut args = SignArgs {
        remote: "origin".to_string(),
        ..Default::default()
    };
    let mut it = env::args().skip(1);

    while let Some(raw) = it.next() {
        if !raw.starts_with("--") {
            args.positional.push(raw);
            continue;
        }

        let (flag, inline_value) = match raw.split_once('=') {
            Some((f, v)) => (f.to_string(), Some(v.to_string())),
            None => (raw, None),
        };

        let mut value = || -> Result<String, String> {
            if let Some(v) = &inline_value {
                return Ok(v.clone());
            }
            it.next().ok_or_else(|| format!("{flag} requires a value"))
        };

        match flag.as_str() {
            "--fee" => args.fee = value()?,
            "--nonce" => {
                args.nonce = value()?
                    .parse()
                    .map_err(|_| "--nonce must be a non-negative integer".to_string())?
            }
            "--push-key-id" => args.push_key_id = value()?,
            "--passphrase" => args.passphrase = Some(value()?),
            "--remote" => args.remote = value()?,
            "--reset-tokens" => args.reset_tokens = true,
            other => return Err(format!("unrecognized flag `{other}`")),
        }
    }

    if args.push_key_id.is_empty() {
        return Err("--push-key-id is required".to_string());
    }
    if args.fee.is_empty() {
        return Err("--fee is required".to_string());
    }

    Ok(args)
}

/// Where a push key's raw PKCS8 bytes live. The keystore's own format (encryption at rest,
/// `passphrase` handling) is the external keystore collaborator's concern (spec Purpose &
/// Scope's "keystore and signing CLI" out-of-scope note) — this crate only knows how to find
/// the file and hand its bytes to `ring`.
pub fn keystore_path(push_key_id: &str) -> PathBuf {
    let base = env::var("DECENTRA_GIT_KEYSTORE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".decentra-git").join("keys")
        });
    base.join(format!("{push_key_id}.pk8"))
}

/// Load the push key named by `push_key_id` from the keystore. `passphrase` is accepted (per
/// spec §6's CLI surface) and passed straight through for a keystore that encrypts its files at
/// rest; this crate's own keystore is unencrypted, so an unused passphrase is not an error —
/// it's simply not this crate's concern to enforce.
pub fn load_key(push_key_id: &str, _passphrase: Option<&str>) -> Result<Ed25519KeyPair, String> {
    let path = keystore_path(push_key_id);
    let bytes = std::fs::read(&path)
        .map_err(|e| format!("reading keystore file `{}`: {e}", path.display()))?;
    Ed25519KeyPair::from_pkcs8(&bytes).map_err(|e| format!("malformed PKCS8 key: {e:?}"))
}

/// List the URLs configured for `remote` via `git remote get-url --all <remote>`.
pub fn remote_urls(remote: &str) -> Result<Vec<String>, String> {
    let output = Command::new("git")
        .args(["remote", "get-url", "--all", remote])
        .output()
        .map_err(|e| format!("spawning git: {e}"))?;
    if !output.status.success() {
        return Err(format!(
            "git remote get-url failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::to_string)
        .filter(|l| !l.is_empty())
        .collect())
}

/// Rewrite `url`'s userinfo to `token` (or strip it entirely when `token` is `None`), per spec
/// §6: "update each remote URL's user field to carry current push tokens". Non-HTTP(S) URLs
/// (SSH, `git://`) are returned unchanged — push tokens only ride in Basic-Auth usernames.
pub fn rewrite_remote_user(url: &str, token: Option<&str>) -> String {
    let scheme_end = match url.find("://") {
        Some(i) => i,
        None => return url.to_string(),
    };
    let scheme = &url[..scheme_end];
    if scheme != "http" && scheme != "https" {
        return url.to_string();
    }

    let rest = &url[scheme_end + 3..];
    let host_start = rest.find('@').map(|i| i + 1).unwrap_or(0);
    let host_and_path = &rest[host_start..];

    match token {
        Some(t) => format!("{scheme}://{t}@{host_and_path}"),
        None => format!("{scheme}://{host_and_path}"),
    }
}

/// Apply `rewrite_remote_user` to every URL configured for `remote` via `git remote set-url
/// --add` (after clearing the existing ones), since `git remote set-url` alone only replaces the
/// first configured URL.
pub fn update_remote_urls(remote: &str, token: Option<&str>) -> Result<(), String> {
    let urls = remote_urls(remote)?;
    if urls.is_empty() {
        return Err(format!("remote `{remote}` has no configured URLs"));
    }

    let rewritten: Vec<String> = urls.iter().map(|u| rewrite_remote_user(u, token)).collect();

    let first = &rewritten[0];
    let status = Command::new("git")
        .args(["remote", "set-url", remote, first])
        .status()
        .map_err(|e| format!("spawning git: {e}"))?;
    if !status.success() {
        return Err(format!("git remote set-url failed for `{remote}`"));
    }

    for extra in &rewritten[1..] {
        let status = Command::new("git")
            .args(["remote", "set-url", "--add", remote, extra])
            .status()
            .map_err(|e| format!("spawning git: {e}"))?;
        if !status.success() {
            return Err(format!("git remote set-url --add failed for `{remote}`"));
        }
    }

    Ok(())
}

/// The env var a running `gpg-program`-replacement signer reads the just-minted token back from
/// (spec §6: "optionally export the latest token via env var `<APP>_LAST_PUSH_TOKEN`"). Printed
/// as a `NAME=value` line on stdout rather than mutated into the parent shell's environment,
/// since a child process cannot modify its parent's environment; callers wanting the export are
/// expected to `eval "$(sign-commit ... )"` or similar, matching how the source project's own
/// gpg-program wrapper consumes it.
pub fn last_push_token_env_line(token: &str) -> String {
    format!("DECENTRA_GIT_LAST_PUSH_TOKEN={token}")
}

/// The full ref name of the branch currently checked out in the working directory's repo.
pub fn current_branch_ref() -> Result<String, String> {
    let output = Command::new("git")
        .args(["symbolic-ref", "-q", "HEAD"])
        .output()
        .map_err(|e| format!("spawning git: {e}"))?;
    if !output.status.success() {
        return Err("HEAD is detached; checkout a branch before signing a commit".to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// The current object id a ref points at, or `None` if the ref doesn't exist yet (a brand new
/// tag or notes ref has no prior head to report).
pub fn ref_head(reference: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--verify", "-q", reference])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_http_userinfo() {
        let url = "https://git.example.com/repo.git";
        assert_eq!(
            rewrite_remote_user(url, Some("tok123")),
            "https://tok123@git.example.com/repo.git"
        );
    }

    #[test]
    fn replaces_existing_userinfo() {
        let url = "https://oldtoken@git.example.com/repo.git";
        assert_eq!(
            rewrite_remote_user(url, Some("newtoken")),
            "https://newtoken@git.example.com/repo.git"
        );
    }

    #[test]
    fn strips_userinfo_when_token_is_none() {
        let url = "https://oldtoken@git.example.com/repo.git";
        assert_eq!(rewrite_remote_user(url, None), "https://git.example.com/repo.git");
    }

    #[test]
    fn leaves_ssh_urls_untouched() {
        let url = "ssh://git@example.com/repo.git";
        assert_eq!(rewrite_remote_user(url, Some("tok")), url);
    }

    #[test]
    fn leaves_scp_style_urls_untouched() {
        let url = "git@example.com:repo.git";
        assert_eq!(rewrite_remote_user(url, Some("tok")), url);
    }
}
