//! HTTP front (C9): the Smart HTTP Git surface, wired directly into this crate's own push
//! pipeline rather than the generic `RepositoryAccess`/`GitProtocol` abstraction this module
//! started from. That abstraction models object storage as `get_object`/`store_pack_data`
//! calls; this crate's snapshotter, mediator, and push handler already shell out to `git`
//! directly (spec NON-GOALS: never reimplement the object store or wire protocol), so a thin
//! axum layer that calls them straight is the better fit — see `DESIGN.md`.
//!
//! Routes are dispatched from a single catch-all so repository paths may contain namespace
//! segments (`org/repo`), matching spec §4.9's regex-style route table rather than the
//! single-segment `/{repo}/...` shape of a typical example server.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use flate2::read::GzDecoder;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::node::Services;
use crate::pool::PushPool;
use crate::protocol::types::{ProtocolError, TransportProtocol};
use crate::protocol::utils::build_smart_reply;
use crate::push;

/// Shared state for every HTTP handler: the node's capabilities and its push pool.
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub pool: Arc<PushPool>,
}

/// Build the axum [`Router`] for one node. A single catch-all route per method carries the
/// whole path; [`split_known_suffix`] classifies it.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{*path}", get(dispatch_get))
        .route("/{*path}", post(dispatch_post))
        .with_state(Arc::new(state))
}

fn error_response(status: StatusCode, err: impl std::fmt::Display) -> Response {
    (status, err.to_string()).into_response()
}

/// Split a request path ending in `/info/refs`, `/git-upload-pack`, or `/git-receive-pack` into
/// (repo_name, suffix). Returns `None` for anything else, which falls back to static-file
/// serving for dumb clients and content-addressed objects.
fn split_known_suffix(path: &str) -> Option<(&str, &'static str)> {
    for suffix in ["/info/refs", "/git-upload-pack", "/git-receive-pack"] {
        if let Some(repo) = path.strip_suffix(suffix) {
            return Some((repo.trim_matches('/'), suffix));
        }
    }
    None
}

async fn dispatch_get(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let full = format!("/{path}");
    match split_known_suffix(&full) {
        Some((repo, "/info/refs")) => advertise_refs(state, repo, query, headers).await,
        _ => serve_static(state, &full).await,
    }
}

async fn dispatch_post(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let full = format!("/{path}");
    match split_known_suffix(&full) {
        Some((repo, "/git-upload-pack")) => serve_upload_pack(state, repo, headers, body).await,
        Some((repo, "/git-receive-pack")) => serve_receive_pack(state, repo, headers, body).await,
        _ => (StatusCode::NOT_FOUND, "unknown git service").into_response(),
    }
}

/// `GET (.*)/info/refs`: advertise refs for the requested service. Smart clients pass
/// `?service=git-upload-pack|git-receive-pack`; dumb clients pass none and fall back to
/// `update-server-info` plus the static `info/refs` file.
async fn advertise_refs(
    state: Arc<AppState>,
    repo: &str,
    query: std::collections::HashMap<String, String>,
    headers: HeaderMap,
) -> Response {
    let git_bin = state.services.git_bin();
    let repo_dir = state.services.repo_dir(repo);

    let Some(service) = query.get("service") else {
        return dumb_info_refs(&git_bin, &repo_dir).await;
    };

    let subcommand = match service.as_str() {
        "git-upload-pack" => "upload-pack",
        "git-receive-pack" => "receive-pack",
        other => return error_response(StatusCode::BAD_REQUEST, ProtocolError::invalid_service(other)),
    };

    let output = Command::new(&git_bin)
        .arg(subcommand)
        .arg("--stateless-rpc")
        .arg("--advertise-refs")
        .arg(&repo_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await;

    let output = match output {
        Ok(o) if o.status.success() => o,
        Ok(o) => {
            return error_response(
                StatusCode::NOT_FOUND,
                ProtocolError::RepositoryNotFound(String::from_utf8_lossy(&o.stderr).into_owned()),
            );
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    let wants_v2 = headers
        .get("Git-Protocol")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("version=2"));

    let mut buf = Vec::new();
    if !wants_v2 {
        // The real ref list comes from git's own stdout below; build_smart_reply's ref-list
        // flush isn't wanted here, so only its leading service-banner pkt-line is kept.
        let banner = build_smart_reply(TransportProtocol::Http, &[], service.clone());
        buf.extend_from_slice(&banner[..banner.len().saturating_sub(4)]);
    }
    buf.extend_from_slice(&output.stdout);
    let body = Bytes::from(buf);

    let content_type = format!("application/x-{service}-advertisement");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .unwrap()
}

async fn dumb_info_refs(git_bin: &Path, repo_dir: &Path) -> Response {
    let info_refs_path = repo_dir.join("info/refs");
    if !info_refs_path.exists() {
        let _ = Command::new(git_bin)
            .arg("update-server-info")
            .current_dir(repo_dir)
            .output()
            .await;
    }
    match tokio::fs::read(&info_refs_path).await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(bytes))
            .unwrap(),
        Err(_) => (StatusCode::NOT_FOUND, "no refs to advertise").into_response(),
    }
}

/// `POST (.*)/git-upload-pack`: transparent pass-through to `git upload-pack --stateless-rpc`.
/// Fetches carry no push authorization, so this never touches the push pipeline.
async fn serve_upload_pack(state: Arc<AppState>, repo: &str, headers: HeaderMap, body: Bytes) -> Response {
    let git_bin = state.services.git_bin();
    let repo_dir = state.services.repo_dir(repo);

    let body = match maybe_gunzip(&headers, body) {
        Ok(b) => b,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let mut child = match Command::new(&git_bin)
        .arg("upload-pack")
        .arg("--stateless-rpc")
        .arg(&repo_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };

    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(&body).await.is_err() {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed writing to upload-pack stdin");
        }
        drop(stdin);
    }

    match child.wait_with_output().await {
        Ok(output) if output.status.success() => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/x-git-upload-pack-result")
            .body(Body::from(output.stdout))
            .unwrap(),
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            tracing::warn!(repo, status = ?output.status, %stderr, "git upload-pack exited non-zero");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, stderr)
        }
        Err(e) => {
            tracing::warn!(repo, error = %e, "failed to wait on git upload-pack");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

fn maybe_gunzip(headers: &HeaderMap, body: Bytes) -> std::io::Result<Bytes> {
    let is_gzip = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
    if !is_gzip {
        return Ok(body);
    }
    let mut decoder = GzDecoder::new(&body[..]);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

/// `POST (.*)/git-receive-pack`: authenticate the push tokens carried in HTTP Basic-Auth, then
/// hand the body to [`push::handle_stream`]. On success the response carries the raw
/// `git receive-pack` report with a trailing pkt-line naming the admitted note's id, also
/// exposed as the `X-TxID` header, as spec §4.9 requires.
async fn serve_receive_pack(state: Arc<AppState>, repo: &str, headers: HeaderMap, body: Bytes) -> Response {
    let request_id = uuid::Uuid::new_v4();

    let auth_username = match extract_basic_auth_username(&headers) {
        Ok(u) => u,
        Err(e) => {
            tracing::warn!(%request_id, repo, error = %e, "rejected receive-pack request at auth");
            return error_response(StatusCode::UNAUTHORIZED, e);
        }
    };

    let body = match maybe_gunzip(&headers, body) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(%request_id, repo, error = %e, "rejected receive-pack request body");
            return error_response(StatusCode::BAD_REQUEST, e);
        }
    };

    let reader = InMemoryAsyncReader(std::io::Cursor::new(body.to_vec()));

    match push::handle_stream(&state.services, &state.pool, repo, &auth_username, reader).await {
        Ok(outcome) => {
            tracing::info!(%request_id, repo, note_id = %outcome.note.id_hex(), "push admitted");

            let mut response_body = axum::body::BytesMut::new();
            response_body.extend_from_slice(&outcome.report);
            crate::protocol::utils::add_pkt_line_string(
                &mut response_body,
                format!("tx-id {}\n", outcome.note.id_hex()),
            );
            response_body.extend_from_slice(crate::protocol::types::PKT_LINE_END_MARKER);

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/x-git-receive-pack-result")
                .header("X-TxID", outcome.note.id_hex())
                .header("X-Request-Id", request_id.to_string())
                .body(Body::from(response_body.freeze()))
                .unwrap()
        }
        Err(e) => {
            tracing::warn!(%request_id, repo, error = %e, "push rejected");
            error_response(push_error_status(&e), e)
        }
    }
}

fn push_error_status(err: &crate::errors::PushError) -> StatusCode {
    use crate::errors::PushError::*;
    match err {
        NotAContributor(_) | UnknownPushKey(_) | BadSignature(_) | NotAuthorized(_, _) | MergeProposalRejected(_, _) => {
            StatusCode::FORBIDDEN
        }
        MalformedToken | MissingToken(_) | InconsistentMultiRef(_) | TxDetailMismatch(_, _) | MalformedRef(_) => {
            StatusCode::BAD_REQUEST
        }
        FullPool | DuplicateNote(_) | StalerNonceAlreadyStaged(_) | InferiorFeeRBF(_) => StatusCode::CONFLICT,
        QuorumNotReached { .. } => StatusCode::ACCEPTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// The request body is already fully buffered by axum; [`push::handle_stream`] wants an
/// `AsyncRead` (so it can equally be fed by the P2P reactor's replay path), so this adapts an
/// in-memory cursor rather than re-introducing a second streaming abstraction for one call site.
struct InMemoryAsyncReader(std::io::Cursor<Vec<u8>>);

impl tokio::io::AsyncRead for InMemoryAsyncReader {
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

fn extract_basic_auth_username(headers: &HeaderMap) -> Result<String, ProtocolError> {
    let raw = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| ProtocolError::unauthorized("missing Authorization header"))?
        .to_str()
        .map_err(|_| ProtocolError::unauthorized("non-UTF8 Authorization header"))?;
    let encoded = raw
        .strip_prefix("Basic ")
        .ok_or_else(|| ProtocolError::unauthorized("Authorization header is not Basic"))?;
    let decoded =
        base64_decode(encoded).map_err(|_| ProtocolError::unauthorized("malformed base64 in Authorization header"))?;
    let text = String::from_utf8(decoded).map_err(|_| ProtocolError::unauthorized("non-UTF8 credentials"))?;
    let (username, _password) = text
        .split_once(':')
        .ok_or_else(|| ProtocolError::unauthorized("malformed Basic credentials"))?;
    Ok(username.to_string())
}

/// Minimal standard-base64 decode (distinct from this crate's base58 push-token encoding), kept
/// local so the HTTP layer doesn't need a dedicated base64 crate for one header.
fn base64_decode(input: &str) -> Result<Vec<u8>, ()> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut table = [255u8; 256];
    for (i, &b) in ALPHABET.iter().enumerate() {
        table[b as usize] = i as u8;
    }

    let input = input.trim_end_matches('=');
    let mut bits: u32 = 0;
    let mut bit_count = 0u32;
    let mut out = Vec::with_capacity(input.len() * 3 / 4 + 1);
    for c in input.bytes() {
        let val = table[c as usize];
        if val == 255 {
            return Err(());
        }
        bits = (bits << 6) | val as u32;
        bit_count += 6;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }
    Ok(out)
}

/// `GET (.*)/HEAD` and other static/loose/pack/idx paths: sendfile straight from the repo
/// directory, cached forever for content-addressed objects.
async fn serve_static(state: Arc<AppState>, full_path: &str) -> Response {
    let trimmed = full_path.trim_start_matches('/');
    // The last path segment is the file to serve (HEAD, objects/xx/yyyy..., objects/pack/*.pack,
    // etc); everything before it is the repo name.
    let Some(slash) = trimmed.rfind('/') else {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    };
    let (repo, rel_path) = trimmed.split_at(slash);
    let rel_path = rel_path.trim_start_matches('/');
    if rel_path.contains("..") {
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    }

    let repo_dir = state.services.repo_dir(repo);
    let file_path: PathBuf = repo_dir.join(rel_path);

    match tokio::fs::read(&file_path).await {
        Ok(bytes) => {
            let cache_forever = rel_path.starts_with("objects/");
            let mut builder = Response::builder().status(StatusCode::OK);
            builder = if cache_forever {
                builder.header(header::CACHE_CONTROL, "public, max-age=31536000, immutable")
            } else {
                builder.header(header::CACHE_CONTROL, "no-cache")
            };
            builder.body(Body::from(bytes)).unwrap()
        }
        Err(_) => (StatusCode::NOT_FOUND, "object not found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_known_suffixes() {
        assert_eq!(split_known_suffix("/org/repo/info/refs"), Some(("org/repo", "/info/refs")));
        assert_eq!(
            split_known_suffix("/repo/git-upload-pack"),
            Some(("repo", "/git-upload-pack"))
        );
        assert_eq!(split_known_suffix("/repo/HEAD"), None);
    }

    #[test]
    fn base64_round_trips_basic_auth_style_text() {
        // "pk1token:-" base64-encoded, matching the Basic credential shape spec §6 describes.
        let encoded = "cGsxdG9rZW46LQ==";
        let decoded = base64_decode(encoded).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), "pk1token:-");
    }
}
