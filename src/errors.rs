//! Error types for the Git-Internal crate.
//!
//! This module defines a unified error enumeration used across object parsing,
//! pack encoding/decoding, index handling, caching, and streaming. It integrates
//! with `thiserror` to provide rich `Display` implementations and error source
//! chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Variants cover parse/validation, I/O, encoding/decoding, network/auth,
//!   and custom errors.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the Git-Internal library.
///
/// - Used across object parsing, pack encode/decode, index, caching and streams.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// Invalid or unsupported git object type name.
    #[error("The `{0}` is not a valid git object type.")]
    InvalidObjectType(String),

    /// Malformed or unsupported blob object encoding.
    #[error("The `{0}` is not a valid git blob object.")]
    InvalidBlobObject(String),

    /// Malformed tree object.
    #[error("Not a valid git tree object.")]
    InvalidTreeObject,

    /// Invalid tree entry (mode/name/hash).
    #[error("The `{0}` is not a valid git tree item.")]
    InvalidTreeItem(String),

    /// Tree contains no entries.
    #[error("`{0}`.")]
    EmptyTreeItems(String),

    /// Invalid commit signature type.
    #[error("The `{0}` is not a valid git commit signature.")]
    InvalidSignatureType(String),

    /// Malformed commit object.
    #[error("Not a valid git commit object.")]
    InvalidCommitObject,

    /// Commit parse or validation failed.
    #[error("Invalid Commit: {0}")]
    InvalidCommit(String),

    /// Malformed tag object.
    #[error("Not a valid git tag object: {0}")]
    InvalidTagObject(String),

    /// Malformed note object.
    #[error("Not a valid git note object: {0}")]
    InvalidNoteObject(String),

    /// Malformed or unsupported index (.idx) file.
    #[error("The `{0}` is not a valid idx file.")]
    InvalidIdxFile(String),

    /// Malformed or unsupported pack file.
    #[error("The `{0}` is not a valid pack file.")]
    InvalidPackFile(String),

    /// Invalid pack header magic or version.
    #[error("The `{0}` is not a valid pack header.")]
    InvalidPackHeader(String),

    /// Malformed or unsupported git index file.
    #[error("The `{0}` is not a valid index file.")]
    InvalidIndexFile(String),

    /// Invalid git index header.
    #[error("The `{0}` is not a valid index header.")]
    InvalidIndexHeader(String),

    /// Invalid CLI or function argument.
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),

    /// I/O error from underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    /// Invalid SHA1 hash formatting or value.
    #[error("The {0} is not a valid Hash value ")]
    InvalidHashValue(String),

    /// Delta object reconstruction error.
    #[error("Delta Object Error Info:{0}")]
    DeltaObjectError(String),

    /// Object not fully populated for packing.
    #[error("The object to be packed is incomplete ,{0}")]
    UnCompletedPackObject(String),

    /// Invalid decoded object info.
    #[error("Error decode in the Object ,info:{0}")]
    InvalidObjectInfo(String),

    /// Hash not found in current file context.
    #[error("Cannot find Hash value: {0} from current file")]
    NotFoundHashValue(String),

    /// Failed to encode object to bytes.
    #[error("Can't encode the object which id [{0}] to bytes")]
    EncodeObjectError(String),

    /// Text encoding or UTF-8 conversion error.
    #[error("UTF-8 conversion error: {0}")]
    ConversionError(String),

    /// Invalid path when locating parent tree.
    #[error("Can't find parent tree by path: {0}")]
    InvalidPathError(String),

    /// Failed to encode pack entries.
    #[error("Can't encode entries to pack: {0}")]
    PackEncodeError(String),

    /// Object missing from caches or storage.
    #[error("Can't find specific object: {0}")]
    ObjectNotFound(String),

    /// Repository not found.
    #[error("Repository not found")]
    RepoNotFound,

    /// Unauthorized access.
    #[error("UnAuthorized: {0}")]
    UnAuthorized(String),

    /// Network communication error.
    #[error("Network Error: {0}")]
    NetworkError(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    CustomError(String),
}

#[derive(Error, Debug, Clone)]
/// Error taxonomy for the push pipeline: token authentication, per-reference validation,
/// policy enforcement, pool admission, and P2P propagation.
///
/// Each variant maps to one failure named in the push pipeline's error handling design;
/// callers pattern-match on these to decide HTTP status codes and sideband framing.
pub enum PushError {
    /// Push token failed to base58-decode or deserialize.
    #[error("malformed push token")]
    MalformedToken,

    /// A reference in the pushed pack has no corresponding push token.
    #[error("missing push token for reference `{0}`")]
    MissingToken(String),

    /// Tokens in a multi-reference push disagree on pushKeyID/repo/namespace/nonce.
    #[error("inconsistent push tokens across references: {0}")]
    InconsistentMultiRef(String),

    /// The push key is not a contributor of the target repository or namespace.
    #[error("push key `{0}` is not a contributor of this repository")]
    NotAContributor(String),

    /// No public key is registered for a push key id.
    #[error("unknown push key `{0}`")]
    UnknownPushKey(String),

    /// A commit/tag/note signature failed to verify against the declared push key.
    #[error("bad signature on reference `{0}`")]
    BadSignature(String),

    /// Embedded transaction detail (fee/nonce/reference/mergeProposalID) did not match the token.
    #[error("transaction detail mismatch on reference `{0}`: {1}")]
    TxDetailMismatch(String, String),

    /// Policy enforcement denied the action.
    #[error("not authorized to {1} on `{0}`")]
    NotAuthorized(String, String),

    /// A reference name could not be classified as branch/tag/note.
    #[error("unrecognised change item `{0}`")]
    MalformedRef(String),

    /// Pool is at capacity.
    #[error("push pool is full")]
    FullPool,

    /// A note with this id is already staged.
    #[error("duplicate push note `{0}`")]
    DuplicateNote(String),

    /// A higher nonce is already staged for this (repo, ref).
    #[error("staler nonce already staged for `{0}`")]
    StalerNonceAlreadyStaged(String),

    /// Replace-by-fee requires a strictly higher total fee.
    #[error("inferior fee for replace-by-fee on `{0}`")]
    InferiorFeeRBF(String),

    /// The note validator rejected the note.
    #[error("invalid push note: {0}")]
    InvalidNote(String),

    /// The merge-compliance hook rejected a reference carrying a `mergeProposalID`.
    #[error("merge proposal rejected on `{0}`: {1}")]
    MergeProposalRejected(String, String),

    /// `git receive-pack` (or another git subprocess) exited non-zero or could not be spawned.
    #[error("git subprocess failed: {0}")]
    GitSubprocessFailure(String),

    /// Reverting the repository to its pre-push snapshot failed; state may have diverged.
    #[error("revert failed: {0}")]
    RevertFailure(String),

    /// Not enough endorsements have been collected yet (transient, retry later).
    #[error("quorum not reached: have {have}, need {need}")]
    QuorumNotReached { have: usize, need: usize },
}
