//! Git smart-protocol plumbing: wire types, pkt-line helpers, and the axum-based HTTP front
//! (C9) that speaks them over `/info/refs`, `/git-upload-pack`, and `/git-receive-pack`.

pub mod http;
pub mod types;
pub mod utils;

pub use types::*;
