//! `decentra-git` is the core of a decentralized Git hosting node: it mediates between Git
//! clients speaking the Smart HTTP protocol and a blockchain consensus layer that owns the
//! authoritative state of repositories, their contributors, and their access policies.
//!
//! A push is never applied directly. It is turned into a [`pushnote::PushNote`] — a signed,
//! fee-bearing object that circulates on a P2P overlay via the [`reactor`], is endorsed by a
//! quorum of storage nodes, and only then is handed to the external mempool for block
//! inclusion. [`event_loop`] later replays committed notes through the same receive-pack
//! machinery used for the original push, making them permanent.
//!
//! The crate never reimplements Git's object model, packfile encoder, or wire protocol: the
//! `git` executable is invoked as a child process throughout (see [`mediator`] and [`state`]).
//! [`internal::object`] only interprets bytes already produced by `git cat-file`.

pub mod cli;
pub mod config;
pub mod errors;
pub mod event_loop;
pub mod hash;
pub mod internal;
pub mod mediator;
pub mod node;
pub mod policy;
pub mod pool;
pub mod protocol;
pub mod push;
pub mod pushnote;
pub mod reactor;
pub mod state;
pub mod token;
pub mod validator;
