#![deny(missing_docs)]
//! A protocol independent file transfer server core for Rust.
//!
//! libtransfer implements the connection object that multi-protocol file
//! transfer servers (SFTP, FTP, WebDAV, HTTP) put between their protocol
//! handlers and the storage backends. A connection exposes a single logical
//! per-user file tree, the union of the user's home directory and any number
//! of virtual folders, each served by its own [storage backend]. It enforces
//! per-path permissions, routes paths across virtual folder mounts, accounts
//! quota usage, emulates cross-backend renames and translates backend errors
//! to the error surface of the protocol in use.
//!
//! Because of its pluggable storage backends (local filesystem, encrypted
//! local filesystem, or anything implementing the backend trait) it can sit
//! at the core of traditional servers as well as cloud gateways.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use libtransfer::auth::{Permission, User};
//! use libtransfer::provider::MemoryProvider;
//! use libtransfer::server::{Connection, Protocol};
//!
//! let mut user = User::new("alice", "/srv/data/alice");
//! user.permissions.insert("/".to_string(), vec![Permission::Any]);
//!
//! let provider = Arc::new(MemoryProvider::new());
//! let conn = Connection::new("c1", Protocol::Sftp, "127.0.0.1:22", "10.0.0.1:1234", user, provider);
//! assert_eq!(conn.username(), "alice");
//! ```
//!
//! [storage backend]: storage/trait.StorageBackend.html

pub mod auth;
pub mod provider;
pub mod server;
pub mod storage;
pub(crate) mod util;

pub use crate::server::connection::Connection;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
