//! Contains the protocol independent [`Connection`] object and everything it
//! needs: the protocol identifiers, the process wide configuration and the
//! error surface handed back to protocol handlers.
//!
//! [`Connection`]: connection/struct.Connection.html

pub mod config;
pub mod connection;
pub mod error;
mod proto;

pub use config::{Config, SetstatMode};
pub use connection::{Connection, StatAttributes};
pub use error::{ConnectionError, StatusCode};
pub use proto::Protocol;
