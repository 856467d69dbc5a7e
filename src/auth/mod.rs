#![deny(missing_docs)]
//! Contains the [`User`] record and the [`Permission`] atoms the connection
//! core enforces.
//!
//! A user is resolved by the authentication layer and attached to a
//! connection as an immutable snapshot. Besides identity it carries the
//! per-directory permission map, the upload filters, the backend
//! configuration for the home directory and the ordered list of virtual
//! folders that make up the user's virtual tree.

mod permissions;
pub use permissions::Permission;

mod user;
pub use user::{User, UserFilters};
