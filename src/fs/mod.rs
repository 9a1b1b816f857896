//! File system operations with transaction support.
//!
//! Records copies, moves, links, deletions, directory creation and
//! ownership changes inside a root directory, executes them as one commit,
//! and can undo everything except deletions.

mod action;
pub mod path;
pub mod permissions;
pub mod transaction;

pub use action::FilesystemAction;
pub use path::{resolve_within, resolve_within_followed};
pub use permissions::{Permission, Permissions, ScopedPermissions, UnixPermissions};
pub use transaction::FilesystemTransaction;
