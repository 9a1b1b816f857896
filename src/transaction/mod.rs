//! The transaction contract and its hierarchical composer.
//!
//! A publish is a collection of transactions plus transformations of the
//! data flowing between stages. Committed transactions may be rolled back
//! when that makes sense: a copied file can be deleted again, but a deleted
//! file cannot be brought back.
//!
//! Two transactions ship with the crate:
//!
//! - [`FilesystemTransaction`](crate::fs::FilesystemTransaction): copies,
//!   moves, links, deletes, creates directories and changes ownership or
//!   permissions.
//! - [`RootTransaction`]: groups other transactions into sequential groups
//!   whose members run concurrently.

mod root;

pub use root::RootTransaction;

use crate::error::Result;
use crate::value::Value;
use async_trait::async_trait;

/// A unit of work that can be committed and compensated.
///
/// The engine never commits the same instance twice, and rolls back at most
/// once per commit attempt, whether that attempt succeeded or not.
#[async_trait]
pub trait Transaction: Send {
    /// Applies the transaction's effect.
    async fn commit(&mut self) -> Result<()>;

    /// Undoes a previously attempted commit as far as possible.
    async fn rollback(&mut self) -> Result<()>;

    /// Result produced by the transaction, if any.
    fn value(&self) -> Option<Value> {
        None
    }
}
