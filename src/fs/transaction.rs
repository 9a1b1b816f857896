//! Batched filesystem mutations with automatic inverse actions.
//!
//! ## Execution Guarantees
//!
//! - **Ordering**: Actions run in the order they were recorded, except that
//!   consecutive actions of the same kind form one concurrent batch
//! - **Jail**: Every root-relative path is checked before its I/O
//! - **Inverses**: Each action that actually ran leaves an inverse behind,
//!   except deletions, which are irreversible
//!
//! ## Batching
//!
//! Copies, moves and hard links share one kind; soft links, directory
//! creation, deletion and ownership changes each have their own. Recording
//! `copy A, copy B, delete C, copy D` runs `[A, B]` concurrently, then `[C]`,
//! then `[D]`.
//!
//! ## Example
//!
//! ```no_run
//! # use txpublish::fs::FilesystemTransaction;
//! # use txpublish::Transaction;
//! # async fn example() -> txpublish::Result<()> {
//! let mut txn = FilesystemTransaction::new("/srv/assets/chair/v003");
//!
//! txn.create_directory("textures");
//! txn.copy_path("/scratch/chair/wood.png", "textures/wood.png");
//! txn.soft_link_path("textures/wood.png", "preview.png");
//!
//! if let Err(err) = txn.commit().await {
//!     txn.rollback().await?;
//!     return Err(err);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::fs::action::{FilesystemAction, snapshot_owner_permissions};
use crate::fs::permissions::Permissions;
use crate::transaction::Transaction;
use crate::value::Value;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;

/// Transaction over the contents of one root directory.
///
/// Copy and move sources may live anywhere; every other path must resolve
/// inside the root. Links are confined to the root on both ends because the
/// root is treated as a self-contained, immutable package while anything
/// outside it may still change.
pub struct FilesystemTransaction {
    root_dir: PathBuf,
    commit_actions: Vec<FilesystemAction>,
    /// Inverses of the last commit, one entry per executed batch.
    rollback_batches: Vec<Vec<FilesystemAction>>,
}

impl FilesystemTransaction {
    /// Creates an empty transaction rooted at `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            commit_actions: Vec::new(),
            rollback_batches: Vec::new(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Copies `source` (file or directory tree) to `target` inside the root.
    ///
    /// Rolling back deletes the target.
    pub fn copy_path(&mut self, source: impl AsRef<Path>, target: impl AsRef<Path>) {
        self.commit_actions.push(FilesystemAction::Copy {
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
        });
    }

    /// Moves `source` to `target` inside the root.
    ///
    /// Rolling back moves it back to `source`.
    pub fn move_path(&mut self, source: impl AsRef<Path>, target: impl AsRef<Path>) {
        self.commit_actions.push(FilesystemAction::Move {
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
        });
    }

    /// Hard links `target` to `source`, both inside the root.
    ///
    /// Rolling back deletes the target.
    pub fn hard_link_path(&mut self, source: impl AsRef<Path>, target: impl AsRef<Path>) {
        self.commit_actions.push(FilesystemAction::HardLink {
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
        });
    }

    /// Creates a symlink at `target` pointing to `source`, both inside the
    /// root.
    ///
    /// Rolling back deletes the link.
    pub fn soft_link_path(&mut self, source: impl AsRef<Path>, target: impl AsRef<Path>) {
        self.commit_actions.push(FilesystemAction::SoftLink {
            source: source.as_ref().to_path_buf(),
            target: target.as_ref().to_path_buf(),
        });
    }

    /// Changes owner, group and/or permission bits of `path`.
    ///
    /// `None` leaves that attribute alone, as does [`Permission::Unchanged`]
    /// for a single bit. Rolling back restores what was there when the
    /// transaction was committed.
    ///
    /// [`Permission::Unchanged`]: crate::fs::Permission::Unchanged
    pub fn change_owner_permissions(
        &mut self,
        path: impl AsRef<Path>,
        user: Option<&str>,
        group: Option<&str>,
        permissions: Option<Permissions>,
    ) {
        self.commit_actions
            .push(FilesystemAction::ChangeOwnerPermissions {
                path: path.as_ref().to_path_buf(),
                user: user.map(str::to_string),
                group: group.map(str::to_string),
                permissions,
            });
    }

    /// Creates a directory and any missing parents.
    ///
    /// Rolling back deletes the directory.
    pub fn create_directory(&mut self, path: impl AsRef<Path>) {
        self.commit_actions
            .push(FilesystemAction::CreateDirectory(path.as_ref().to_path_buf()));
    }

    /// Deletes a file, symlink or directory tree.
    ///
    /// Cannot be rolled back.
    pub fn delete_path(&mut self, path: impl AsRef<Path>) {
        self.commit_actions
            .push(FilesystemAction::Delete(path.as_ref().to_path_buf()));
    }

    pub fn len(&self) -> usize {
        self.commit_actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commit_actions.is_empty()
    }

    /// Recorded actions, in order.
    pub fn actions(&self) -> &[FilesystemAction] {
        &self.commit_actions
    }

    /// Returns human-readable preview of recorded actions.
    pub fn preview(&self) -> Vec<String> {
        self.commit_actions.iter().map(ToString::to_string).collect()
    }
}

/// Runs `actions` concurrently and waits for all of them.
///
/// Returns which actions succeeded, plus the first failure observed.
async fn run_cohort(root: &Path, actions: &[FilesystemAction]) -> (Vec<bool>, Result<()>) {
    let mut tasks = JoinSet::new();

    for (index, action) in actions.iter().cloned().enumerate() {
        let root = root.to_path_buf();
        tasks.spawn(async move { (index, action.execute(&root).await) });
    }

    let mut succeeded = vec![false; actions.len()];
    let mut first_error: Option<Error> = None;

    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok((index, result)) => {
                succeeded[index] = result.is_ok();
                result
            }
            Err(err) => Err(Error::from(err)),
        };

        if let Err(err) = result {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                log::warn!("Additional failure in batch: {}", err);
            }
        }
    }

    let outcome = match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    };

    (succeeded, outcome)
}

/// Splits `actions` into runs of consecutive actions of the same kind.
///
/// The actions of one run execute concurrently; runs execute in order.
pub(crate) fn batches(actions: &[FilesystemAction]) -> Vec<&[FilesystemAction]> {
    actions.chunk_by(|a, b| a.kind() == b.kind()).collect()
}

/// Inverse of `action`, snapshotting ownership from disk where needed.
async fn inverse_of(root: &Path, action: &FilesystemAction) -> Result<Option<FilesystemAction>> {
    match action {
        FilesystemAction::ChangeOwnerPermissions { path, .. } => {
            Ok(Some(snapshot_owner_permissions(root, path).await?))
        }
        other => Ok(other.static_inverse()),
    }
}

/// Executes one commit batch and records the inverses of the actions that
/// ran.
async fn commit_batch(
    root: &Path,
    batch: &[FilesystemAction],
    rollback_batches: &mut Vec<Vec<FilesystemAction>>,
) -> Result<()> {
    let mut inverses = Vec::with_capacity(batch.len());
    for action in batch {
        inverses.push(inverse_of(root, action).await?);
    }

    log::debug!("Committing batch of {} actions", batch.len());
    let (succeeded, outcome) = run_cohort(root, batch).await;

    let inverses: Vec<FilesystemAction> = inverses
        .into_iter()
        .zip(succeeded)
        .filter_map(|(inverse, ok)| if ok { inverse } else { None })
        .collect();

    if !inverses.is_empty() {
        rollback_batches.push(inverses);
    }

    outcome
}

#[async_trait]
impl Transaction for FilesystemTransaction {
    async fn commit(&mut self) -> Result<()> {
        self.rollback_batches.clear();

        for batch in batches(&self.commit_actions) {
            commit_batch(&self.root_dir, batch, &mut self.rollback_batches).await?;
        }

        log::debug!(
            "Committed {} actions in {}",
            self.commit_actions.len(),
            self.root_dir.display()
        );
        Ok(())
    }

    /// Undoes the last commit, newest batch first.
    ///
    /// Inside a batch, consecutive inverses of the same kind run
    /// concurrently. The first failing cohort stops the rollback.
    async fn rollback(&mut self) -> Result<()> {
        log::debug!(
            "Rolling back {} batches in {}",
            self.rollback_batches.len(),
            self.root_dir.display()
        );

        for batch in self.rollback_batches.iter().rev() {
            for cohort in batches(batch) {
                let (_, outcome) = run_cohort(&self.root_dir, cohort).await;
                outcome?;
            }
        }

        Ok(())
    }

    fn value(&self) -> Option<Value> {
        Some(Value::Array(
            self.preview().into_iter().map(Value::String).collect(),
        ))
    }
}
