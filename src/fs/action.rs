//! Recorded filesystem actions and how each one is executed.

use crate::error::{Error, Result};
use crate::fs::path::{resolve_within, resolve_within_followed};
use crate::fs::permissions::Permissions;

use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A filesystem action recorded by a
/// [`FilesystemTransaction`](super::FilesystemTransaction).
///
/// `RollbackMove` is only ever produced as the inverse of `Move`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesystemAction {
    Copy {
        source: PathBuf,
        target: PathBuf,
    },
    Move {
        source: PathBuf,
        target: PathBuf,
    },
    RollbackMove {
        source: PathBuf,
        target: PathBuf,
    },
    HardLink {
        source: PathBuf,
        target: PathBuf,
    },
    SoftLink {
        source: PathBuf,
        target: PathBuf,
    },
    CreateDirectory(PathBuf),
    Delete(PathBuf),
    ChangeOwnerPermissions {
        path: PathBuf,
        user: Option<String>,
        group: Option<String>,
        permissions: Option<Permissions>,
    },
}

/// Batch class of an action. Consecutive actions of the same kind run
/// concurrently; a change of kind is a sequential boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActionKind {
    Transfer,
    SoftLink,
    CreateDirectory,
    Delete,
    ChangeOwnerPermissions,
}

impl FilesystemAction {
    pub(crate) fn kind(&self) -> ActionKind {
        match self {
            Self::Copy { .. }
            | Self::Move { .. }
            | Self::RollbackMove { .. }
            | Self::HardLink { .. } => ActionKind::Transfer,
            Self::SoftLink { .. } => ActionKind::SoftLink,
            Self::CreateDirectory(_) => ActionKind::CreateDirectory,
            Self::Delete(_) => ActionKind::Delete,
            Self::ChangeOwnerPermissions { .. } => ActionKind::ChangeOwnerPermissions,
        }
    }

    /// Inverse that needs no filesystem state.
    ///
    /// Returns `None` for `Delete`, which cannot be undone, and for ownership
    /// changes, whose inverse is a snapshot taken at commit time.
    pub(crate) fn static_inverse(&self) -> Option<Self> {
        match self {
            Self::Copy { target, .. }
            | Self::HardLink { target, .. }
            | Self::SoftLink { target, .. } => Some(Self::Delete(target.clone())),
            Self::CreateDirectory(path) => Some(Self::Delete(path.clone())),
            Self::Move { source, target } => Some(Self::RollbackMove {
                source: source.clone(),
                target: target.clone(),
            }),
            Self::RollbackMove { source, target } => Some(Self::Move {
                source: source.clone(),
                target: target.clone(),
            }),
            Self::Delete(_) | Self::ChangeOwnerPermissions { .. } => None,
        }
    }

    /// Performs the action. Root-relative paths are validated before any I/O.
    pub(crate) async fn execute(&self, root: &Path) -> Result<()> {
        log::debug!("Executing {}", self);

        match self {
            Self::Copy { source, target } => run_copy(root, source, target).await,
            Self::Move { source, target } => {
                let target = resolve_within(root, target)?;
                ensure_vacant(&target).await?;
                fs::rename(source, &target).await?;
                Ok(())
            }
            Self::RollbackMove { source, target } => {
                let target = resolve_within(root, target)?;
                ensure_vacant(source).await?;
                fs::rename(&target, source).await?;
                Ok(())
            }
            Self::HardLink { source, target } => {
                let source = resolve_within_followed(root, source)?;
                let target = resolve_within(root, target)?;
                fs::hard_link(&source, &target).await?;
                Ok(())
            }
            Self::SoftLink { source, target } => {
                let source = resolve_within_followed(root, source)?;
                let target = resolve_within(root, target)?;
                soft_link(source, target).await
            }
            Self::CreateDirectory(path) => {
                let path = resolve_within(root, path)?;
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::create_dir(&path).await?;
                Ok(())
            }
            Self::Delete(path) => run_delete(root, path).await,
            Self::ChangeOwnerPermissions {
                path,
                user,
                group,
                permissions,
            } => {
                let path = resolve_within_followed(root, path)?;
                let user = user.clone();
                let group = group.clone();
                let permissions = *permissions;

                tokio::task::spawn_blocking(move || {
                    change_owner_permissions(&path, user.as_deref(), group.as_deref(), permissions)
                })
                .await?
            }
        }
    }
}

impl fmt::Display for FilesystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { source, target } => {
                write!(f, "Copy: {} → {}", source.display(), target.display())
            }
            Self::Move { source, target } => {
                write!(f, "Move: {} → {}", source.display(), target.display())
            }
            Self::RollbackMove { source, target } => {
                write!(f, "Move back: {} → {}", target.display(), source.display())
            }
            Self::HardLink { source, target } => {
                write!(f, "Hard link: {} → {}", target.display(), source.display())
            }
            Self::SoftLink { source, target } => {
                write!(f, "Soft link: {} → {}", target.display(), source.display())
            }
            Self::CreateDirectory(path) => write!(f, "Create directory: {}", path.display()),
            Self::Delete(path) => write!(f, "Delete: {}", path.display()),
            Self::ChangeOwnerPermissions {
                path,
                user,
                group,
                permissions,
            } => {
                write!(f, "Change owner/permissions: {}", path.display())?;
                if let Some(user) = user {
                    write!(f, " user={user}")?;
                }
                if let Some(group) = group {
                    write!(f, " group={group}")?;
                }
                if let Some(permissions) = permissions {
                    write!(f, " mode={:03o}", permissions.as_mode())?;
                }
                Ok(())
            }
        }
    }
}

async fn run_copy(root: &Path, source: &Path, target: &Path) -> Result<()> {
    let target = resolve_within(root, target)?;
    let metadata = fs::metadata(source).await?;

    if metadata.is_dir() {
        let source = source.to_path_buf();
        tokio::task::spawn_blocking(move || copy_dir_recursive(&source, &target)).await?
    } else if metadata.is_file() {
        copy_file(source, &target, metadata.permissions()).await
    } else {
        Err(Error::InvalidFileType(source.to_path_buf()))
    }
}

/// Copies a regular file to a target that must not exist yet.
async fn copy_file(source: &Path, target: &Path, permissions: std::fs::Permissions) -> Result<()> {
    let mut from = fs::File::open(source).await?;
    let mut to = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await?;

    if let Err(err) = tokio::io::copy(&mut from, &mut to).await {
        drop(to);
        if let Err(cleanup) = fs::remove_file(target).await {
            log::warn!("Failed to remove partial copy {}: {}", target.display(), cleanup);
        }
        return Err(err.into());
    }

    fs::set_permissions(target, permissions).await?;
    Ok(())
}

/// Fails with `AlreadyExists` if anything, including a dangling symlink,
/// is at `path`.
async fn ensure_vacant(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn run_delete(root: &Path, path: &Path) -> Result<()> {
    let path = resolve_within(root, path)?;
    let metadata = fs::symlink_metadata(&path).await?;
    let file_type = metadata.file_type();

    if file_type.is_symlink() || file_type.is_file() {
        fs::remove_file(&path).await?;
        Ok(())
    } else if file_type.is_dir() {
        fs::remove_dir_all(&path).await?;
        Ok(())
    } else {
        Err(Error::InvalidFileType(path))
    }
}

/// Recursively copies a directory tree. The target must not exist yet.
fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir(to)?;

    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let from_path = entry.path();
        let to_path = to.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_recursive(&from_path, &to_path)?;
        } else if file_type.is_symlink() {
            copy_symlink(&from_path, &to_path)?;
        } else if file_type.is_file() {
            std::fs::copy(&from_path, &to_path)?;
        } else {
            return Err(Error::InvalidFileType(from_path));
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    let link = std::fs::read_link(from)?;
    std::os::unix::fs::symlink(link, to)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    std::fs::copy(from, to)?;
    Ok(())
}

#[cfg(unix)]
async fn soft_link(source: PathBuf, target: PathBuf) -> Result<()> {
    fs::symlink(&source, &target).await?;
    Ok(())
}

#[cfg(windows)]
async fn soft_link(source: PathBuf, target: PathBuf) -> Result<()> {
    let metadata = fs::metadata(&source).await?;

    if metadata.is_file() {
        fs::symlink_file(&source, &target).await?;
        Ok(())
    } else if metadata.is_dir() {
        fs::symlink_dir(&source, &target).await?;
        Ok(())
    } else {
        Err(Error::InvalidFileType(source))
    }
}

#[cfg(not(any(unix, windows)))]
async fn soft_link(_source: PathBuf, _target: PathBuf) -> Result<()> {
    Err(Error::Unsupported("Soft links"))
}

#[cfg(unix)]
fn change_owner_permissions(
    path: &Path,
    user: Option<&str>,
    group: Option<&str>,
    permissions: Option<Permissions>,
) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if user.is_some() || group.is_some() {
        let uid = user.map(lookup_uid).transpose()?;
        let gid = group.map(lookup_gid).transpose()?;
        std::os::unix::fs::chown(path, uid, gid)?;
    }

    if let Some(permissions) = permissions {
        let mut current = std::fs::metadata(path)?.permissions();
        current.set_mode(permissions.apply_to_mode(current.mode()));
        std::fs::set_permissions(path, current)?;
    }

    Ok(())
}

#[cfg(not(unix))]
fn change_owner_permissions(
    _path: &Path,
    _user: Option<&str>,
    _group: Option<&str>,
    _permissions: Option<Permissions>,
) -> Result<()> {
    Err(Error::Unsupported("Changing owner and permissions"))
}

#[cfg(unix)]
fn lookup_uid(name: &str) -> Result<u32> {
    nix::unistd::User::from_name(name)?
        .map(|user| user.uid.as_raw())
        .ok_or_else(|| Error::UnknownUser(name.to_string()))
}

#[cfg(unix)]
fn lookup_gid(name: &str) -> Result<u32> {
    nix::unistd::Group::from_name(name)?
        .map(|group| group.gid.as_raw())
        .ok_or_else(|| Error::UnknownGroup(name.to_string()))
}

/// Captures the current owner, group and permission bits of `path` as an
/// action that restores them.
#[cfg(unix)]
pub(crate) async fn snapshot_owner_permissions(
    root: &Path,
    path: &Path,
) -> Result<FilesystemAction> {
    use nix::unistd::{Gid, Group, Uid, User};
    use std::os::unix::fs::MetadataExt;

    let resolved = resolve_within_followed(root, path)?;
    let metadata = fs::metadata(&resolved).await?;
    let (uid, gid, mode) = (metadata.uid(), metadata.gid(), metadata.mode());

    let (user, group) = tokio::task::spawn_blocking(move || -> Result<_> {
        let user = User::from_uid(Uid::from_raw(uid))?.map(|u| u.name);
        let group = Group::from_gid(Gid::from_raw(gid))?.map(|g| g.name);
        Ok((user, group))
    })
    .await??;

    if user.is_none() || group.is_none() {
        log::debug!(
            "Owner of {} has no name (uid {}, gid {}); it will not be restored",
            resolved.display(),
            uid,
            gid
        );
    }

    Ok(FilesystemAction::ChangeOwnerPermissions {
        path: path.to_path_buf(),
        user,
        group,
        permissions: Some(Permissions::from_mode(mode)),
    })
}

#[cfg(not(unix))]
pub(crate) async fn snapshot_owner_permissions(
    _root: &Path,
    _path: &Path,
) -> Result<FilesystemAction> {
    Err(Error::Unsupported("Ownership and permission rollback"))
}
