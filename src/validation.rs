//! Pre-flight checks for the publish command.

use crate::error::{Error, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Validates a package name used as a directory under the publish root.
pub fn validate_package_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid_name(name, "cannot be empty"));
    }

    if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid_name(name, "must start with a letter or digit"));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid_name(
            name,
            "can only contain letters, numbers, dots, hyphens, and underscores",
        ));
    }

    if name.len() > 64 {
        return Err(invalid_name(name, "exceeds maximum length of 64 characters"));
    }

    Ok(())
}

fn invalid_name(name: &str, reason: &str) -> Error {
    Error::Other(anyhow::anyhow!("Invalid package name '{}': {}", name, reason))
}

/// Derives the package name from the first source when none is given.
pub fn default_package_name(sources: &[PathBuf]) -> Result<String> {
    sources
        .first()
        .and_then(|source| source.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Other(anyhow::anyhow!("Cannot derive a package name from sources")))
}

/// Checks that every source exists and has a file name to publish under,
/// and that no two sources would be published under the same name.
pub fn validate_sources(sources: &[PathBuf]) -> Result<()> {
    let mut names = HashSet::new();

    for source in sources {
        let Some(name) = source.file_name() else {
            return Err(Error::Other(anyhow::anyhow!(
                "Source {} has no file name",
                source.display()
            )));
        };

        if !names.insert(name) {
            return Err(Error::Other(anyhow::anyhow!(
                "Sources share the file name '{}': {}",
                name.to_string_lossy(),
                source.display()
            )));
        }

        if !source.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Source does not exist: {}", source.display()),
            )));
        }
    }

    Ok(())
}

/// Checks that the publish root is a directory, if it exists at all.
pub fn validate_root(root: &Path) -> Result<()> {
    if root.exists() && !root.is_dir() {
        return Err(Error::InvalidFileType(root.to_path_buf()));
    }

    Ok(())
}
