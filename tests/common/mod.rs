//! Shared helpers for txpublish integration tests.

use assert_cmd::cargo::cargo_bin_cmd;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch area with an empty `src` directory for sources and an empty
/// `root` directory to publish into.
pub struct Sandbox {
    pub temp: TempDir,
    pub src: PathBuf,
    pub root: PathBuf,
}

#[allow(unused)]
pub fn sandbox() -> Sandbox {
    let temp = TempDir::new().unwrap();
    let src = temp.path().join("src");
    let root = temp.path().join("root");
    fs::create_dir(&src).unwrap();
    fs::create_dir(&root).unwrap();

    Sandbox { temp, src, root }
}

/// Sorted list of every path below `dir`, relative to it, with file
/// contents for regular files.
#[allow(unused)]
pub fn snapshot(dir: &Path) -> Vec<(PathBuf, Option<String>)> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<(PathBuf, Option<String>)>) {
        for entry in fs::read_dir(dir).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let relative = path.strip_prefix(base).unwrap().to_path_buf();
            let file_type = entry.file_type().unwrap();

            if file_type.is_dir() {
                out.push((relative, None));
                walk(base, &path, out);
            } else if file_type.is_file() {
                out.push((relative, Some(fs::read_to_string(&path).unwrap())));
            } else {
                out.push((relative, None));
            }
        }
    }

    let mut out = Vec::new();
    walk(dir, dir, &mut out);
    out.sort();
    out
}

#[cfg(unix)]
#[allow(unused)]
pub fn mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

#[cfg(unix)]
#[allow(unused)]
pub fn set_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

/// Runs the `txpublish` binary with `args`.
#[allow(unused)]
pub fn run_publish<P: AsRef<OsStr>>(args: &[P], extra_args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("txpublish");
    cmd.args(args)
        .args(extra_args)
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");

    cmd.assert()
}
