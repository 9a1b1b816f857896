mod common;

use common::{sandbox, snapshot};
use std::fs;
use std::path::Path;
use txpublish::fs::FilesystemTransaction;
use txpublish::{Error, Transaction};

#[tokio::test]
async fn test_commit_then_rollback_restores_tree() {
    let sb = sandbox();
    fs::write(sb.src.join("model.usd"), "model").unwrap();
    fs::write(sb.src.join("notes.txt"), "notes").unwrap();
    fs::create_dir_all(sb.src.join("textures/wood")).unwrap();
    fs::write(sb.src.join("textures/wood/albedo.png"), "png").unwrap();
    fs::write(sb.root.join("existing.txt"), "keep").unwrap();

    let before_root = snapshot(&sb.root);
    let before_src = snapshot(&sb.src);

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.create_directory("v001");
    txn.copy_path(sb.src.join("model.usd"), "v001/model.usd");
    txn.copy_path(sb.src.join("textures"), "v001/textures");
    txn.move_path(sb.src.join("notes.txt"), "v001/notes.txt");
    txn.soft_link_path("v001", "latest");
    txn.hard_link_path("v001/model.usd", "v001/model-hard.usd");

    txn.commit().await.unwrap();

    assert_eq!(
        fs::read_to_string(sb.root.join("v001/textures/wood/albedo.png")).unwrap(),
        "png"
    );
    assert_eq!(
        fs::read_to_string(sb.root.join("v001/model-hard.usd")).unwrap(),
        "model"
    );
    assert!(!sb.src.join("notes.txt").exists());
    assert!(fs::symlink_metadata(sb.root.join("latest")).unwrap().file_type().is_symlink());

    txn.rollback().await.unwrap();

    assert_eq!(snapshot(&sb.root), before_root);
    assert_eq!(snapshot(&sb.src), before_src);
}

#[tokio::test]
async fn test_rollback_after_failed_commit_undoes_executed_actions() {
    let sb = sandbox();
    fs::write(sb.src.join("a.txt"), "a").unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.create_directory("pkg");
    txn.copy_path(sb.src.join("a.txt"), "pkg/a.txt");
    txn.delete_path("pkg/missing.txt");
    txn.create_directory("never");

    assert!(txn.commit().await.is_err());
    assert!(sb.root.join("pkg/a.txt").exists());
    assert!(!sb.root.join("never").exists());

    txn.rollback().await.unwrap();
    assert!(snapshot(&sb.root).is_empty());
}

#[tokio::test]
async fn test_paths_outside_root_are_rejected() {
    let sb = sandbox();
    fs::write(sb.src.join("a.txt"), "a").unwrap();

    let attempts: [fn(&mut FilesystemTransaction); 5] = [
        |txn| txn.create_directory("../escape"),
        |txn| txn.delete_path("../src/a.txt"),
        |txn| txn.delete_path(""),
        |txn| txn.soft_link_path("../src/a.txt", "link"),
        |txn| txn.hard_link_path("a.txt", "../hard.txt"),
    ];

    for record in attempts {
        let mut txn = FilesystemTransaction::new(&sb.root);
        record(&mut txn);

        match txn.commit().await {
            Err(Error::PathOutsideRoot { root, .. }) => assert_eq!(root, sb.root),
            other => panic!("expected PathOutsideRoot, got {other:?}"),
        }
    }

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.copy_path(sb.src.join("a.txt"), sb.temp.path().join("outside.txt"));
    assert!(matches!(
        txn.commit().await,
        Err(Error::PathOutsideRoot { .. })
    ));

    assert!(sb.src.join("a.txt").exists());
    assert!(!sb.temp.path().join("escape").exists());
    assert!(!sb.temp.path().join("hard.txt").exists());
    assert!(!sb.temp.path().join("outside.txt").exists());
    assert!(snapshot(&sb.root).is_empty());
}

#[tokio::test]
async fn test_copy_sources_may_live_outside_root() {
    let sb = sandbox();
    fs::write(sb.src.join("a.txt"), "a").unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.copy_path(sb.src.join("a.txt"), "a.txt");
    txn.commit().await.unwrap();

    assert_eq!(fs::read_to_string(sb.root.join("a.txt")).unwrap(), "a");
}

#[tokio::test]
async fn test_existing_targets_survive_commit_and_rollback() {
    let sb = sandbox();
    fs::write(sb.src.join("a.txt"), "new").unwrap();
    fs::write(sb.src.join("b.txt"), "new").unwrap();
    fs::write(sb.root.join("a.txt"), "old").unwrap();
    fs::write(sb.root.join("b.txt"), "old").unwrap();

    let before_root = snapshot(&sb.root);
    let before_src = snapshot(&sb.src);

    let attempts: [fn(&mut FilesystemTransaction, &Path); 2] = [
        |txn, src| txn.copy_path(src.join("a.txt"), "a.txt"),
        |txn, src| txn.move_path(src.join("b.txt"), "b.txt"),
    ];

    for record in attempts {
        let mut txn = FilesystemTransaction::new(&sb.root);
        record(&mut txn, &sb.src);

        match txn.commit().await {
            Err(Error::Io(err)) => assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
        txn.rollback().await.unwrap();
    }

    assert_eq!(snapshot(&sb.root), before_root);
    assert_eq!(snapshot(&sb.src), before_src);
}

#[tokio::test]
async fn test_kind_changes_are_sequential_boundaries() {
    let sb = sandbox();
    fs::write(sb.src.join("a.txt"), "first").unwrap();
    fs::write(sb.src.join("b.txt"), "b").unwrap();
    fs::write(sb.src.join("a2.txt"), "second").unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.copy_path(sb.src.join("a.txt"), "a.txt");
    txn.copy_path(sb.src.join("b.txt"), "b.txt");
    txn.delete_path("a.txt");
    // Copies never overwrite, so this only succeeds once the delete ran.
    txn.copy_path(sb.src.join("a2.txt"), "a.txt");

    txn.commit().await.unwrap();

    assert_eq!(fs::read_to_string(sb.root.join("a.txt")).unwrap(), "second");
    assert_eq!(fs::read_to_string(sb.root.join("b.txt")).unwrap(), "b");
}

#[tokio::test]
async fn test_directory_is_created_before_files_copied_into_it() {
    let sb = sandbox();
    fs::write(sb.src.join("a.txt"), "a").unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.create_directory("nested/dir");
    txn.copy_path(sb.src.join("a.txt"), "nested/dir/a.txt");
    txn.commit().await.unwrap();

    assert!(sb.root.join("nested/dir/a.txt").is_file());
}

#[tokio::test]
async fn test_create_existing_directory_fails() {
    let sb = sandbox();
    fs::create_dir(sb.root.join("v001")).unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.create_directory("v001");

    assert!(matches!(txn.commit().await, Err(Error::Io(_))));
}

#[tokio::test]
async fn test_delete_is_not_rolled_back() {
    let sb = sandbox();
    fs::write(sb.root.join("old.txt"), "old").unwrap();
    fs::create_dir_all(sb.root.join("old-dir/inner")).unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.delete_path("old.txt");
    txn.delete_path("old-dir");
    txn.commit().await.unwrap();

    txn.rollback().await.unwrap();

    assert!(!sb.root.join("old.txt").exists());
    assert!(!sb.root.join("old-dir").exists());
}

#[tokio::test]
async fn test_delete_removes_symlink_not_target() {
    let sb = sandbox();
    fs::create_dir(sb.root.join("v001")).unwrap();
    fs::write(sb.root.join("v001/a.txt"), "a").unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.soft_link_path("v001", "latest");
    txn.commit().await.unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.delete_path("latest");
    txn.commit().await.unwrap();

    assert!(fs::symlink_metadata(sb.root.join("latest")).is_err());
    assert!(sb.root.join("v001/a.txt").exists());
}

#[tokio::test]
async fn test_move_rollback_returns_source() {
    let sb = sandbox();
    fs::create_dir(sb.src.join("cache")).unwrap();
    fs::write(sb.src.join("cache/frame.0001.exr"), "exr").unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.move_path(sb.src.join("cache"), "cache");
    txn.commit().await.unwrap();

    assert!(!sb.src.join("cache").exists());
    assert!(sb.root.join("cache/frame.0001.exr").exists());

    txn.rollback().await.unwrap();

    assert_eq!(
        fs::read_to_string(sb.src.join("cache/frame.0001.exr")).unwrap(),
        "exr"
    );
    assert!(!sb.root.join("cache").exists());
}

#[tokio::test]
async fn test_rollback_without_commit_is_noop() {
    let sb = sandbox();
    fs::write(sb.root.join("a.txt"), "a").unwrap();

    let mut txn = FilesystemTransaction::new(&sb.root);
    txn.delete_path("a.txt");
    txn.rollback().await.unwrap();

    assert!(sb.root.join("a.txt").exists());
}

#[cfg(unix)]
mod unix {
    use super::*;
    use crate::common::{mode, set_mode};
    use txpublish::fs::{Permission, Permissions, ScopedPermissions};

    fn current_user_and_group() -> (String, String) {
        use nix::unistd::{Group, User, getgid, getuid};

        let user = User::from_uid(getuid()).unwrap().unwrap().name;
        let group = Group::from_gid(getgid()).unwrap().unwrap().name;
        (user, group)
    }

    #[tokio::test]
    async fn test_permissions_are_restored_on_rollback() {
        let sb = sandbox();
        let file = sb.root.join("a.txt");
        fs::write(&file, "a").unwrap();
        set_mode(&file, 0o664);

        let read_only = ScopedPermissions::new(
            Permission::Unchanged,
            Permission::Unset,
            Permission::Unchanged,
        );
        let mut txn = FilesystemTransaction::new(&sb.root);
        txn.change_owner_permissions(
            "a.txt",
            None,
            None,
            Some(Permissions {
                user: read_only,
                group: read_only,
                other: read_only,
            }),
        );

        txn.commit().await.unwrap();
        assert_eq!(mode(&file), 0o444);

        txn.rollback().await.unwrap();
        assert_eq!(mode(&file), 0o664);
    }

    #[tokio::test]
    async fn test_full_mode_is_applied() {
        let sb = sandbox();
        let file = sb.root.join("a.txt");
        fs::write(&file, "a").unwrap();
        set_mode(&file, 0o600);

        let mut txn = FilesystemTransaction::new(&sb.root);
        txn.change_owner_permissions("a.txt", None, None, Some(Permissions::from_mode(0o755)));
        txn.commit().await.unwrap();

        assert_eq!(mode(&file), 0o755);
    }

    #[tokio::test]
    async fn test_chown_to_current_user() {
        let sb = sandbox();
        let file = sb.root.join("a.txt");
        fs::write(&file, "a").unwrap();
        let (user, group) = current_user_and_group();

        let mut txn = FilesystemTransaction::new(&sb.root);
        txn.change_owner_permissions("a.txt", Some(&user), Some(&group), None);
        txn.commit().await.unwrap();
        txn.rollback().await.unwrap();

        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_unknown_user_is_reported() {
        let sb = sandbox();
        fs::write(sb.root.join("a.txt"), "a").unwrap();

        let mut txn = FilesystemTransaction::new(&sb.root);
        txn.change_owner_permissions("a.txt", Some("no-such-user-txpublish"), None, None);

        match txn.commit().await {
            Err(Error::UnknownUser(name)) => assert_eq!(name, "no-such-user-txpublish"),
            other => panic!("expected UnknownUser, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_symlink_inside_root_cannot_escape_it() {
        let sb = sandbox();
        let outside = sb.temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(sb.src.join("a.txt"), "a").unwrap();
        std::os::unix::fs::symlink("../outside", sb.root.join("escape")).unwrap();

        let attempts: [fn(&mut FilesystemTransaction, &Path); 4] = [
            |txn, src| txn.copy_path(src.join("a.txt"), "escape/a.txt"),
            |txn, _| txn.create_directory("escape/dir"),
            |txn, _| txn.soft_link_path("escape", "link"),
            |txn, _| txn.change_owner_permissions("escape", None, None, Some(Permissions::from_mode(0o700))),
        ];

        for record in attempts {
            let mut txn = FilesystemTransaction::new(&sb.root);
            record(&mut txn, &sb.src);

            match txn.commit().await {
                Err(Error::PathOutsideRoot { .. }) => {}
                other => panic!("expected PathOutsideRoot, got {other:?}"),
            }
        }

        assert!(snapshot(&outside).is_empty());
        assert_ne!(mode(&outside), 0o700);
        assert!(fs::symlink_metadata(sb.root.join("link")).is_err());

        // The escaping link itself is inside the root and can be removed.
        let mut txn = FilesystemTransaction::new(&sb.root);
        txn.delete_path("escape");
        txn.commit().await.unwrap();
        assert!(outside.is_dir());
    }

    #[tokio::test]
    async fn test_directory_copy_keeps_symlinks() {
        let sb = sandbox();
        fs::create_dir(sb.src.join("asset")).unwrap();
        fs::write(sb.src.join("asset/a.txt"), "a").unwrap();
        std::os::unix::fs::symlink("a.txt", sb.src.join("asset/alias.txt")).unwrap();

        let mut txn = FilesystemTransaction::new(&sb.root);
        txn.copy_path(sb.src.join("asset"), "asset");
        txn.commit().await.unwrap();

        let link = sb.root.join("asset/alias.txt");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("a.txt"));
    }
}
