//! End to end tests driving a connection against real local backends.

use libtransfer::auth::{Permission, User};
use libtransfer::provider::{DataProvider, MemoryProvider};
use libtransfer::server::{Connection, Protocol};
use libtransfer::storage::{FsHandle, VirtualFolder};
use std::sync::Arc;

fn build_user(home: &std::path::Path, mapped: &std::path::Path) -> User {
    let mut user = User::new("it_user", home);
    user.permissions.insert("/".to_string(), vec![Permission::Any]);
    user.quota_size = 1000;
    user.virtual_folders.push(VirtualFolder {
        name: "vdir".to_string(),
        virtual_path: "/vdir".to_string(),
        mapped_path: mapped.to_path_buf(),
        quota_size: -1,
        quota_files: -1,
        ..Default::default()
    });
    user
}

#[tokio::test(flavor = "current_thread")]
async fn remove_rename_and_quota_flow() {
    let tmp = tempfile::tempdir().unwrap();
    let home = tmp.path().join("home");
    let mapped = tmp.path().join("vdir");
    std::fs::create_dir_all(&home).unwrap();
    std::fs::create_dir_all(&mapped).unwrap();

    let user = build_user(&home, &mapped);
    let provider = Arc::new(MemoryProvider::new());
    provider.add_user(user.clone()).await.unwrap();
    provider.update_user_quota("it_user", 2, 100, true).await.unwrap();

    let conn = Connection::new("", Protocol::WebDav, "127.0.0.1:8080", "10.0.0.5:54321", user.clone(), provider.clone());
    let fs_home: FsHandle = user.filesystem(conn.id()).unwrap();
    let fs_vdir: FsHandle = user.virtual_folders[0].filesystem(conn.id()).unwrap();

    // stat through the connection sees what is on disk
    std::fs::write(home.join("report.txt"), vec![b'x'; 40]).unwrap();
    let info = conn.do_stat("/report.txt", 0).await.unwrap();
    assert!(info.is_file());
    assert_eq!(info.size(), 40);

    // the quota snapshot reflects the seeded usage and bounds writes
    let quota = conn.has_space(true, false, "/report.txt").await;
    assert!(quota.has_space);
    assert_eq!(quota.used_size, 100);
    assert_eq!(conn.max_write_size(&quota, false, 0, true).unwrap(), 900);

    // removing a file returns its bytes to the user scope
    conn.remove_file(&fs_home, &home.join("report.txt"), "/report.txt", &info)
        .await
        .unwrap();
    assert_eq!(provider.used_quota("it_user").await.unwrap(), (1, 60));
    assert!(!home.join("report.txt").exists());

    // recursive removal takes the whole tree down, children first
    std::fs::create_dir_all(home.join("adir/sub")).unwrap();
    std::fs::write(home.join("adir/sub/file.bin"), vec![b'y'; 15]).unwrap();
    conn.remove_dir_tree(&fs_home, &home.join("adir"), "/adir").await.unwrap();
    assert!(!home.join("adir").exists());

    // a rename within the home backend is delegated
    let payload = b"cross backend payload";
    std::fs::write(home.join("a.txt"), payload).unwrap();
    conn.rename(&fs_home, &fs_home, &home.join("a.txt"), &home.join("b.txt"), "/a.txt", "/b.txt")
        .await
        .unwrap();
    assert!(home.join("b.txt").exists());

    // a rename into the virtual folder crosses backends: copy and delete,
    // with the folder scope picking up the accounting
    conn.rename(
        &fs_home,
        &fs_vdir,
        &home.join("b.txt"),
        &mapped.join("b.txt"),
        "/b.txt",
        "/vdir/b.txt",
    )
    .await
    .unwrap();
    assert!(!home.join("b.txt").exists());
    assert_eq!(std::fs::read(mapped.join("b.txt")).unwrap(), payload);
    assert_eq!(
        provider.used_folder_quota("vdir").await.unwrap(),
        (1, payload.len() as i64)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn parent_dirs_are_created_on_demand() {
    let tmp = tempfile::tempdir().unwrap();
    let home = tmp.path().join("home");
    std::fs::create_dir_all(&home).unwrap();

    let mut user = User::new("mkdir_user", &home);
    user.permissions.insert("/".to_string(), vec![Permission::Any]);
    let provider = Arc::new(MemoryProvider::new());
    let conn = Connection::new("", Protocol::Sftp, "", "", user, provider);

    conn.check_parent_dirs("/deep/nested/upload").await.unwrap();
    assert!(home.join("deep/nested/upload").is_dir());
}
