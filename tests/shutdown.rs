//! The shutdown flag must reject new filesystem operations while staying
//! recognizable through the protocol error surface.

use libtransfer::auth::{Permission, User};
use libtransfer::provider::MemoryProvider;
use libtransfer::server::{config, Connection, Protocol};
use std::sync::Arc;

#[tokio::test(flavor = "current_thread")]
async fn operations_fail_while_shutting_down() {
    let tmp = tempfile::tempdir().unwrap();
    let mut user = User::new("shutdown_user", tmp.path());
    user.permissions.insert("/".to_string(), vec![Permission::Any]);
    let conn = Connection::new("", Protocol::WebDav, "", "", user, Arc::new(MemoryProvider::new()));

    config::set_shutting_down(true);
    let err = conn.do_stat("/anything", 0).await.unwrap_err();
    assert!(err.is_shutting_down(), "{}", err);
    config::set_shutting_down(false);

    conn.do_stat("/", 0).await.unwrap();

    conn.set_protocol(Protocol::Sftp);
    config::set_shutting_down(true);
    let err = conn.do_stat("/anything", 0).await.unwrap_err();
    // the SFTP wrapper keeps the cause recognizable
    assert!(err.is_shutting_down(), "{}", err);
    assert!(err.to_string().starts_with("sftp: failure"), "{}", err);
    config::set_shutting_down(false);
}
