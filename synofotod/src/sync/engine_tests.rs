use super::*;
use crate::sync::folders::{FolderNode, FolderTable};
use crate::sync::test_support::{
    OWN_USER_ID, make_client, mount_album_items, mount_albums, mount_children, mount_empty_scope,
    mount_root, mount_session,
};
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_library(server: &MockServer) {
    mount_session(server).await;
    mount_root(server, Scope::Personal, 1, "/").await;
    mount_children(server, Scope::Personal, None, &[(2, "/Trip")]).await;
    mount_children(server, Scope::Personal, Some(2), &[]).await;
    mount_empty_scope(server, Scope::Shared, 1).await;
    mount_albums(
        server,
        json!([
            { "id": 1, "name": "Trip", "passphrase": "trip", "owner_user_id": OWN_USER_ID, "version": 1 },
            { "id": 2, "name": "Cousins", "passphrase": "cousins", "owner_user_id": 12, "version": 1 }
        ]),
    )
    .await;
}

fn engine_at(server: &MockServer, dir: &std::path::Path, interval: Duration) -> IndexEngine {
    IndexEngine::with_parts(make_client(server), SnapshotStore::new(dir), interval)
}

async fn wait_for_file(path: &std::path::Path) {
    for _ in 0..300 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} was never written", path.display());
}

#[tokio::test]
async fn open_restores_persisted_folders_without_network() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    SnapshotStore::new(dir.path())
        .save_folders(&FolderTable::from(vec![FolderNode {
            id: 2,
            name: "/Trip".into(),
            handle: "p2".into(),
            scope: Scope::Personal,
        }]))
        .await
        .unwrap();

    let engine = IndexEngine::open(EngineConfig {
        base_url: server.uri(),
        credentials: Credentials::new("frame", "secret"),
        refresh_interval: Duration::from_secs(60),
        data_dir: dir.path().to_path_buf(),
        client: ClientOptions::default(),
    })
    .unwrap();

    assert_eq!(engine.resolve(Scope::Personal, 2).unwrap(), "/Trip");
    assert_eq!(engine.folder_count(), 1);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn refresh_pass_crawls_both_scopes_and_persists() {
    let server = MockServer::start().await;
    mount_library(&server).await;
    let dir = tempdir().unwrap();
    let engine = engine_at(&server, dir.path(), Duration::from_secs(60));

    let report = engine.refresh_pass(&CancellationToken::new()).await;

    assert_eq!(report.failed_scopes, 0);
    assert!(report.persisted);
    assert_eq!(report.albums, Some(2));
    assert_eq!(engine.folder_count(), 3);
    assert_eq!(engine.resolve(Scope::Shared, 1).unwrap(), "");

    let restored = SnapshotStore::new(dir.path()).restore_folders();
    assert_eq!(restored.len(), 3);
    assert_eq!(restored.resolve(Scope::Personal, 2).unwrap(), "/Trip");
}

#[tokio::test]
async fn failed_scope_skips_persistence() {
    let server = MockServer::start().await;
    mount_session(&server).await;
    mount_empty_scope(&server, Scope::Personal, 1).await;
    Mock::given(method("GET"))
        .and(path("/webapi/entry.cgi"))
        .and(query_param("api", "SYNO.FotoTeam.Browse.Folder"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_albums(&server, json!([])).await;
    let dir = tempdir().unwrap();
    let engine = engine_at(&server, dir.path(), Duration::from_secs(60));

    let report = engine.refresh_pass(&CancellationToken::new()).await;

    assert_eq!(report.failed_scopes, 1);
    assert!(!report.persisted);
    assert_eq!(engine.folder_count(), 1);
    assert!(!dir.path().join("folders.json").exists());
}

#[tokio::test]
async fn cancelled_pass_touches_nothing() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let engine = engine_at(&server, dir.path(), Duration::from_secs(60));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine.refresh_pass(&cancel).await;

    assert!(report.cancelled);
    assert!(!report.persisted);
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(!dir.path().join("folders.json").exists());
}

#[tokio::test]
async fn album_files_resolve_against_crawled_folders() {
    let server = MockServer::start().await;
    mount_library(&server).await;
    mount_album_items(
        &server,
        "trip",
        json!([
            { "id": 10, "filename": "a.jpg", "folder_id": 2, "owner_user_id": OWN_USER_ID },
            { "id": 11, "filename": "b.jpg", "folder_id": 77, "owner_user_id": OWN_USER_ID }
        ]),
        1,
    )
    .await;
    let dir = tempdir().unwrap();
    let engine = engine_at(&server, dir.path(), Duration::from_secs(60));
    engine.connect().await.unwrap();
    engine.refresh_pass(&CancellationToken::new()).await;

    let ids = engine.get_file_list("Trip", false).await.unwrap();

    assert_eq!(ids, vec!["10".to_string()]);
    assert_eq!(
        engine.get_file_info("10").unwrap().display_path,
        "mine/Trip/a.jpg"
    );
    assert_eq!(engine.file_path("11"), None);
    assert!(dir.path().join("albums.json").exists());
}

#[tokio::test]
async fn album_names_follow_ownership() {
    let server = MockServer::start().await;
    mount_library(&server).await;
    let dir = tempdir().unwrap();
    let engine = engine_at(&server, dir.path(), Duration::from_secs(60));
    engine.connect().await.unwrap();

    assert_eq!(
        engine.album_names(Scope::Personal).await.unwrap(),
        vec!["Trip".to_string()]
    );
    assert_eq!(
        engine.album_names(Scope::Shared).await.unwrap(),
        vec!["Cousins".to_string()]
    );
}

#[tokio::test]
async fn nothing_is_written_after_stop_returns() {
    let server = MockServer::start().await;
    mount_library(&server).await;
    let dir = tempdir().unwrap();
    let folders_path = dir.path().join("folders.json");
    let engine = engine_at(&server, dir.path(), Duration::from_millis(10));

    engine.start().unwrap();
    assert!(matches!(
        engine.start(),
        Err(CacheError::Scheduler(SchedulerError::NotIdle(_)))
    ));
    wait_for_file(&folders_path).await;
    engine.stop().await;

    assert_eq!(engine.scheduler_state(), SchedulerState::Stopped);
    let modified = std::fs::metadata(&folders_path).unwrap().modified().unwrap();
    let contents = std::fs::read(&folders_path).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        std::fs::metadata(&folders_path).unwrap().modified().unwrap(),
        modified
    );
    assert_eq!(std::fs::read(&folders_path).unwrap(), contents);

    let logouts = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| {
            request
                .url
                .query_pairs()
                .any(|(key, value)| key == "method" && value == "logout")
        })
        .count();
    assert_eq!(logouts, 1);
}

#[tokio::test]
async fn paused_engine_runs_no_pass() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let engine = engine_at(&server, dir.path(), Duration::from_millis(10));

    engine.pause(true);
    engine.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    engine.stop().await;

    assert!(server.received_requests().await.unwrap().is_empty());
}
