//! Integration tests for session lifecycle and the handle cache
//!
//! These run entirely against the in-memory transport.

use rods_grid::gateway::memory::MemoryTransport;
use rods_grid::gateway::{codes, GatewayError};
use rods_grid::path;
use rods_grid::{
    AmbientEnv, CatalogPath, ConnectionSource, EntryInfo, GridError, Kind, Session,
    SessionOptions,
};

fn seeded() -> MemoryTransport {
    let transport = MemoryTransport::new("tempZone");
    transport.add_collection("/tempZone/home/alice/docs").unwrap();
    transport.add_collection("/tempZone/projects/alice").unwrap();
    transport
        .add_data_object("/tempZone/home/alice/docs/report.pdf", EntryInfo::default())
        .unwrap();
    transport
        .add_data_object(
            "/tempZone/home/alice/notes.txt",
            EntryInfo {
                size: 1024,
                owner: Some("alice".to_string()),
                resource: Some("demoResc".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    transport
}

async fn connect(transport: &MemoryTransport) -> Session {
    let options = SessionOptions::user_defined("localhost", 1247, "rods", "tempZone");
    Session::open(transport, options).await.unwrap()
}

#[tokio::test]
async fn test_user_defined_missing_port_is_invalid_config() {
    let transport = seeded();
    let options = SessionOptions {
        source: ConnectionSource::UserDefined,
        host: "h".to_string(),
        username: "u".to_string(),
        zone: "z".to_string(),
        ..Default::default()
    };
    let err = Session::open(&transport, options).await.unwrap_err();
    assert!(matches!(err, GridError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_bad_password_is_auth_failed() {
    let transport = seeded().with_credentials("rods", "rods");
    let options =
        SessionOptions::user_defined("localhost", 1247, "rods", "tempZone").with_password("nope");
    let err = Session::open(&transport, options).await.unwrap_err();
    match err {
        GridError::AuthFailed { message } => assert_eq!(message, "CAT_INVALID_AUTHENTICATION"),
        other => panic!("expected AuthFailed, got {:?}", other),
    }

    let options =
        SessionOptions::user_defined("localhost", 1247, "rods", "tempZone").with_password("rods");
    assert!(Session::open(&transport, options).await.is_ok());
}

#[tokio::test]
async fn test_environment_defined_uses_ambient_identity() {
    let transport = seeded().with_ambient(AmbientEnv {
        host: "grid.example.org".to_string(),
        port: 1247,
        username: "alice".to_string(),
        zone: "tempZone".to_string(),
    });
    let session = Session::open(&transport, SessionOptions::environment())
        .await
        .unwrap();
    assert_eq!(session.identity().username, "alice");
    assert_eq!(
        session.to_string(),
        "Host: alice@grid.example.org:1247/tempZone, Connected: true\n"
    );
    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_environment_defined_without_ambient_is_invalid_config() {
    let transport = seeded();
    let err = Session::open(&transport, SessionOptions::environment())
        .await
        .unwrap_err();
    assert_eq!(err.kind_tag(), "invalid-config");
}

#[tokio::test]
async fn test_recursive_cache_hit_makes_no_gateway_call() {
    let transport = seeded();
    let session = connect(&transport).await;

    let home = session.collection("/tempZone/home", true).await.unwrap();
    assert!(home.is_recursive());
    assert_eq!(transport.fetch_count(), 1);

    let docs = session
        .collection("/tempZone/home/alice/docs", false)
        .await
        .unwrap();
    assert_eq!(docs.path().as_str(), "/tempZone/home/alice/docs");
    assert_eq!(transport.fetch_count(), 1);
    assert_eq!(session.opened().len(), 1);

    let parent = docs.parent().await.unwrap().unwrap();
    assert_eq!(parent.path().as_str(), "/tempZone/home/alice");
}

#[tokio::test]
async fn test_non_recursive_cache_miss_fetches_once() {
    let transport = seeded();
    let session = connect(&transport).await;

    let home = session.collection("/tempZone/home", false).await.unwrap();
    assert!(!home.is_recursive());
    let alice = home.collections()[0].clone();
    assert!(!alice.is_loaded());

    let docs = session
        .collection("/tempZone/home/alice/docs", false)
        .await
        .unwrap();
    assert_eq!(transport.fetch_count(), 2);

    let opened = session.opened();
    assert_eq!(opened.len(), 2);
    assert!(opened[1].same_handle(docs.as_object()));

    // now cached at the root set
    session
        .collection("/tempZone/home/alice/docs/", false)
        .await
        .unwrap();
    assert_eq!(transport.fetch_count(), 2);
}

#[tokio::test]
async fn test_cache_hit_on_placeholder_loads_it() {
    let transport = seeded();
    let session = connect(&transport).await;
    let home = session.collection("/tempZone/home", false).await.unwrap();
    assert_eq!(transport.fetch_count(), 1);

    let alice = session
        .collection("/tempZone/home/alice", false)
        .await
        .unwrap();
    assert!(alice.is_loaded());
    assert_eq!(alice.children().len(), 2);
    assert!(alice.same_handle(home.collections()[0].as_object()));
    assert_eq!(transport.fetch_count(), 2);
    assert_eq!(session.opened().len(), 1);

    session
        .collection("/tempZone/home/alice", false)
        .await
        .unwrap();
    assert_eq!(transport.fetch_count(), 2);
}

#[tokio::test]
async fn test_parent_of_directly_fetched_handles() {
    let transport = seeded();
    let session = connect(&transport).await;

    let notes_path = CatalogPath::new("/tempZone/home/alice/notes.txt").unwrap();
    let notes = session.data_object(notes_path.as_str()).await.unwrap();
    let parent = notes.parent().await.unwrap().unwrap();
    assert_eq!(parent.path(), &path::split(&notes_path).0);
    assert!(parent.is_loaded());

    let home = session.collection("/tempZone/home", false).await.unwrap();
    let zone = home.parent().await.unwrap().unwrap();
    assert_eq!(zone.path().as_str(), "/tempZone");
    assert!(zone.parent().await.unwrap().unwrap().path().is_root());

    let root = session.collection("/", false).await.unwrap();
    assert!(root.parent_path().is_none());
    assert!(root.parent().await.unwrap().is_none());
}

#[tokio::test]
async fn test_parent_survives_eviction_of_its_listing() {
    let transport = seeded();
    let session = connect(&transport).await;
    let home = session.collection("/tempZone/home", true).await.unwrap();
    let docs = home
        .find_recursive("/tempZone/home/alice/docs")
        .unwrap()
        .unwrap();
    assert_eq!(transport.fetch_count(), 1);

    session.evict("/tempZone/home").unwrap();
    drop(home);
    assert!(session.opened().is_empty());

    let alice = docs.parent().await.unwrap().unwrap();
    assert_eq!(alice.path().as_str(), "/tempZone/home/alice");
    assert_eq!(alice.children().len(), 2);
    assert_eq!(transport.fetch_count(), 2);
    assert_eq!(session.opened().len(), 1);
}

#[tokio::test]
async fn test_find_by_name_returns_first_in_order() {
    let transport = seeded();
    let session = connect(&transport).await;
    session.collection("/tempZone/home/alice", false).await.unwrap();
    session
        .collection("/tempZone/projects/alice", false)
        .await
        .unwrap();

    let hit = session.find("alice").unwrap().unwrap();
    assert_eq!(hit.path().as_str(), "/tempZone/home/alice");
    assert!(session.exists("/tempZone/projects/alice").unwrap());
    assert!(!session.exists("/tempZone/home/alice/docs").unwrap());
    assert!(matches!(
        session.find("").unwrap_err(),
        GridError::InvalidPath { .. }
    ));
}

#[tokio::test]
async fn test_disconnect_invalidates_every_handle() {
    let transport = seeded();
    let session = connect(&transport).await;
    let home = session.collection("/tempZone/home", true).await.unwrap();
    let notes = session
        .data_object("/tempZone/home/alice/notes.txt")
        .await
        .unwrap();

    session.disconnect().await.unwrap();
    assert!(!session.is_connected());
    assert!(session.opened().is_empty());

    assert!(notes.metadata().await.unwrap_err().is_session_closed());
    assert!(home.load().await.unwrap_err().is_session_closed());
    assert!(home.session().unwrap_err().is_session_closed());
    assert!(session
        .collection("/tempZone/home", false)
        .await
        .unwrap_err()
        .is_session_closed());

    // local identity survives
    assert_eq!(notes.display().unwrap(), "d:/tempZone/home/alice/notes.txt");
    assert_eq!(notes.size(), 1024);
}

#[tokio::test]
async fn test_data_object_lookup_is_not_cached() {
    let transport = seeded();
    let session = connect(&transport).await;
    let notes = session
        .data_object("/tempZone/home/alice/notes.txt")
        .await
        .unwrap();
    assert_eq!(notes.owner(), Some("alice"));
    assert_eq!(notes.resource(), Some("demoResc"));
    assert!(session.opened().is_empty());

    let err = session
        .collection("/tempZone/home/alice/notes.txt", false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GridError::KindMismatch {
            expected: Kind::Collection,
            found: Kind::DataObject,
            ..
        }
    ));
}

#[tokio::test]
async fn test_server_side_removal_evicts_cached_subtree() {
    let transport = seeded();
    let session = connect(&transport).await;
    let home = session.collection("/tempZone/home", true).await.unwrap();
    let docs = home.find_recursive("docs").unwrap().unwrap();

    transport.remove("/tempZone/home/alice/docs").unwrap();
    let err = docs.metadata().await.unwrap_err();
    assert!(err.is_not_found());

    assert!(session
        .find_recursive("/tempZone/home/alice/docs")
        .unwrap()
        .is_none());
    assert!(session
        .find_recursive("/tempZone/home/alice/notes.txt")
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_lazy_load_of_placeholder() {
    let transport = seeded();
    let session = connect(&transport).await;
    let home = session.collection("/tempZone/home", false).await.unwrap();
    let alice = home.collections()[0].clone();

    alice.load().await.unwrap();
    assert!(alice.is_loaded());
    assert!(!alice.is_recursive());
    assert_eq!(alice.children().len(), 2);
    assert_eq!(transport.fetch_count(), 2);

    alice.load().await.unwrap();
    assert_eq!(transport.fetch_count(), 2);

    transport
        .add_data_object("/tempZone/home/alice/new.txt", EntryInfo::default())
        .unwrap();
    alice.refresh().await.unwrap();
    assert_eq!(alice.data_objects().len(), 2);
    assert_eq!(transport.fetch_count(), 3);
}

#[tokio::test]
async fn test_refresh_clears_recursion_up_the_tree() {
    let transport = seeded();
    let session = connect(&transport).await;
    let home = session.collection("/tempZone/home", true).await.unwrap();
    let alice = home.collections()[0].clone();
    let docs = alice.collections()[0].clone();
    assert!(home.is_recursive() && alice.is_recursive() && docs.is_recursive());

    alice.refresh().await.unwrap();
    assert!(!alice.is_recursive());
    assert!(!home.is_recursive());
    assert!(alice.is_loaded());
    // the refreshed listing holds a fresh placeholder for docs
    assert!(!alice.collections()[0].is_loaded());
    assert!(docs.is_recursive());
}

#[tokio::test]
async fn test_failed_refresh_leaves_flags_and_children() {
    let transport = seeded();
    let session = connect(&transport).await;
    let home = session.collection("/tempZone/home", true).await.unwrap();
    let alice = home.collections()[0].clone();
    let before = alice.children();

    transport.fail_next(GatewayError::Cancelled);
    assert!(alice.refresh().await.unwrap_err().is_cancelled());

    assert!(alice.is_loaded());
    assert!(alice.is_recursive());
    assert!(home.is_recursive());
    let after = alice.children();
    assert_eq!(after.len(), before.len());
    assert!(after
        .iter()
        .zip(&before)
        .all(|(a, b)| a.same_handle(b)));
}

#[tokio::test]
async fn test_cancelled_fetch_surfaces_gateway_code() {
    let transport = seeded();
    let session = connect(&transport).await;
    transport.fail_next(GatewayError::Cancelled);

    let err = session.collection("/tempZone/home", false).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.gateway_code(), Some(codes::CANCELLED));
    assert!(session.opened().is_empty());
}

#[tokio::test]
async fn test_descriptors_open_and_close() {
    let transport = seeded();
    let session = connect(&transport).await;
    let notes = session
        .data_object("/tempZone/home/alice/notes.txt")
        .await
        .unwrap();

    notes.open().await.unwrap();
    notes.open().await.unwrap();
    assert!(notes.is_open());
    assert_eq!(transport.open_descriptors(), 1);

    notes.close().await.unwrap();
    notes.close().await.unwrap();
    assert!(!notes.is_open());
    assert_eq!(transport.open_descriptors(), 0);

    transport.add_user("alice");
    let alice = session.user("alice").await.unwrap();
    alice.open().await.unwrap();
    assert!(!alice.is_open());
}
