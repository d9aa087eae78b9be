//! End-to-end flows through the public client surface, over the in-memory
//! backend fleet.

use quire::addressing::Endpoint;
use quire::backend::memory::{AllowAll, MemoryBackend, MemoryLockStore, RecordingFanout};
use quire::fanout::NullFanout;
use quire::model::{Condition, Cursor, DocUri, WriteRequest};
use quire::{ClientConfig, Identity, StoreClient, StoreKind, TopologyRegistry};
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    backend: Arc<MemoryBackend>,
    locks: Arc<MemoryLockStore>,
    fanout: Arc<RecordingFanout>,
    client: StoreClient,
}

fn fixture() -> Fixture {
    fixture_with(ClientConfig::default())
}

fn fixture_with(mut config: ClientConfig) -> Fixture {
    quire::common::init_tracing();
    config.retry_backoff_ms = 1;
    config.retry_backoff_step_ms = 1;
    config.bulk_backoff_ms = 1;
    let backend = Arc::new(MemoryBackend::new());
    let locks = Arc::new(MemoryLockStore::new());
    let fanout = Arc::new(RecordingFanout::new());
    let topology = TopologyRegistry::uniform(vec![
        Endpoint::new("vol-1", "mem://1"),
        Endpoint::new("vol-2", "mem://2"),
        Endpoint::new("vol-3", "mem://3"),
    ]);
    let client = StoreClient::new(
        backend.clone(),
        topology,
        Arc::new(AllowAll),
        locks.clone(),
        fanout.clone(),
        config,
    )
    .unwrap();
    Fixture {
        backend,
        locks,
        fanout,
        client,
    }
}

fn uri(s: &str) -> DocUri {
    DocUri::parse(s).unwrap()
}

#[tokio::test]
async fn optimistic_concurrency_full_scenario() {
    let f = fixture();
    let ctx = f.client.context(Identity::new("writer-a"));

    // Insert /a, then /a/b with no id: the engine assigns revision 1
    f.client.put(uri("/a"), json!({"kind": "folder"}), &ctx).await.unwrap();
    let d = f.client.put(uri("/a/b"), json!({"v": 0}), &ctx).await.unwrap();
    assert_eq!(d.after.as_ref().unwrap().revision, 1);

    // An update at revision 1 lands revision 2
    f.client
        .write(
            vec![WriteRequest::put(uri("/a/b"), json!({"v": 1})).with_revision(1)],
            &ctx,
        )
        .await
        .unwrap();

    // A second writer still holding revision 1 must lose
    let stale = f.client.context(Identity::new("writer-b"));
    let err = f
        .client
        .write(
            vec![WriteRequest::put(uri("/a/b"), json!({"v": 9})).with_revision(1)],
            &stale,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, quire::Error::RevisionMismatch { .. }));

    // After re-reading, the same writer succeeds at revision 2
    let fresh = f.client.get(&uri("/a/b"), &stale).await.unwrap().unwrap();
    assert_eq!(fresh.revision, 2);
    assert_eq!(fresh.payload, json!({"v": 1}));
    f.client
        .write(
            vec![WriteRequest::put(uri("/a/b"), json!({"v": 2})).with_revision(fresh.revision)],
            &stale,
        )
        .await
        .unwrap();
    assert_eq!(
        f.client.get(&uri("/a/b"), &stale).await.unwrap().unwrap().revision,
        3
    );

    // Delete is refused while a child exists, then succeeds once it is gone
    f.client.put(uri("/a/b/c"), json!({}), &ctx).await.unwrap();
    let err = f.client.delete(uri("/a/b"), &ctx).await.unwrap_err();
    assert!(matches!(err, quire::Error::ExistingChildren(_)));
    f.client.delete(uri("/a/b/c"), &ctx).await.unwrap();
    f.client.delete(uri("/a/b"), &ctx).await.unwrap();
    assert!(f.client.get(&uri("/a/b"), &ctx).await.unwrap().is_none());
    assert!(f.locks.is_empty());
}

#[tokio::test]
async fn alias_lifecycle_stays_consistent() {
    let f = fixture();
    let ctx = f.client.context(Identity::new("alice"));

    f.client.put(uri("/docs"), json!({}), &ctx).await.unwrap();
    f.client
        .write(
            vec![WriteRequest::put(uri("/docs/report"), json!({"v": 1}))
                .with_aliases(vec![uri("/latest")])],
            &ctx,
        )
        .await
        .unwrap();

    // Reads through either path reach the same document
    let via_alias = f.client.get(&uri("/latest"), &ctx).await.unwrap().unwrap();
    assert_eq!(via_alias.uri, uri("/docs/report"));

    // Deleting the alias sheds it without touching the document
    f.client.delete(uri("/latest"), &ctx).await.unwrap();
    assert!(f.client.get(&uri("/latest"), &ctx).await.unwrap().is_none());
    let doc = f.client.get(&uri("/docs/report"), &ctx).await.unwrap().unwrap();
    assert!(doc.aliases.is_empty());
    assert_eq!(doc.payload, json!({"v": 1}));
}

#[tokio::test]
async fn stale_alias_reads_do_not_survive_a_write() {
    let f = fixture();
    let ctx = f.client.context(Identity::new("alice"));

    f.client.put(uri("/docs"), json!({}), &ctx).await.unwrap();
    f.client
        .write(
            vec![WriteRequest::put(uri("/docs/a"), json!({"v": 1}))
                .with_aliases(vec![uri("/latest"), uri("/pinned")])],
            &ctx,
        )
        .await
        .unwrap();

    // Warm this operation's cache through both aliases
    assert!(f.client.get(&uri("/latest"), &ctx).await.unwrap().is_some());
    assert!(f.client.get(&uri("/pinned"), &ctx).await.unwrap().is_some());

    // Replacing the alias set removes /pinned; the same context must see
    // the removal, not its cached read
    f.client
        .write(
            vec![WriteRequest::put(uri("/docs/a"), json!({"v": 2}))
                .with_aliases(vec![uri("/latest")])],
            &ctx,
        )
        .await
        .unwrap();
    assert!(f.client.get(&uri("/pinned"), &ctx).await.unwrap().is_none());
    assert!(f.client.get(&uri("/latest"), &ctx).await.unwrap().is_some());

    // Deleting the document takes its remaining alias with it
    f.client.delete(uri("/docs/a"), &ctx).await.unwrap();
    assert!(f.client.get(&uri("/latest"), &ctx).await.unwrap().is_none());
    assert!(f.client.get(&uri("/docs/a"), &ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_batch_has_no_observable_effect() {
    let f = fixture();
    let ctx = f.client.context(Identity::new("alice"));

    let err = f
        .client
        .write(
            vec![
                WriteRequest::put(uri("/good"), json!({})),
                WriteRequest::put(uri("/orphan/child"), json!({})),
            ],
            &ctx,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, quire::Error::MissingParent(_)));
    assert_eq!(f.backend.bodies_len(), 0);
    assert!(f.fanout.is_empty());
    assert!(f.locks.is_empty());
}

#[tokio::test]
async fn cursor_survives_the_wire_between_pages() {
    let f = fixture();
    let ctx = f.client.context(Identity::new("alice"));

    f.client.put(uri("/d"), json!({}), &ctx).await.unwrap();
    for i in 0..7 {
        f.client
            .put(uri(&format!("/d/{:02}", i)), json!({"kind": "note"}), &ctx)
            .await
            .unwrap();
    }

    let filter = vec![vec![Condition::eq("kind", json!("note"))]];
    let mut seen = Vec::new();
    let mut wire: Option<String> = None;
    loop {
        // Round-trip the cursor through its opaque string form, the way a
        // remote caller would carry it between requests
        let cursor = match wire {
            Some(ref s) => Some(Cursor::decode(s).unwrap()),
            None => None,
        };
        let page = f
            .client
            .query(&uri("/d"), &filter, 3, cursor, &ctx)
            .await
            .unwrap();
        seen.extend(page.docs.iter().map(|d| d.uri.clone()));
        match page.cursor {
            Some(c) => wire = Some(c.encode()),
            None => break,
        }
    }
    assert_eq!(seen.len(), 7);
    let mut dedup = seen.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(dedup.len(), 7);
}

#[tokio::test]
async fn fetch_limit_contains_runaway_scans() {
    let mut config = ClientConfig::default();
    config.fetch_limit = 8;
    let f = fixture_with(config);
    let ctx = f.client.context(Identity::new("alice"));

    f.client.put(uri("/d"), json!({}), &ctx).await.unwrap();
    for i in 0..30 {
        f.client
            .put(uri(&format!("/d/{:02}", i)), json!({"n": i}), &ctx)
            .await
            .unwrap();
    }

    // Nothing matches, so without the ceiling this would walk all 30
    let filter = vec![vec![Condition::eq("n", json!(-1))]];
    let result = f
        .client
        .query(&uri("/d"), &filter, 100, None, &ctx)
        .await
        .unwrap();
    assert!(result.docs.is_empty());
    assert!(result.fetch_limit_exceeded);
    assert!(result.cursor.is_some());

    // The cursor resumes where the ceiling cut the scan off
    let rest = f
        .client
        .query(&uri("/d"), &filter, 100, result.cursor, &ctx)
        .await
        .unwrap();
    assert!(rest.docs.is_empty());
}

#[tokio::test]
async fn count_and_query_agree() {
    let f = fixture();
    let ctx = f.client.context(Identity::new("alice"));

    f.client.put(uri("/d"), json!({}), &ctx).await.unwrap();
    for i in 0..12 {
        let kind = if i % 3 == 0 { "keep" } else { "skip" };
        f.client
            .put(uri(&format!("/d/{:02}", i)), json!({"kind": kind}), &ctx)
            .await
            .unwrap();
    }

    let filter = vec![vec![Condition::eq("kind", json!("keep"))]];
    let counted = f
        .client
        .count(&uri("/d"), &filter, None, None, &ctx)
        .await
        .unwrap();
    let queried = f
        .client
        .query(&uri("/d"), &filter, 100, None, &ctx)
        .await
        .unwrap();
    assert_eq!(counted.count, queried.docs.len());
    assert_eq!(counted.count, 4);
}

#[tokio::test]
async fn delete_tree_clears_a_hierarchy() {
    let f = fixture();
    let ctx = f.client.context(Identity::new("alice"));

    for u in ["/t", "/t/a", "/t/b"] {
        f.client.put(uri(u), json!({}), &ctx).await.unwrap();
    }
    for u in ["/t/a/1", "/t/a/2", "/t/b/1"] {
        f.client.put(uri(u), json!({}), &ctx).await.unwrap();
    }

    let removed = f.client.delete_tree(&uri("/t"), false, &ctx).await.unwrap();
    assert_eq!(removed, 6);
    for u in ["/t", "/t/a", "/t/a/1", "/t/a/2", "/t/b", "/t/b/1"] {
        assert!(f.client.get(&uri(u), &ctx).await.unwrap().is_none(), "{} should be gone", u);
    }
    assert!(f.locks.is_empty());
}

#[tokio::test]
async fn placement_is_deterministic_across_clients() {
    // Two registries configured identically assign every key to the same
    // endpoint, so independently wired clients agree on placement
    let pool = vec![
        Endpoint::new("vol-1", "mem://1"),
        Endpoint::new("vol-2", "mem://2"),
        Endpoint::new("vol-3", "mem://3"),
    ];
    let a = TopologyRegistry::uniform(pool.clone());
    let b = TopologyRegistry::uniform(pool);
    for i in 0..50 {
        let key = format!("/docs/item-{}", i);
        let ea = a.assign(StoreKind::Body, &key).unwrap();
        let eb = b.assign(StoreKind::Body, &key).unwrap();
        assert_eq!(ea.id, eb.id);
    }
}

#[tokio::test]
async fn unauthorized_reads_look_like_absence() {
    use quire::backend::memory::DenyPrefix;

    let backend = Arc::new(MemoryBackend::new());
    let topology = TopologyRegistry::uniform(vec![Endpoint::new("vol-1", "mem://1")]);
    let client = StoreClient::new(
        backend.clone(),
        topology,
        Arc::new(DenyPrefix::new(vec!["/private"])),
        Arc::new(MemoryLockStore::new()),
        Arc::new(NullFanout),
        ClientConfig::default(),
    )
    .unwrap();
    let ctx = client.context(Identity::new("mallory"));

    // Seed directly; the client itself may not create under /private
    let doc = quire::Document {
        uri: uri("/private/secret"),
        revision: 1,
        aliases: vec![],
        payload: json!({"s": 1}),
        author: "root".into(),
        created_at: 0,
        updated_at: 0,
    };
    backend.insert_fixture(doc);

    assert!(client.get(&uri("/private/secret"), &ctx).await.unwrap().is_none());
    let err = client
        .put(uri("/private/secret"), json!({"s": 2}), &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, quire::Error::AccessDenied { .. }));
}
