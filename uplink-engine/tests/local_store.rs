//! Integration tests for the local multipart store

use std::sync::Arc;

use serde_json::json;
use uplink_core::*;
use uplink_engine::*;

fn small_limits() -> StoreLimits {
    StoreLimits {
        min_part_size: 8,
        max_part_size: 1024 * 1024,
        max_part_number: 10_000,
        page_size: 3,
    }
}

async fn open_upload(store: &LocalStore, key: &str) -> (UploadId, ObjectKey) {
    let key = ObjectKey::new(key).unwrap();
    let created = store.create(&key, "application/octet-stream").await.unwrap();
    (UploadId::new(&created.upload_id).unwrap(), key)
}

#[tokio::test]
async fn parts_assemble_in_declared_order() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (id, key) = open_upload(&store, "docs/report.pdf").await;

    let e2 = store.upload_part(&id, &key, 2, b"-second-").unwrap();
    let e1 = store.upload_part(&id, &key, 1, b"-first--").unwrap();
    let e3 = store.upload_part(&id, &key, 3, b"end").unwrap();

    let location = store
        .complete(
            &id,
            &key,
            &[
                CompletedPart::new(1, e1),
                CompletedPart::new(2, format!("\"{}\"", e2)),
                CompletedPart::new(3, e3),
            ],
        )
        .await
        .unwrap();
    assert_eq!(location.as_deref(), Some("/objects/docs%2Freport.pdf"));

    let object = store.read_object(&key).unwrap().unwrap();
    assert_eq!(object.body, b"-first---second-end");
    assert_eq!(object.content_type, "application/octet-stream");
    assert!(!store.is_open(&id).unwrap());
}

#[tokio::test]
async fn listing_pages_by_marker() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (id, key) = open_upload(&store, "k").await;
    for n in [7, 1, 4, 2, 12] {
        store.upload_part(&id, &key, n, format!("part-{}", n).as_bytes()).unwrap();
    }

    let first = store.list_parts(&id, &key, None).await.unwrap();
    let numbers: Vec<_> = first.parts.iter().map(|p| p.part_number.unwrap()).collect();
    assert_eq!(numbers, vec![1, 2, 4]);
    assert_eq!(first.next_marker, Some(4));

    let second = store.list_parts(&id, &key, first.next_marker).await.unwrap();
    let numbers: Vec<_> = second.parts.iter().map(|p| p.part_number.unwrap()).collect();
    assert_eq!(numbers, vec![7, 12]);
    assert_eq!(second.next_marker, None);
    assert_eq!(second.parts[1].size, Some(7));
}

#[tokio::test]
async fn listings_do_not_leak_between_uploads() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (a, key_a) = open_upload(&store, "a").await;
    let (b, key_b) = open_upload(&store, "b").await;

    store.upload_part(&a, &key_a, 1, b"aaaaaaaa").unwrap();
    store.upload_part(&b, &key_b, 1, b"bbbbbbbb").unwrap();
    store.upload_part(&b, &key_b, 2, b"bb").unwrap();

    assert_eq!(store.list_parts(&a, &key_a, None).await.unwrap().parts.len(), 1);
    assert_eq!(store.list_parts(&b, &key_b, None).await.unwrap().parts.len(), 2);
}

#[tokio::test]
async fn mismatched_etag_keeps_session_open() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (id, key) = open_upload(&store, "k").await;
    let e1 = store.upload_part(&id, &key, 1, b"12345678").unwrap();
    store.upload_part(&id, &key, 2, b"tail").unwrap();

    let err = store
        .complete(&id, &key, &[CompletedPart::new(1, e1), CompletedPart::new(2, "stale")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PartMismatch(_)));
    assert!(store.is_open(&id).unwrap());
    assert!(store.read_object(&key).unwrap().is_none());
}

#[tokio::test]
async fn undersized_middle_part_is_rejected() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (id, key) = open_upload(&store, "k").await;
    let e1 = store.upload_part(&id, &key, 1, b"tiny").unwrap();
    let e2 = store.upload_part(&id, &key, 2, b"12345678").unwrap();

    let err = store
        .complete(&id, &key, &[CompletedPart::new(1, e1), CompletedPart::new(2, e2)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PartMismatch(_)));
}

#[tokio::test]
async fn missing_part_is_a_mismatch() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (id, key) = open_upload(&store, "k").await;
    let e1 = store.upload_part(&id, &key, 1, b"12345678").unwrap();

    let err = store
        .complete(&id, &key, &[CompletedPart::new(1, e1), CompletedPart::new(2, "x")])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PartMismatch(_)));
}

#[tokio::test]
async fn abort_releases_parts_and_is_not_repeatable() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (id, key) = open_upload(&store, "k").await;
    store.upload_part(&id, &key, 1, b"one").unwrap();
    store.upload_part(&id, &key, 2, b"two").unwrap();
    assert_eq!(store.blob_count().unwrap(), 2);

    store.abort(&id, &key).await.unwrap();
    assert_eq!(store.blob_count().unwrap(), 0);

    let err = store.abort(&id, &key).await.unwrap_err();
    assert!(matches!(err, StoreError::NoSuchUpload { .. }));
    assert!(matches!(
        store.upload_part(&id, &key, 3, b"late"),
        Err(StoreError::NoSuchUpload { .. })
    ));
}

#[tokio::test]
async fn undeclared_parts_are_released_on_completion() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let (id, key) = open_upload(&store, "k").await;
    let e1 = store.upload_part(&id, &key, 1, b"kept").unwrap();
    store.upload_part(&id, &key, 2, b"dropped").unwrap();

    store.complete(&id, &key, &[CompletedPart::new(1, e1)]).await.unwrap();
    assert_eq!(store.blob_count().unwrap(), 1);
}

#[tokio::test]
async fn overwriting_an_object_releases_its_blobs() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();

    let (id, key) = open_upload(&store, "k").await;
    let e = store.upload_part(&id, &key, 1, b"version one").unwrap();
    store.complete(&id, &key, &[CompletedPart::new(1, e)]).await.unwrap();

    let (id, key) = open_upload(&store, "k").await;
    let e = store.upload_part(&id, &key, 1, b"version two").unwrap();
    store.complete(&id, &key, &[CompletedPart::new(1, e)]).await.unwrap();

    assert_eq!(store.blob_count().unwrap(), 1);
    assert_eq!(store.read_object(&key).unwrap().unwrap().body, b"version two");
}

#[tokio::test]
async fn sessions_survive_reopen() {
    let temp = tempfile::tempdir().unwrap();
    let (id, key) = {
        let store = LocalStore::open(temp.path(), small_limits()).unwrap();
        let (id, key) = open_upload(&store, "k").await;
        store.upload_part(&id, &key, 1, b"persisted").unwrap();
        (id, key)
    };

    let store = LocalStore::open(temp.path(), small_limits()).unwrap();
    let page = store.list_parts(&id, &key, None).await.unwrap();
    assert_eq!(page.parts.len(), 1);
    assert_eq!(page.parts[0].size, Some(9));
}

#[tokio::test]
async fn orchestrated_upload_through_presigned_grants() {
    let (store, _temp) = LocalStore::temp(small_limits()).unwrap();
    let store = Arc::new(store);
    let signer = Ed25519UrlSigner::new(KeyPair::generate(), "http://local.test");
    let config = UploadConfig {
        default_chunk_size_bytes: 8,
        min_part_size_bytes: 8,
        ..UploadConfig::default()
    };
    let orch = UploadOrchestrator::new(
        store.clone(),
        Arc::new(signer.clone()),
        content_addressed_namer("up"),
        config,
    )
    .unwrap();

    let data = b"0123456789abcdefXYZ";
    let file = FileDescriptor::new("data.bin").with_size(data.len() as u64);
    let started = orch.start_upload(Some(&file), &json!({})).await.unwrap();
    let plan = started.plan.unwrap();
    assert_eq!(plan.part_count, 3);
    let mut session = started.session;

    let numbers: Vec<_> = plan.part_numbers().collect();
    let urls = orch.issue_part_urls(&mut session, &numbers, None).await.unwrap();

    for (n, url) in &urls.presigned_urls {
        let (path, query) = url.strip_prefix("http://local.test").unwrap().split_once('?').unwrap();
        let grant = PartGrant::from_request(path, Some(query)).unwrap();
        signer.verify(&grant).unwrap();
        let range = plan.part_range(*n).unwrap();
        store
            .upload_part(
                &grant.upload_id,
                &grant.key,
                grant.part_number,
                &data[range.start as usize..range.end as usize],
            )
            .unwrap();
    }

    let parts = orch.list_parts(&mut session).await.unwrap();
    let declared: Vec<_> = parts
        .iter()
        .map(|p| CompletedPart::new(p.part_number, p.etag.clone()))
        .collect();
    let completion = orch.complete_upload(&mut session, &declared).await.unwrap();

    assert_eq!(session.state(), SessionState::Completed);
    let location = completion.location.unwrap();
    assert!(location.starts_with("/objects/up%2F"));
    assert_eq!(store.read_object(session.key()).unwrap().unwrap().body, data);
}
