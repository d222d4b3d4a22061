use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use drop_store::prelude::*;
use drop_store::{Classification, ContentClassifier, DefaultClassifier, STAGING_PREFIX};
use futures::StreamExt;
use tempfile::TempDir;

fn body(data: &[u8]) -> ByteStream {
    let data = Bytes::copy_from_slice(data);
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

async fn collect(mut stream: ByteStream) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.unwrap());
    }
    out
}

fn entries(root: &Path) -> Vec<String> {
    std::fs::read_dir(root)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

fn service(dir: &TempDir) -> DropService {
    DropService::new(StoreConfig::default().with_content_dir(dir.path())).unwrap()
}

#[tokio::test]
async fn chunks_out_of_order_assemble_in_index_order() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let parts: [(u32, &[u8]); 3] = [
        (2, b"BBBBBBBBBB"),
        (1, b"AAAAAAAAAA"),
        (3, b"CCCCC"),
    ];

    let mut handles = Vec::new();
    for (index, data) in parts {
        let service = service.clone();
        let submission = ChunkSubmission::new("session-1", index, 3, 10, "letters.txt");
        let data = data.to_vec();
        handles.push(tokio::spawn(async move {
            service.upload_chunk(submission, body(&data)).await
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let mut objects = Vec::new();
    for handle in handles {
        objects.push(handle.await.unwrap().unwrap());
    }

    let object = &objects[0];
    assert!(objects.iter().all(|o| o == object));
    assert_eq!(object.size, 25);
    assert_eq!(object.name, "letters.txt");

    let opened = service.open(&object.id, true).await.unwrap();
    assert_eq!(collect(opened.body).await, b"AAAAAAAAAABBBBBBBBBBCCCCC");
    assert!(entries(dir.path()).iter().all(|n| !n.starts_with(STAGING_PREFIX)));
}

#[tokio::test]
async fn oversized_single_shot_leaves_nothing_behind() {
    let dir = TempDir::new().unwrap();
    let service = DropService::new(
        StoreConfig::default()
            .with_content_dir(dir.path())
            .with_max_bytes_per_file(100),
    )
    .unwrap();

    let err = service.put("big.bin", body(&[0u8; 150])).await.unwrap_err();
    assert!(matches!(err, DropError::SizeLimitExceeded { limit: 100 }));
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn oversized_declaration_is_rejected_before_staging() {
    let dir = TempDir::new().unwrap();
    let service = DropService::new(
        StoreConfig::default()
            .with_content_dir(dir.path())
            .with_max_bytes_per_file(100),
    )
    .unwrap();

    let submission = ChunkSubmission::new("too-big", 1, 20, 10, "f.bin");
    let err = service.upload_chunk(submission, body(b"tiny")).await.unwrap_err();
    assert!(matches!(err, DropError::UploadTooLarge { declared: 200, max: 100 }));
    assert!(entries(dir.path()).is_empty());
}

#[tokio::test]
async fn reupload_maps_to_same_identifier_and_replaces() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let first = service.put("one.txt", body(b"identical payload")).await.unwrap();
    let second = service.put("two.txt", body(b"identical payload")).await.unwrap();

    assert_eq!(first.id, second.id);
    assert!(!service.exists(&first.id, "one.txt").await.unwrap());
    assert!(service.exists(&second.id, "two.txt").await.unwrap());

    let loaded = service.load(&first.id).await.unwrap();
    assert_eq!(loaded.name, "two.txt");
    assert_eq!(entries(&dir.path().join(first.id.as_str())).len(), 2);
}

#[tokio::test]
async fn racing_final_chunks_publish_one_object() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);
    let total = 12u32;

    let mut handles = Vec::new();
    for index in (1..=total).rev() {
        let service = service.clone();
        let submission = ChunkSubmission::new("race", index, total, 4, "counting.bin");
        handles.push(tokio::spawn(async move {
            service.upload_chunk(submission, body(&index.to_be_bytes())).await
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);

    let opened = service.open(&ids[0], true).await.unwrap();
    let expected: Vec<u8> = (1..=total).flat_map(|i| i.to_be_bytes()).collect();
    assert_eq!(opened.object.size, u64::from(total) * 4);
    assert_eq!(collect(opened.body).await, expected);

    let published: Vec<_> = entries(dir.path())
        .into_iter()
        .filter(|n| !n.starts_with(STAGING_PREFIX))
        .collect();
    assert_eq!(published, vec![ids[0].to_string()]);
}

#[tokio::test]
async fn raw_payload_is_gzip() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let object = service.put("notes.md", body(b"# notes\n")).await.unwrap();
    let raw = collect(service.open(&object.id, false).await.unwrap().body).await;
    assert_eq!(&raw[..2], &[0x1f, 0x8b]);

    let mut plain = String::new();
    std::io::Read::read_to_string(&mut flate2::read::GzDecoder::new(&raw[..]), &mut plain).unwrap();
    assert_eq!(plain, "# notes\n");
}

#[tokio::test]
async fn capacity_pass_keeps_directory_under_ceiling() {
    let dir = TempDir::new().unwrap();
    let service = DropService::new(
        StoreConfig::default()
            .with_content_dir(dir.path())
            .with_max_bytes_total(1_500),
    )
    .unwrap();

    for i in 0..6u32 {
        let data: Vec<u8> = (0..700u32)
            .map(|j| ((j ^ (i << 12)).wrapping_mul(2654435761) >> 9) as u8)
            .collect();
        service.put(&format!("file-{i}.bin"), body(&data)).await.unwrap();
    }

    service.enforce_capacity().await.unwrap();

    let total: u64 = entries(dir.path())
        .into_iter()
        .filter(|n| !n.starts_with(STAGING_PREFIX))
        .map(|n| {
            std::fs::read_dir(dir.path().join(n))
                .unwrap()
                .map(|e| e.unwrap().metadata().unwrap().len())
                .sum::<u64>()
        })
        .sum();
    assert!(total <= 1_500, "total {total}");
}

fn published_bytes(root: &Path) -> u64 {
    entries(root)
        .into_iter()
        .filter(|n| !n.starts_with(STAGING_PREFIX))
        .map(|n| {
            std::fs::read_dir(root.join(n))
                .map(|dir| dir.filter_map(|e| e.ok()?.metadata().ok()).map(|m| m.len()).sum::<u64>())
                .unwrap_or(0)
        })
        .sum()
}

#[tokio::test]
async fn put_alone_triggers_capacity_eviction() {
    let dir = TempDir::new().unwrap();
    let service = DropService::new(
        StoreConfig::default()
            .with_content_dir(dir.path())
            .with_max_bytes_total(1_500),
    )
    .unwrap();

    for i in 0..6u32 {
        let data: Vec<u8> = (0..700u32)
            .map(|j| ((j ^ (i << 12)).wrapping_mul(2654435761) >> 9) as u8)
            .collect();
        service.put(&format!("file-{i}.bin"), body(&data)).await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while published_bytes(dir.path()) > 1_500 {
        assert!(tokio::time::Instant::now() < deadline, "background capacity pass never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Delays classification so the finalizing request can be dropped mid-publish
struct SlowClassifier(Duration);

impl ContentClassifier for SlowClassifier {
    fn classify(&self, filename: &str, head: &[u8]) -> Classification {
        std::thread::sleep(self.0);
        DefaultClassifier.classify(filename, head)
    }
}

#[tokio::test]
async fn dropped_finalizing_request_still_resolves_waiters() {
    let dir = TempDir::new().unwrap();
    let service = DropService::with_classifier(
        StoreConfig::default()
            .with_content_dir(dir.path())
            .with_max_wait(Duration::from_secs(5)),
        SlowClassifier(Duration::from_millis(300)),
    )
    .unwrap();

    let waiter = tokio::spawn({
        let service = service.clone();
        async move {
            let submission = ChunkSubmission::new("dropped", 1, 2, 5, "pair.bin");
            service.upload_chunk(submission, body(b"left-")).await
        }
    });
    while service.sessions().progress(&"dropped".into()).is_none() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let submission = ChunkSubmission::new("dropped", 2, 2, 5, "pair.bin");
    let finalizer = tokio::time::timeout(
        Duration::from_millis(50),
        service.upload_chunk(submission, body(b"right")),
    )
    .await;
    assert!(finalizer.is_err(), "finalizing request should have been cut off");

    let object = tokio::time::timeout(Duration::from_secs(3), waiter)
        .await
        .expect("waiter resolved before max_wait")
        .unwrap()
        .unwrap();
    assert_eq!(object.size, 10);

    let opened = service.open(&object.id, true).await.unwrap();
    assert_eq!(collect(opened.body).await, b"left-right");
}

#[tokio::test]
async fn delete_then_load_is_not_found() {
    let dir = TempDir::new().unwrap();
    let service = service(&dir);

    let object = service.put("gone.txt", body(b"bye")).await.unwrap();
    service.delete(&object.id).await.unwrap();

    assert!(matches!(service.load(&object.id).await, Err(DropError::NotFound { .. })));
    assert!(matches!(service.delete(&object.id).await, Err(DropError::NotFound { .. })));
}

#[tokio::test]
async fn waiting_chunk_times_out_when_session_stalls() {
    let dir = TempDir::new().unwrap();
    let service = DropService::new(
        StoreConfig::default()
            .with_content_dir(dir.path())
            .with_max_wait(Duration::from_millis(50)),
    )
    .unwrap();

    let submission = ChunkSubmission::new("stalled", 1, 2, 4, "half.bin");
    let err = service.upload_chunk(submission, body(b"half")).await.unwrap_err();
    assert!(matches!(err, DropError::WaitTimeout { .. }));
}
