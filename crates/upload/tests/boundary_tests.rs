mod common;

use bytes::Bytes;
use common::{send_in_chunks, setup_coordinator, visible_names};
use futures::future::join_all;
use lanvan_cipher::{CipherKey, KeyDerivation, decrypt_bytes, decrypt_with_password, encrypt_bytes};
use lanvan_core::{EncryptionRequest, FileDescriptor, UploadStatus};
use std::collections::HashSet;

fn random_key_file(name: &str, size: Option<u64>) -> FileDescriptor {
    FileDescriptor::new(name, size).with_encryption(EncryptionRequest::RandomKey)
}

#[tokio::test]
async fn test_hello_world_in_four_byte_chunks_matches_one_shot() {
    let (_temp, coordinator) = setup_coordinator(|config| {
        config.pacing.fixed_chunk_size = Some(4);
    })
    .await;
    let handle = coordinator
        .submit(vec![random_key_file("hello.enc", Some(11))])
        .await
        .pop()
        .unwrap()
        .unwrap();
    assert_eq!(handle.chunk_size(), 4);
    let key = handle.random_key().cloned().unwrap();

    let report = send_in_chunks(&handle, b"hello world", 4).await;
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.size, 11);
    assert_eq!(report.stored_size, 16);

    let meta = report.encryption.clone().unwrap();
    assert_eq!(meta.key_derivation, KeyDerivation::Random);
    let stored = std::fs::read(report.final_path.as_ref().unwrap()).unwrap();
    assert_eq!(stored, encrypt_bytes(&key, &meta.iv, b"hello world"));
    assert_eq!(decrypt_bytes(&key, &meta.iv, &stored).unwrap(), b"hello world");
}

#[tokio::test]
async fn test_zero_byte_file_pads_to_one_block() {
    let (_temp, coordinator) = setup_coordinator(|_| {}).await;
    let handle = coordinator
        .submit(vec![random_key_file("empty.enc", Some(0))])
        .await
        .pop()
        .unwrap()
        .unwrap();
    let key = handle.random_key().cloned().unwrap();

    let report = send_in_chunks(&handle, b"", 1).await;
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.size, 0);
    assert_eq!(report.stored_size, 16);

    let meta = report.encryption.unwrap();
    let stored = std::fs::read(report.final_path.unwrap()).unwrap();
    assert_eq!(stored.len(), 16);
    assert!(decrypt_bytes(&key, &meta.iv, &stored).unwrap().is_empty());
}

#[tokio::test]
async fn test_plain_zero_byte_file_is_published() {
    let (_temp, coordinator) = setup_coordinator(|_| {}).await;
    let handle = coordinator
        .submit(vec![FileDescriptor::new("empty.txt", None)])
        .await
        .pop()
        .unwrap()
        .unwrap();
    let report = send_in_chunks(&handle, b"", 1).await;
    assert!(report.success);
    assert_eq!(report.stored_size, 0);
    assert_eq!(visible_names(&coordinator).await, vec!["empty.txt"]);
}

#[tokio::test]
async fn test_file_exactly_one_chunk_long() {
    let (_temp, coordinator) = setup_coordinator(|config| {
        config.pacing.fixed_chunk_size = Some(32);
    })
    .await;
    let body = [0x5au8; 32];
    let handle = coordinator
        .submit(vec![random_key_file("one.enc", None)])
        .await
        .pop()
        .unwrap()
        .unwrap();
    let key = handle.random_key().cloned().unwrap();

    let report = send_in_chunks(&handle, &body, 32).await;
    assert!(report.success, "{:?}", report.error);
    // Aligned input gains a full padding block.
    assert_eq!(report.stored_size, 48);

    let meta = report.encryption.unwrap();
    let stored = std::fs::read(report.final_path.unwrap()).unwrap();
    assert_eq!(stored, encrypt_bytes(&key, &meta.iv, &body));
}

#[tokio::test]
async fn test_exact_multiple_of_chunk_size_with_empty_closing_chunk() {
    let (_temp, coordinator) = setup_coordinator(|config| {
        config.pacing.fixed_chunk_size = Some(16);
    })
    .await;
    let body: Vec<u8> = (0..48u8).collect();
    let handle = coordinator
        .submit(vec![random_key_file("three.enc", None)])
        .await
        .pop()
        .unwrap()
        .unwrap();
    let key = handle.random_key().cloned().unwrap();

    for piece in body.chunks(16) {
        let sent = handle
            .send_chunk(Bytes::copy_from_slice(piece), false)
            .await
            .unwrap();
        assert!(sent.is_none());
    }
    let report = handle.send_chunk(Bytes::new(), true).await.unwrap().unwrap();
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.size, 48);
    assert_eq!(report.stored_size, 64);

    let meta = report.encryption.unwrap();
    let stored = std::fs::read(report.final_path.unwrap()).unwrap();
    assert_eq!(stored, encrypt_bytes(&key, &meta.iv, &body));
}

#[tokio::test]
async fn test_same_name_concurrent_uploads_get_distinct_files() {
    let (_temp, coordinator) = setup_coordinator(|config| {
        config.upload.max_concurrent_uploads = 4;
        config.pacing.fixed_chunk_size = Some(64);
    })
    .await;

    let bodies: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 1000]).collect();
    let handles: Vec<_> = coordinator
        .submit((0..4).map(|_| FileDescriptor::new("report.pdf", None)).collect())
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let reports = join_all(
        handles
            .iter()
            .zip(&bodies)
            .map(|(handle, body)| send_in_chunks(handle, body, 100)),
    )
    .await;

    let names: HashSet<String> = reports.iter().map(|r| r.filename.clone()).collect();
    assert_eq!(names.len(), 4);
    assert!(names.contains("report.pdf"));
    assert!(names.contains("report (1).pdf"));

    for (report, body) in reports.iter().zip(&bodies) {
        assert!(report.success);
        assert_eq!(&std::fs::read(report.final_path.as_ref().unwrap()).unwrap(), body);
    }
}

#[tokio::test]
async fn test_password_encrypted_upload_round_trip() {
    let (_temp, coordinator) = setup_coordinator(|config| {
        config.pacing.fixed_chunk_size = Some(1000);
    })
    .await;
    let body: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let descriptor = FileDescriptor::new("vault.bin", Some(body.len() as u64)).with_encryption(
        EncryptionRequest::Password {
            password: "correct horse".to_string(),
        },
    );
    let handle = coordinator
        .submit(vec![descriptor])
        .await
        .pop()
        .unwrap()
        .unwrap();
    assert!(handle.random_key().is_none());

    let report = send_in_chunks(&handle, &body, 777).await;
    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.stored_size, lanvan_cipher::padded_len(body.len() as u64));

    let meta = report.encryption.clone().unwrap();
    assert_eq!(meta.key_derivation, KeyDerivation::Password);
    assert_eq!(meta.kdf_iterations, Some(1_000));

    let stored = std::fs::read(report.final_path.as_ref().unwrap()).unwrap();
    assert_eq!(decrypt_with_password("correct horse", &stored, &meta).unwrap(), body);
    let wrong = decrypt_with_password("wrong horse", &stored, &meta);
    assert!(wrong.map_or(true, |plain| plain != body));
}

#[tokio::test]
async fn test_random_keys_are_per_session() {
    let (_temp, coordinator) = setup_coordinator(|_| {}).await;
    let handles: Vec<_> = coordinator
        .submit(vec![random_key_file("a", None), random_key_file("b", None)])
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    let keys: Vec<CipherKey> = handles.iter().map(|h| h.random_key().cloned().unwrap()).collect();
    assert_ne!(keys[0].as_bytes(), keys[1].as_bytes());

    for handle in &handles {
        assert_eq!(handle.status(), UploadStatus::Pending);
        assert!(send_in_chunks(handle, b"data", 4).await.success);
    }
}
