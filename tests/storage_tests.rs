use aws_sdk_s3::{
    operation::create_bucket::CreateBucketError,
    types::error::{BucketAlreadyExists, BucketAlreadyOwnedByYou},
};
use campus_admin::storage::{
    LocalDiskStorage, MockStorageService, S3StorageClient, StorageError, StorageService,
    bucket_already_ours, sanitize_key,
};
use std::path::PathBuf;
use uuid::Uuid;

fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("campus-admin-test-{}", Uuid::new_v4()))
}

#[test]
fn sanitize_key_strips_directory_navigation() {
    assert_eq!(sanitize_key("files/abc.pdf").unwrap(), "files/abc.pdf");
    assert_eq!(sanitize_key("../../etc/passwd").unwrap(), "etc/passwd");
    assert_eq!(sanitize_key("/bulk//./x.csv").unwrap(), "bulk/x.csv");
    assert_eq!(sanitize_key("files\\..\\x.png").unwrap(), "files/x.png");
}

#[test]
fn sanitize_key_rejects_keys_without_a_name() {
    assert!(matches!(sanitize_key(""), Err(StorageError::InvalidKey(_))));
    assert!(matches!(sanitize_key("../.."), Err(StorageError::InvalidKey(_))));
}

#[tokio::test]
async fn local_disk_round_trip() {
    let root = temp_root();
    let storage = LocalDiskStorage::new(&root);
    storage.ensure_bucket_exists().await;
    assert!(root.is_dir());

    storage
        .put_object("files/report.txt", b"quarterly".to_vec(), "text/plain")
        .await
        .unwrap();
    assert!(root.join("files").join("report.txt").is_file());
    assert_eq!(
        storage.get_object("files/report.txt").await.unwrap(),
        b"quarterly".to_vec()
    );

    storage.delete_object("files/report.txt").await.unwrap();
    assert!(matches!(
        storage.get_object("files/report.txt").await,
        Err(StorageError::NotFound(_))
    ));
    // deleting twice is fine
    storage.delete_object("files/report.txt").await.unwrap();

    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn local_disk_keeps_traversal_inside_the_root() {
    let root = temp_root();
    let storage = LocalDiskStorage::new(&root);

    storage
        .put_object("../escape.txt", b"x".to_vec(), "text/plain")
        .await
        .unwrap();

    assert!(root.join("escape.txt").is_file());
    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn mock_storage_shares_objects_between_clones() {
    let storage = MockStorageService::new();
    let handle = storage.clone();

    storage
        .put_object("bulk/users.csv", b"name,email".to_vec(), "text/csv")
        .await
        .unwrap();

    assert!(handle.contains("bulk/users.csv").await);
    assert_eq!(handle.object_count().await, 1);
    assert_eq!(
        handle.get_object("bulk/users.csv").await.unwrap(),
        b"name,email".to_vec()
    );

    handle.delete_object("bulk/users.csv").await.unwrap();
    assert_eq!(storage.object_count().await, 0);
}

#[tokio::test]
async fn failing_mock_reports_backend_errors() {
    let storage = MockStorageService::new_failing();

    let put = storage.put_object("files/a.txt", Vec::new(), "text/plain").await;
    let get = storage.get_object("files/a.txt").await;

    assert!(matches!(put, Err(StorageError::Backend(_))));
    assert!(matches!(get, Err(StorageError::Backend(_))));
}

#[test]
fn only_our_own_bucket_counts_as_already_created() {
    let owned =
        CreateBucketError::BucketAlreadyOwnedByYou(BucketAlreadyOwnedByYou::builder().build());
    let taken = CreateBucketError::BucketAlreadyExists(BucketAlreadyExists::builder().build());

    assert!(bucket_already_ours(&owned));
    // the name belongs to another account, uploads will fail
    assert!(!bucket_already_ours(&taken));
}

#[tokio::test]
async fn unreachable_bucket_endpoint_does_not_abort_startup() {
    let storage = S3StorageClient::new(
        "http://127.0.0.1:1",
        "us-east-1",
        "access",
        "secret",
        "campus-files",
    );

    storage.ensure_bucket_exists().await;

    assert!(matches!(
        storage.put_object("files/a.txt", b"a".to_vec(), "text/plain").await,
        Err(StorageError::Backend(_))
    ));
}
