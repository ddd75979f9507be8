use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::operation::create_bucket::CreateBucketError;
use s3::primitives::ByteStream;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// StorageService
///
/// Byte storage for uploaded files. Metadata lives in the repository; this
/// layer only knows opaque keys such as `files/<uuid>.pdf`. Handlers depend on
/// the trait so the backend (local disk, S3-compatible bucket, in-memory mock)
/// is chosen once at startup.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Prepares the backend (creates the upload directory or bucket).
    /// Safe to call on every startup.
    async fn ensure_bucket_exists(&self);

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deleting a missing object is not an error.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
}

/// sanitize_key
///
/// Strips directory navigation (`..`, `.`) and empty segments from a key so a
/// stored path can never leave the storage root.
pub fn sanitize_key(key: &str) -> Result<String, StorageError> {
    let clean = key
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    if clean.is_empty() {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(clean)
}

// --- Local disk ---

/// LocalDiskStorage
///
/// Default backend. Objects are plain files under `root`, with key segments
/// mapped to subdirectories.
#[derive(Clone)]
pub struct LocalDiskStorage {
    root: PathBuf,
}

impl LocalDiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        Ok(self.root.join(sanitize_key(key)?))
    }
}

#[async_trait]
impl StorageService for LocalDiskStorage {
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            tracing::error!("failed to create upload directory {:?}: {}", self.root, e);
        }
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// --- S3-compatible bucket ---

/// S3StorageClient
///
/// Backend for S3-compatible object stores (AWS, MinIO, Supabase Storage).
/// `force_path_style(true)` is required by MinIO and Supabase gateways.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
}

impl S3StorageClient {
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

/// True when CreateBucket failed only because this account already owns the
/// bucket.
pub fn bucket_already_ours(err: &CreateBucketError) -> bool {
    err.is_bucket_already_owned_by_you()
}

#[async_trait]
impl StorageService for S3StorageClient {
    /// An "already owned" failure is expected on every start after the first;
    /// anything else is logged so a misconfigured bucket shows up before the
    /// first upload fails.
    async fn ensure_bucket_exists(&self) {
        let result = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await;

        if let Err(e) = result {
            if e.as_service_error().is_some_and(bucket_already_ours) {
                tracing::debug!(bucket = %self.bucket_name, "bucket already exists");
            } else {
                tracing::warn!(
                    bucket = %self.bucket_name,
                    "failed to create bucket: {}",
                    s3::error::DisplayErrorContext(&e)
                );
            }
        }
    }

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key)?)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key)?)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Backend(service_error.to_string())
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key)?)
            .send()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

// --- In-memory mock ---

/// MockStorageService
///
/// In-memory backend for tests. Clones share the same object map, so a test
/// can keep a handle and inspect what handlers stored.
#[derive(Clone, Default)]
pub struct MockStorageService {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// When true, every operation fails with a backend error.
    pub should_fail: bool,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        match sanitize_key(key) {
            Ok(key) => self.objects.lock().await.contains_key(&key),
            Err(_) => false,
        }
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.should_fail {
            return Err(StorageError::Backend(
                "Mock Storage Error: Simulation requested".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.check()?;
        self.objects.lock().await.insert(sanitize_key(key)?, bytes);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check()?;
        self.objects
            .lock()
            .await
            .get(&sanitize_key(key)?)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.objects.lock().await.remove(&sanitize_key(key)?);
        Ok(())
    }
}

/// StorageState
///
/// The concrete type used to share the storage backend across the application state.
pub type StorageState = Arc<dyn StorageService>;
