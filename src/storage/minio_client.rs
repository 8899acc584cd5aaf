use super::{ObjectStore, StorageError};
use async_trait::async_trait;
use log::{debug, info};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// MinIO 연결 설정
#[derive(Debug, Clone)]
pub struct MinioConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl MinioConfig {
    /// 환경 변수에서 MinIO 설정 읽기
    pub fn from_env() -> Result<Self, StorageError> {
        let required = |name: &str| {
            std::env::var(name)
                .map_err(|_| StorageError::Backend(format!("environment variable {name} is not set")))
        };
        Ok(MinioConfig {
            endpoint: std::env::var("MINIO_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }

    pub fn new(endpoint: String, access_key: String, secret_key: String) -> Self {
        MinioConfig {
            endpoint,
            access_key,
            secret_key,
            region: "us-east-1".to_string(),
        }
    }
}

/// S3/MinIO object store over `rust-s3`.
pub struct MinioStore {
    region: Region,
    credentials: Credentials,
}

fn backend(e: S3Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

// 404는 NotFound, 그 외 실패는 Backend
fn classify(e: S3Error, bucket: &str, key: &str) -> StorageError {
    match e {
        S3Error::HttpFailWithBody(404, _) => StorageError::NotFound(format!("{bucket}/{key}")),
        other => backend(other),
    }
}

fn check_status(status: u16, bucket: &str, key: &str) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(format!("{bucket}/{key}"))),
        code => Err(StorageError::Backend(format!(
            "{bucket}/{key}: unexpected HTTP status {code}"
        ))),
    }
}

impl MinioStore {
    pub fn new(config: &MinioConfig) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        info!("MinIO store configured for {}", config.endpoint);
        Ok(MinioStore {
            region,
            credentials,
        })
    }

    pub fn from_env() -> Result<Self, StorageError> {
        Self::new(&MinioConfig::from_env()?)
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>, StorageError> {
        // MinIO는 path-style 사용
        Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map(|bucket| bucket.with_path_style())
            .map_err(backend)
    }
}

#[async_trait]
impl ObjectStore for MinioStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .bucket(bucket)?
            .get_object(key)
            .await
            .map_err(|e| classify(e, bucket, key))?;
        check_status(response.status_code(), bucket, key)?;
        Ok(response.bytes().to_vec())
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        let response = self
            .bucket(bucket)?
            .put_object(key, &data)
            .await
            .map_err(backend)?;
        check_status(response.status_code(), bucket, key)?;
        debug!("Uploaded {bucket}/{key} ({} bytes)", data.len());
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let pages = self
            .bucket(bucket)?
            .list(prefix.to_string(), None)
            .await
            .map_err(|e| classify(e, bucket, prefix))?;

        let mut keys: Vec<String> = pages
            .into_iter()
            .flat_map(|page| page.contents.into_iter().map(|object| object.key))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| StorageError::Backend(format!("create {}: {e}", dest.display())))?;
        let status = self
            .bucket(bucket)?
            .get_object_to_writer(key, &mut file)
            .await
            .map_err(|e| classify(e, bucket, key))?;
        check_status(status, bucket, key)?;
        file.flush()
            .await
            .map_err(|e| StorageError::Backend(format!("flush {}: {e}", dest.display())))?;

        let size = tokio::fs::metadata(dest)
            .await
            .map(|m| m.len())
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        info!("Downloaded {bucket}/{key} -> {} ({size} bytes)", dest.display());
        Ok(size)
    }
}
