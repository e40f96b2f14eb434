use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

use crate::services::encryption::{EncryptionError, EncryptionService};

/// Object key under which a scan's sealed image is stored.
pub fn scan_image_key(scan_id: Uuid) -> String {
    format!("scans/{}.enc", scan_id)
}

/// Source of raw scan image bytes for the Preprocess stage.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn retrieve_image(&self, scan_id: Uuid) -> Result<Vec<u8>, StorageError>;
}

/// Connection settings for the R2 bucket holding scan images.
#[derive(Debug, Clone)]
pub struct R2Config {
    pub bucket: String,
    /// S3-compatible endpoint URL
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
}

/// Map an S3 response status onto a storage outcome.
fn check_status(status: u16) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound),
        other => Err(StorageError::Status(other)),
    }
}

/// Scan images sealed with [`EncryptionService`] in a Cloudflare R2 bucket.
pub struct R2ImageSource {
    bucket: Box<Bucket>,
    encryption: EncryptionService,
}

impl R2ImageSource {
    pub fn connect(config: &R2Config, encryption: EncryptionService) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: config.endpoint.clone(),
        };

        let credentials = Credentials::new(
            Some(&config.access_key),
            Some(&config.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(&config.bucket, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket, encryption })
    }

    /// Seal and upload the image for a scan, replacing any previous one.
    pub async fn store_image(&self, scan_id: Uuid, image: &[u8]) -> Result<(), StorageError> {
        let sealed = self.encryption.seal(scan_id, image)?;
        let response = self
            .bucket
            .put_object_with_content_type(scan_image_key(scan_id), &sealed, "application/octet-stream")
            .await?;
        check_status(response.status_code())?;

        tracing::debug!(scan_id = %scan_id, bytes = image.len(), "Stored scan image");
        Ok(())
    }

    pub async fn remove_image(&self, scan_id: Uuid) -> Result<(), StorageError> {
        let response = self.bucket.delete_object(scan_image_key(scan_id)).await?;
        check_status(response.status_code())
    }
}

#[async_trait]
impl ImageSource for R2ImageSource {
    async fn retrieve_image(&self, scan_id: Uuid) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(scan_image_key(scan_id)).await?;
        check_status(response.status_code())?;
        Ok(self.encryption.open(scan_id, response.as_slice())?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Image not found")]
    NotFound,

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage returned status {0}")]
    Status(u16),

    #[error("Image could not be decrypted: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
