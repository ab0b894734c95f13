use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::{Digest, Sha1};

use yapyap_types::models::Media;

/// A file received in a multipart request, not yet hosted anywhere.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Hosting for attachments and avatars.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, upload: Upload, folder: &str) -> Result<Media>;
}

/// Signed uploads to Cloudinary's `auto` endpoint, which accepts images,
/// video and raw files alike.
pub struct CloudinaryStore {
    client: Client,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Deserialize)]
struct CloudinaryResponse {
    secure_url: String,
    public_id: String,
    format: Option<String>,
    bytes: Option<i64>,
}

impl CloudinaryStore {
    pub fn new(cloud_name: String, api_key: String, api_secret: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building Cloudinary HTTP client")?;
        Ok(Self {
            client,
            cloud_name,
            api_key,
            api_secret,
        })
    }

    fn sign(&self, folder: &str, timestamp: i64) -> String {
        signature(folder, timestamp, &self.api_secret)
    }
}

/// Cloudinary signs the alphabetically sorted parameters followed by the
/// API secret.
fn signature(folder: &str, timestamp: i64, secret: &str) -> String {
    let to_sign = format!("folder={}&timestamp={}{}", folder, timestamp, secret);
    hex::encode(Sha1::digest(to_sign.as_bytes()))
}

#[async_trait]
impl MediaStore for CloudinaryStore {
    async fn upload(&self, upload: Upload, folder: &str) -> Result<Media> {
        let timestamp = chrono::Utc::now().timestamp();

        let mut file = Part::bytes(upload.data.to_vec()).file_name(upload.filename.clone());
        if let Some(ct) = &upload.content_type {
            file = file.mime_str(ct).context("invalid upload content type")?;
        }

        let form = Form::new()
            .part("file", file)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp.to_string())
            .text("folder", folder.to_string())
            .text("signature", self.sign(folder, timestamp));

        let url = format!(
            "https://api.cloudinary.com/v1_1/{}/auto/upload",
            self.cloud_name
        );
        let res = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .context("Cloudinary request failed")?;

        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            bail!("Cloudinary rejected {} ({}): {}", upload.filename, status, detail);
        }

        let body: CloudinaryResponse = res.json().await.context("decoding Cloudinary response")?;
        Ok(Media {
            url: body.secure_url,
            public_id: body.public_id,
            format: body.format,
            size: body.bytes,
        })
    }
}

pub struct DisabledMediaStore;

#[async_trait]
impl MediaStore for DisabledMediaStore {
    async fn upload(&self, upload: Upload, _folder: &str) -> Result<Media> {
        bail!("media uploads are not configured, rejecting {}", upload.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_sha1_hex_of_sorted_params() {
        let sig = signature("yapyap", 1_700_000_000, "secret");
        let expected = hex::encode(Sha1::digest(b"folder=yapyap&timestamp=1700000000secret"));
        assert_eq!(sig, expected);
        assert_eq!(sig.len(), 40);
    }
}
