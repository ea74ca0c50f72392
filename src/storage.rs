//! Durable logo hosting.
//!
//! Logos found on prospect sites are downloaded and re-uploaded to our S3 (or
//! MinIO) bucket so the stored record does not depend on the original site.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::stealth;

/// Accepted logo extensions and the content type each is uploaded with.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("ico", "image/x-icon"),
];

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<()>;

    /// Make the object world-readable and return its public URL.
    async fn make_public(&self, key: &str) -> Result<String>;
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base_url: String,
}

impl S3BlobStore {
    pub async fn connect(config: &StorageConfig) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &config.endpoint {
            // MinIO needs path-style addressing
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        info!("🪣 Blob storage: bucket {} ({})", config.bucket, config.public_base_url);
        Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, bytes: Vec<u8>, key: &str, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await?;
        Ok(())
    }

    async fn make_public(&self, key: &str) -> Result<String> {
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await?;
        Ok(format!("{}/{}", self.public_base_url, key))
    }
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(stealth::random_user_agent())
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("GET {} returned {}", url, status));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Lower-cased extension of the URL path (query and fragment ignored), if it is an accepted image type.
pub fn image_type(url: &str) -> Option<(&'static str, &'static str)> {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(|c: char| c == '?' || c == '#').next().unwrap_or_default().to_string(),
    };
    let file = path.rsplit('/').next()?;
    let (_, ext) = file.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();

    IMAGE_TYPES.iter().copied().find(|(known, _)| *known == ext)
}

/// `logos/<slug>-<site id>.<ext>`. The slug keeps ASCII alphanumerics and joins
/// everything else with `-`; the site id is derived from the website, so two
/// prospects sharing a name never share a key.
pub fn storage_key(name_hint: &str, website: &str, ext: &str) -> String {
    let mut slug = String::new();
    for c in name_hint.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "logo" } else { slug };
    let site_id = Uuid::new_v5(&Uuid::NAMESPACE_URL, website.as_bytes()).simple().to_string();
    format!("logos/{}-{}.{}", slug, &site_id[..12], ext)
}

pub struct MediaRehoster {
    fetcher: Arc<dyn ImageFetcher>,
    blobs: Arc<dyn BlobStore>,
}

impl MediaRehoster {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { fetcher, blobs }
    }

    /// Public URL of the re-hosted copy, or `None` when there is nothing usable or any step fails.
    pub async fn rehost(&self, source_url: Option<&str>, name_hint: &str, website: &str) -> Option<String> {
        let source_url = source_url?.trim();
        if source_url.is_empty() {
            return None;
        }

        let Some((ext, content_type)) = image_type(source_url) else {
            debug!("Ignoring logo with unsupported extension: {}", source_url);
            return None;
        };

        match self.try_rehost(source_url, name_hint, website, ext, content_type).await {
            Ok(url) => {
                info!("🖼️ Logo re-hosted: {}", url);
                Some(url)
            }
            Err(e) => {
                warn!("⚠️ Logo re-hosting failed for {}: {}", source_url, e);
                None
            }
        }
    }

    async fn try_rehost(
        &self,
        source_url: &str,
        name_hint: &str,
        website: &str,
        ext: &str,
        content_type: &str,
    ) -> Result<String> {
        let bytes = self.fetcher.fetch(source_url).await?;
        if bytes.is_empty() {
            return Err(anyhow!("empty body"));
        }

        let key = storage_key(name_hint, website, ext);
        self.blobs.upload(bytes, &key, content_type).await?;
        self.blobs.make_public(&key).await
    }
}


#[cfg(test)]
mod tests {
    use super::fake::{FakeBlobStore, FakeFetcher};
    use super::*;

    fn build(fetcher: FakeFetcher, blobs: Arc<FakeBlobStore>) -> (MediaRehoster, Arc<FakeFetcher>) {
        let fetcher = Arc::new(fetcher);
        (MediaRehoster::new(fetcher.clone(), blobs), fetcher)
    }

    #[test]
    fn test_image_type_strips_query() {
        assert_eq!(image_type("https://a.test/img/Logo.PNG?v=2#top"), Some(("png", "image/png")));
        assert_eq!(image_type("https://a.test/logo.jpeg"), Some(("jpeg", "image/jpeg")));
        assert_eq!(image_type("https://a.test/logo.svg"), Some(("svg", "image/svg+xml")));
        assert_eq!(image_type("http://x.test/img.exe"), None);
        assert_eq!(image_type("https://a.test/logo"), None);
        assert_eq!(image_type("https://a.test/"), None);
    }

    #[test]
    fn test_storage_key_sanitizes_name() {
        let key = storage_key("Plomberie Martin & Fils", "https://martin.test/", "png");
        assert!(key.starts_with("logos/plomberie-martin-fils-"), "{}", key);
        assert!(key.ends_with(".png"));
        assert!(storage_key("  Élec' 69 ", "https://elec.test/", "svg").starts_with("logos/lec-69-"));
        assert!(storage_key("***", "https://x.test/", "gif").starts_with("logos/logo-"));
    }

    #[test]
    fn test_storage_key_is_stable_per_website() {
        assert_eq!(
            storage_key("Accueil", "https://one.test/", "png"),
            storage_key("Accueil", "https://one.test/", "png")
        );
        assert_ne!(
            storage_key("Accueil", "https://one.test/", "png"),
            storage_key("Accueil", "https://two.test/", "png")
        );
    }

    #[tokio::test]
    async fn test_same_name_on_two_sites_gets_two_objects() {
        let blobs = Arc::new(FakeBlobStore::default());
        let fetcher = FakeFetcher::serving("https://one.test/logo.png", b"one").and("https://two.test/logo.png", b"four");
        let (rehoster, _) = build(fetcher, blobs.clone());

        let one = rehoster.rehost(Some("https://one.test/logo.png"), "Accueil", "https://one.test/").await;
        let two = rehoster.rehost(Some("https://two.test/logo.png"), "Accueil", "https://two.test/").await;

        assert!(one.is_some() && two.is_some());
        assert_ne!(one, two);
        let uploads = blobs.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 2);
        assert_ne!(uploads[0].0, uploads[1].0);
    }

    #[tokio::test]
    async fn test_rehost_uploads_and_returns_public_url() {
        let blobs = Arc::new(FakeBlobStore::default());
        let (rehoster, _) = build(FakeFetcher::serving("https://martin.test/logo.png?x=1", b"\x89PNG"), blobs.clone());

        let url = rehoster
            .rehost(Some("https://martin.test/logo.png?x=1"), "Martin", "https://martin.test/")
            .await;

        let key = storage_key("Martin", "https://martin.test/", "png");
        assert_eq!(url, Some(format!("https://cdn.test/{}", key)));
        assert_eq!(
            blobs.uploads.lock().unwrap().clone(),
            vec![(key, "image/png".to_string(), 4)]
        );
    }

    #[tokio::test]
    async fn test_rejects_non_image_without_download_or_upload() {
        let blobs = Arc::new(FakeBlobStore::default());
        let (rehoster, fetcher) = build(FakeFetcher::serving("http://x.test/img.exe", b"MZ"), blobs.clone());

        assert_eq!(rehoster.rehost(Some("http://x.test/img.exe"), "X", "http://x.test/").await, None);
        assert!(fetcher.requests.lock().unwrap().is_empty());
        assert!(blobs.uploads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_source_is_none() {
        let blobs = Arc::new(FakeBlobStore::default());
        let (rehoster, fetcher) = build(FakeFetcher::default(), blobs);

        assert_eq!(rehoster.rehost(None, "X", "https://x.test/").await, None);
        assert_eq!(rehoster.rehost(Some(""), "X", "https://x.test/").await, None);
        assert!(fetcher.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_download_or_upload_failure_is_none() {
        let blobs = Arc::new(FakeBlobStore::default());
        let (rehoster, _) = build(FakeFetcher::default(), blobs);
        assert_eq!(rehoster.rehost(Some("https://gone.test/logo.png"), "Gone", "https://gone.test/").await, None);

        let failing = Arc::new(FakeBlobStore {
            fail_uploads: true,
            ..Default::default()
        });
        let (rehoster, _) = build(FakeFetcher::serving("https://a.test/logo.gif", b"GIF89a"), failing);
        assert_eq!(rehoster.rehost(Some("https://a.test/logo.gif"), "A", "https://a.test/").await, None);
    }
}
