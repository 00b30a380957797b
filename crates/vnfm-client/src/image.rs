//! ---
//! vnfm_section: "05-external-interfaces"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Image-store API and its HTTP binding."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::future::Future;
use std::path::Path;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Method};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::warn;
use url::Url;
use vnfm_common::ImageStoreConfig;

use crate::error::{RemoteError, Result};
use crate::http::Endpoint;
use crate::types::{Image, NewImage};

/// Calls the lifecycle driver makes against the image store.
#[async_trait]
pub trait ImageApi: Send + Sync + 'static {
    /// Create an image record (metadata only).
    async fn create_image(&self, image: &NewImage) -> Result<Image>;

    /// Upload image data read from a local file.
    async fn upload_image(&self, image_id: &str, path: &Path) -> Result<()>;

    /// Ask the store to import image data from a URL.
    async fn import_image(&self, image_id: &str, uri: &Url) -> Result<()>;

    /// Fetch the current image record.
    async fn get_image(&self, image_id: &str) -> Result<Image>;

    /// Delete an image record and its data.
    async fn delete_image(&self, image_id: &str) -> Result<()>;
}

/// `reqwest` implementation of [`ImageApi`].
///
/// One-shot calls (create, upload, import, delete) are retried
/// `connect_retries` extra times when no response arrives at all. HTTP error
/// statuses are never retried. Uploads stream the file and reopen it for
/// every attempt.
#[derive(Debug, Clone)]
pub struct HttpImageClient {
    endpoint: Endpoint,
    connect_retries: u32,
}

impl HttpImageClient {
    /// Build a client for the configured image-store endpoint.
    pub fn new(config: &ImageStoreConfig) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config.endpoint.clone(), config.request_timeout)?,
            connect_retries: config.connect_retries,
        })
    }

    async fn with_transport_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Err(err) if err.is_transport() && attempt <= self.connect_retries => {
                    warn!(operation, attempt, error = %err, "image store unreachable, retrying");
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl ImageApi for HttpImageClient {
    async fn create_image(&self, image: &NewImage) -> Result<Image> {
        let url = self.endpoint.url("images")?;
        let what = format!("image {}", image.name);
        self.with_transport_retry("create_image", || {
            self.endpoint.send_json(
                self.endpoint.request(Method::POST, url.clone()).json(image),
                &what,
            )
        })
        .await
    }

    async fn upload_image(&self, image_id: &str, path: &Path) -> Result<()> {
        let url = self.endpoint.url_segments(&["images", image_id, "file"])?;
        let what = format!("image {image_id}");
        self.with_transport_retry("upload_image", || {
            let url = url.clone();
            let what = what.as_str();
            async move {
                let file = tokio::fs::File::open(path).await.map_err(|source| {
                    RemoteError::Source {
                        path: path.to_path_buf(),
                        source,
                    }
                })?;
                let request = self
                    .endpoint
                    .request(Method::PUT, url)
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(Body::wrap_stream(ReaderStream::new(file)));
                self.endpoint.send(request, what).await.map(|_| ())
            }
        })
        .await
    }

    async fn import_image(&self, image_id: &str, uri: &Url) -> Result<()> {
        let url = self.endpoint.url_segments(&["images", image_id, "import"])?;
        let what = format!("image {image_id}");
        let body = json!({ "method": { "name": "web-download", "uri": uri.as_str() } });
        self.with_transport_retry("import_image", || {
            let request = self
                .endpoint
                .request(Method::POST, url.clone())
                .json(&body);
            let what = what.as_str();
            async move { self.endpoint.send(request, what).await.map(|_| ()) }
        })
        .await
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        let url = self.endpoint.url_segments(&["images", image_id])?;
        self.endpoint
            .send_json(
                self.endpoint.request(Method::GET, url),
                &format!("image {image_id}"),
            )
            .await
    }

    async fn delete_image(&self, image_id: &str) -> Result<()> {
        let url = self.endpoint.url_segments(&["images", image_id])?;
        let what = format!("image {image_id}");
        self.with_transport_retry("delete_image", || {
            let request = self.endpoint.request(Method::DELETE, url.clone());
            let what = what.as_str();
            async move { self.endpoint.send(request, what).await.map(|_| ()) }
        })
        .await
    }
}
