//! ---
//! vnfm_section: "05-external-interfaces"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Content digests of image sources."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncReadExt;
use url::Url;

use crate::error::RemoteError;

const READ_CHUNK: usize = 64 * 1024;

/// Where the bytes of a software image come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// File on the local filesystem, uploaded by the driver.
    Local(PathBuf),
    /// Remote URL, imported by the image store itself.
    Url(Url),
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Local(path) => write!(f, "{}", path.display()),
            ImageSource::Url(url) => write!(f, "{url}"),
        }
    }
}

/// Digest algorithms the image store may report in `os_hash_algo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(DigestError::UnsupportedAlgorithm(raw.to_string())),
        }
    }
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Sha256(hasher) => hasher.update(chunk),
            Hasher::Sha512(hasher) => hasher.update(chunk),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha512(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// Hex digest of an in-memory buffer.
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Failure computing a source digest.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// The store reported an algorithm this driver cannot compute.
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),
    /// Reading a local source failed.
    #[error("unable to read {path}: {source}")]
    Io {
        /// Path of the local source.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Fetching a URL source failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Computes the digest of an image source, hex encoded.
#[async_trait]
pub trait SourceDigest: Send + Sync + 'static {
    /// Hash the full content of `source` with `algorithm`.
    async fn digest(
        &self,
        source: &ImageSource,
        algorithm: DigestAlgorithm,
    ) -> Result<String, DigestError>;
}

/// Reads local files from disk and streams URL sources over HTTP.
#[derive(Debug, Clone)]
pub struct StreamingDigest {
    client: reqwest::Client,
}

impl StreamingDigest {
    /// Build a digester whose HTTP downloads give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn digest_file(
        &self,
        path: &Path,
        algorithm: DigestAlgorithm,
    ) -> Result<String, DigestError> {
        let io_err = |source| DigestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let mut hasher = Hasher::new(algorithm);
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let read = file.read(&mut buf).await.map_err(io_err)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(hasher.finalize_hex())
    }

    async fn digest_url(
        &self,
        url: &Url,
        algorithm: DigestAlgorithm,
    ) -> Result<String, DigestError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(RemoteError::from)?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound {
                what: format!("image source {url}"),
            }
            .into());
        }
        if !status.is_success() {
            return Err(RemoteError::Status {
                method: "GET".into(),
                url: url.to_string(),
                status: status.as_u16(),
                body: String::new(),
            }
            .into());
        }
        let mut hasher = Hasher::new(algorithm);
        while let Some(chunk) = response.chunk().await.map_err(RemoteError::from)? {
            hasher.update(&chunk);
        }
        Ok(hasher.finalize_hex())
    }
}

#[async_trait]
impl SourceDigest for StreamingDigest {
    async fn digest(
        &self,
        source: &ImageSource,
        algorithm: DigestAlgorithm,
    ) -> Result<String, DigestError> {
        match source {
            ImageSource::Local(path) => self.digest_file(path, algorithm).await,
            ImageSource::Url(url) => self.digest_url(url, algorithm).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            digest_bytes(DigestAlgorithm::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(digest_bytes(DigestAlgorithm::Sha512, b"abc").len(), 128);
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("SHA512".parse::<DigestAlgorithm>().unwrap(), DigestAlgorithm::Sha512);
        assert!(matches!(
            "md5".parse::<DigestAlgorithm>(),
            Err(DigestError::UnsupportedAlgorithm(name)) if name == "md5"
        ));
    }

    #[tokio::test]
    async fn local_file_digest_matches_buffer_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.qcow2");
        let data = vec![7u8; READ_CHUNK * 2 + 13];
        std::fs::write(&path, &data).unwrap();

        let digester = StreamingDigest::new(Duration::from_secs(1)).unwrap();
        let digest = digester
            .digest(&ImageSource::Local(path), DigestAlgorithm::Sha256)
            .await
            .unwrap();
        assert_eq!(digest, digest_bytes(DigestAlgorithm::Sha256, &data));
    }

    #[tokio::test]
    async fn missing_local_file_is_io_error() {
        let digester = StreamingDigest::new(Duration::from_secs(1)).unwrap();
        let err = digester
            .digest(
                &ImageSource::Local(PathBuf::from("/nonexistent/image.img")),
                DigestAlgorithm::Sha512,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DigestError::Io { .. }));
    }
}
