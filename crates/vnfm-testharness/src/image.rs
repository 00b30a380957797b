//! ---
//! vnfm_section: "11-testing"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Scripted in-memory image store and source digester."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::collections::{HashSet, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use url::Url;
use vnfm_client::{
    DigestAlgorithm, DigestError, Image, ImageApi, ImageSource, ImageStatus, NewImage,
    RemoteError, Result, SourceDigest,
};

/// Digest reported by both fakes unless a test overrides it.
pub const DEFAULT_HASH: &str = "9b71d224bd62f3785d96d46ad3ea3d73319bfbc2890caadae2dff72519673ca7";
/// Algorithm reported by [`FakeImageApi`] unless overridden.
pub const DEFAULT_HASH_ALGO: &str = "sha512";

#[derive(Debug)]
struct FakeImage {
    image: Image,
    activation: VecDeque<ImageStatus>,
}

#[derive(Debug, Default)]
struct Inner {
    images: IndexMap<String, FakeImage>,
    activation: IndexMap<String, Vec<ImageStatus>>,
    hashes: IndexMap<String, (String, String)>,
    failures: HashSet<(&'static str, String)>,
    failing_deletes: usize,
    uploads: Vec<(String, Bytes)>,
    imports: Vec<(String, Url)>,
    deleted: Vec<String>,
    calls: IndexMap<&'static str, usize>,
    next_id: usize,
}

fn scripted_failure(endpoint: &str) -> RemoteError {
    RemoteError::Status {
        method: "FAKE".into(),
        url: endpoint.into(),
        status: 500,
        body: "scripted failure".into(),
    }
}

/// In-memory [`ImageApi`].
///
/// Images are keyed by name for scripting; ids are assigned as `image-N` in
/// creation order. By default an image turns `active` on the first poll after
/// its data arrives and reports [`DEFAULT_HASH`].
#[derive(Debug, Default)]
pub struct FakeImageApi {
    inner: Mutex<Inner>,
}

impl FakeImageApi {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses reported by successive `get_image` calls for the named image;
    /// the last one repeats.
    pub fn script_activation<I>(&self, name: &str, statuses: I) -> &Self
    where
        I: IntoIterator<Item = ImageStatus>,
    {
        self.inner
            .lock()
            .activation
            .insert(name.to_string(), statuses.into_iter().collect());
        self
    }

    /// Override the digest the store reports for the named image.
    pub fn report_hash(&self, name: &str, algorithm: &str, value: &str) -> &Self {
        self.inner
            .lock()
            .hashes
            .insert(name.to_string(), (algorithm.to_string(), value.to_string()));
        self
    }

    /// Fail `endpoint` (a trait method name) for the named image.
    pub fn fail(&self, endpoint: &'static str, name: &str) -> &Self {
        self.inner
            .lock()
            .failures
            .insert((endpoint, name.to_string()));
        self
    }

    /// Fail the next `count` deletes.
    pub fn fail_deletes(&self, count: usize) -> &Self {
        self.inner.lock().failing_deletes = count;
        self
    }

    /// Number of calls made to an endpoint, named after the trait method.
    pub fn calls(&self, endpoint: &str) -> usize {
        self.inner.lock().calls.get(endpoint).copied().unwrap_or(0)
    }

    /// Ids of successfully deleted images, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().deleted.clone()
    }

    /// Ids of images that still exist.
    pub fn live_images(&self) -> Vec<String> {
        self.inner.lock().images.keys().cloned().collect()
    }

    /// `(image_id, data)` of every upload.
    pub fn uploads(&self) -> Vec<(String, Bytes)> {
        self.inner.lock().uploads.clone()
    }

    /// `(image_id, url)` of every import.
    pub fn imports(&self) -> Vec<(String, Url)> {
        self.inner.lock().imports.clone()
    }
}

impl Inner {
    fn count(&mut self, endpoint: &'static str) {
        *self.calls.entry(endpoint).or_default() += 1;
    }

    fn check(&self, endpoint: &'static str, image_id: &str) -> Result<()> {
        let name = self
            .images
            .get(image_id)
            .map(|image| image.image.name.clone())
            .unwrap_or_default();
        if self.failures.contains(&(endpoint, name)) {
            return Err(scripted_failure(endpoint));
        }
        Ok(())
    }

    fn image_mut(&mut self, image_id: &str) -> Result<&mut FakeImage> {
        self.images.get_mut(image_id).ok_or_else(|| RemoteError::NotFound {
            what: format!("image {image_id}"),
        })
    }

    fn receive_data(&mut self, image_id: &str) -> Result<()> {
        let image = self.image_mut(image_id)?;
        image.image.status = ImageStatus::Saving;
        if image.activation.is_empty() {
            image.activation.push_back(ImageStatus::Active);
        }
        Ok(())
    }
}

#[async_trait]
impl ImageApi for FakeImageApi {
    async fn create_image(&self, request: &NewImage) -> Result<Image> {
        let mut inner = self.inner.lock();
        inner.count("create_image");
        if inner
            .failures
            .contains(&("create_image", request.name.clone()))
        {
            return Err(scripted_failure("create_image"));
        }
        inner.next_id += 1;
        let id = format!("image-{}", inner.next_id);
        let (algo, value) = inner
            .hashes
            .get(&request.name)
            .cloned()
            .unwrap_or_else(|| (DEFAULT_HASH_ALGO.to_string(), DEFAULT_HASH.to_string()));
        let image = Image {
            id: id.clone(),
            name: request.name.clone(),
            status: ImageStatus::Queued,
            os_hash_algo: Some(algo),
            os_hash_value: Some(value),
        };
        let activation = inner
            .activation
            .get(&request.name)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        inner.images.insert(
            id,
            FakeImage {
                image: image.clone(),
                activation,
            },
        );
        Ok(image)
    }

    async fn upload_image(&self, image_id: &str, path: &Path) -> Result<()> {
        let data = std::fs::read(path).map_err(|source| RemoteError::Source {
            path: path.to_path_buf(),
            source,
        })?;
        let mut inner = self.inner.lock();
        inner.count("upload_image");
        inner.check("upload_image", image_id)?;
        inner.receive_data(image_id)?;
        inner.uploads.push((image_id.to_string(), Bytes::from(data)));
        Ok(())
    }

    async fn import_image(&self, image_id: &str, uri: &Url) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.count("import_image");
        inner.check("import_image", image_id)?;
        inner.receive_data(image_id)?;
        inner.imports.push((image_id.to_string(), uri.clone()));
        Ok(())
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        let mut inner = self.inner.lock();
        inner.count("get_image");
        inner.check("get_image", image_id)?;
        let image = inner.image_mut(image_id)?;
        let next = if image.activation.len() > 1 {
            image.activation.pop_front()
        } else {
            image.activation.front().copied()
        };
        if let Some(status) = next {
            image.image.status = status;
        }
        Ok(image.image.clone())
    }

    async fn delete_image(&self, image_id: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.count("delete_image");
        if inner.failing_deletes > 0 {
            inner.failing_deletes -= 1;
            return Err(scripted_failure("delete_image"));
        }
        inner.check("delete_image", image_id)?;
        if inner.images.shift_remove(image_id).is_none() {
            return Err(RemoteError::NotFound {
                what: format!("image {image_id}"),
            });
        }
        inner.deleted.push(image_id.to_string());
        Ok(())
    }
}

/// [`SourceDigest`] answering from a table keyed by the source's display form.
#[derive(Debug, Default)]
pub struct FakeDigest {
    digests: Mutex<IndexMap<String, String>>,
    calls: Mutex<usize>,
}

impl FakeDigest {
    /// Digester that answers [`DEFAULT_HASH`] for every source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the digest of one source.
    pub fn set(&self, source: &ImageSource, digest: &str) -> &Self {
        self.digests
            .lock()
            .insert(source.to_string(), digest.to_string());
        self
    }

    /// Number of digests computed.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl SourceDigest for FakeDigest {
    async fn digest(
        &self,
        source: &ImageSource,
        _algorithm: DigestAlgorithm,
    ) -> std::result::Result<String, DigestError> {
        *self.calls.lock() += 1;
        Ok(self
            .digests
            .lock()
            .get(&source.to_string())
            .cloned()
            .unwrap_or_else(|| DEFAULT_HASH.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_image(name: &str) -> NewImage {
        NewImage {
            name: name.to_string(),
            disk_format: "qcow2".into(),
            container_format: "bare".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn image_activates_after_upload() {
        let api = FakeImageApi::new();
        let image = api.create_image(&new_image("cirros")).await.unwrap();
        assert_eq!(image.status, ImageStatus::Queued);
        assert_eq!(
            api.get_image(&image.id).await.unwrap().status,
            ImageStatus::Queued
        );

        let dir = tempfile::tempdir().unwrap();
        let disk = dir.path().join("cirros.img");
        std::fs::write(&disk, b"data").unwrap();
        api.upload_image(&image.id, &disk).await.unwrap();
        assert_eq!(
            api.get_image(&image.id).await.unwrap().status,
            ImageStatus::Active
        );
        assert_eq!(&api.uploads()[0].1[..], b"data");
    }

    #[tokio::test]
    async fn delete_failures_are_consumed() {
        let api = FakeImageApi::new();
        let image = api.create_image(&new_image("cirros")).await.unwrap();
        api.fail_deletes(1);
        assert!(api.delete_image(&image.id).await.is_err());
        api.delete_image(&image.id).await.unwrap();
        assert_eq!(api.calls("delete_image"), 2);
        assert_eq!(api.deleted(), vec![image.id]);
        assert!(api.live_images().is_empty());
    }
}
