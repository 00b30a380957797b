//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Software image provisioning with batch rollback."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use indexmap::IndexMap;
use uuid::Uuid;
use vnfm_client::{
    DigestAlgorithm, Image, ImageApi, ImageSource, ImageStatus, NewImage, SourceDigest,
};
use vnfm_common::ImagePolicy;
use vnfm_logging::{vnfm_info, vnfm_warn, LogContext};

use crate::compensate::compensate;
use crate::error::{DriverError, ImageFailure, Result, WaitKind};
use crate::metrics::DriverMetrics;
use crate::model::{GrantInfo, ResourceStatus, SoftwareImage, VnfResource};
use crate::poller::Poller;

/// `resource_type` of image records.
pub const IMAGE_RESOURCE_TYPE: &str = "image";

/// Provisioned images keyed by template node.
pub type ProvisionedImages = IndexMap<String, Vec<VnfResource>>;

/// Creates, fills and verifies remote images for one VNF instance.
#[derive(Clone, Copy)]
pub struct ImageProvisioner<'a> {
    images: &'a dyn ImageApi,
    digest: &'a dyn SourceDigest,
    policy: &'a ImagePolicy,
    metrics: Option<&'a DriverMetrics>,
}

impl<'a> ImageProvisioner<'a> {
    /// Provisioner bound to an image store and a source digester.
    pub fn new(
        images: &'a dyn ImageApi,
        digest: &'a dyn SourceDigest,
        policy: &'a ImagePolicy,
    ) -> Self {
        Self {
            images,
            digest,
            policy,
            metrics: None,
        }
    }

    /// Record provisioning and rollback counts.
    pub fn with_metrics(mut self, metrics: Option<&'a DriverMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Provision every image whose node is not already granted.
    ///
    /// Images are handled in order. When one fails, every image created
    /// earlier in the batch is deleted, as is the failing image if its record
    /// was already created, and the batch fails with
    /// [`DriverError::VnfPreInstantiationFailed`] carrying the original cause.
    pub async fn provision_all(
        &self,
        vnf_instance_id: &str,
        images: &[SoftwareImage],
        grant: &GrantInfo,
    ) -> Result<ProvisionedImages> {
        let mut provisioned = ProvisionedImages::new();
        for image in images {
            if grant.is_granted(&image.node) {
                vnfm_info!(
                    context = LogContext::new()
                        .with_vnf_instance(vnf_instance_id)
                        .with_resource(&image.node),
                    "image for node {} is granted, skipping creation",
                    image.node
                );
                continue;
            }

            let mut created = None;
            match self.provision(vnf_instance_id, image, &mut created).await {
                Ok(resource) => provisioned
                    .entry(image.node.clone())
                    .or_default()
                    .push(resource),
                Err(source) => {
                    vnfm_warn!(
                        context = LogContext::new()
                            .with_vnf_instance(vnf_instance_id)
                            .with_resource(&image.name),
                        "failed to provision image {}: {}",
                        image.name,
                        source
                    );
                    let rollback = provisioned
                        .values()
                        .flatten()
                        .map(|resource| resource.resource_identifier.clone())
                        .chain(created)
                        .collect::<Vec<_>>();
                    self.rollback(&rollback).await;
                    return Err(DriverError::VnfPreInstantiationFailed {
                        vnf_instance_id: vnf_instance_id.to_string(),
                        image: image.name.clone(),
                        source,
                    });
                }
            }
        }
        Ok(provisioned)
    }

    /// Provision one image. `created` receives the image id as soon as the
    /// remote record exists so the caller can remove it on failure.
    pub async fn provision(
        &self,
        vnf_instance_id: &str,
        image: &SoftwareImage,
        created: &mut Option<String>,
    ) -> std::result::Result<VnfResource, ImageFailure> {
        let record = self
            .images
            .create_image(&NewImage {
                name: image.name.clone(),
                disk_format: image.disk_format.clone(),
                container_format: image.container_format.clone(),
                min_disk: image.min_disk,
                min_ram: image.min_ram,
                visibility: None,
            })
            .await?;
        *created = Some(record.id.clone());

        match &image.source {
            ImageSource::Local(path) => self.images.upload_image(&record.id, path).await?,
            ImageSource::Url(url) => self.images.import_image(&record.id, url).await?,
        }

        let active = self.await_active(&record.id).await?;
        self.verify_checksum(image, &active).await?;

        if let Some(metrics) = self.metrics {
            metrics.record_image_provisioned();
        }
        vnfm_info!(
            context = LogContext::new()
                .with_vnf_instance(vnf_instance_id)
                .with_resource(&image.name),
            "image {} is active as {}",
            image.name,
            active.id
        );
        Ok(VnfResource {
            id: Uuid::new_v4(),
            resource_name: image.name.clone(),
            resource_type: IMAGE_RESOURCE_TYPE.to_string(),
            resource_identifier: active.id,
            resource_status: ResourceStatus::Created,
            vnf_instance_id: vnf_instance_id.to_string(),
        })
    }

    async fn await_active(&self, image_id: &str) -> std::result::Result<Image, ImageFailure> {
        let images = self.images;
        let image = Poller::new(WaitKind::Image, self.policy.activation)
            .with_metrics(self.metrics)
            .await_terminal(
                || images.get_image(image_id),
                |image: &Image| image.status.is_terminal(),
                |image: &Image| image.status == ImageStatus::Active,
            )
            .await?;
        Ok(image)
    }

    async fn verify_checksum(
        &self,
        image: &SoftwareImage,
        active: &Image,
    ) -> std::result::Result<(), ImageFailure> {
        let (Some(algorithm), Some(reported)) = (&active.os_hash_algo, &active.os_hash_value)
        else {
            return Err(ImageFailure::MissingChecksum);
        };
        let parsed: DigestAlgorithm = algorithm.parse()?;
        let computed = self.digest.digest(&image.source, parsed).await?;
        if !computed.eq_ignore_ascii_case(reported) {
            return Err(ImageFailure::ChecksumMismatch {
                algorithm: algorithm.clone(),
                reported: reported.clone(),
                computed,
            });
        }
        Ok(())
    }

    async fn rollback(&self, image_ids: &[String]) {
        if image_ids.is_empty() {
            return;
        }
        if let Some(metrics) = self.metrics {
            metrics.record_image_rollback();
        }
        for image_id in image_ids {
            compensate("delete_image", image_id, 1, self.metrics, |_| {
                self.images.delete_image(image_id)
            })
            .await;
        }
    }
}

impl std::fmt::Debug for ImageProvisioner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProvisioner")
            .field("policy", self.policy)
            .finish_non_exhaustive()
    }
}
