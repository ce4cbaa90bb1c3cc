//! Base image resolution through an OCI distribution client.
//!
//! Pulls the pinned base reference, installs its layers into the blob store,
//! and surfaces the base's own configuration so the build can inherit its
//! environment. Pull failure is fatal and aborts the build.

use super::{ImageStore, LayerRecord};
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use oci_client::client::ClientConfig;
use oci_client::manifest;
use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};

/// A resolved base image with its layers installed in the blob store.
#[derive(Debug)]
pub struct PulledBase {
    pub reference: String,
    /// Manifest digest reported by the registry, when available.
    pub digest: Option<String>,
    /// Base layers in unpack order.
    pub layers: Vec<LayerRecord>,
    /// Parsed base image configuration (env, working dir) for inheritance.
    pub config: Option<oci_spec::image::ImageConfiguration>,
}

pub struct BasePuller {
    client: Client,
}

impl BasePuller {
    pub fn new() -> Self {
        Self {
            client: Client::new(ClientConfig::default()),
        }
    }

    pub async fn pull(&self, reference: &str, store: &ImageStore) -> BakeliteResult<PulledBase> {
        let parsed: Reference = reference
            .try_into()
            .map_err(|e| BakeliteError::Image(format!("invalid base reference {reference}: {e}")))?;

        let accepted = vec![
            manifest::IMAGE_LAYER_MEDIA_TYPE,
            manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE,
            manifest::IMAGE_DOCKER_LAYER_TAR_MEDIA_TYPE,
            manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
        ];
        let image = self
            .client
            .pull(&parsed, &RegistryAuth::Anonymous, accepted)
            .await
            .map_err(|e| BakeliteError::Image(format!("pulling {reference}: {e}")))?;

        let mut layers = Vec::with_capacity(image.layers.len());
        for layer in &image.layers {
            let (digest, newly_installed) = store.install_bytes(&layer.data)?;
            if newly_installed {
                tracing::debug!(digest = %digest, "installed base layer blob");
            }
            layers.push(LayerRecord {
                cache_key: format!("base:{digest}"),
                digest,
                size: layer.data.len() as u64,
                stage: "base".into(),
            });
        }

        let config = serde_json::from_slice(&image.config.data).ok();

        tracing::info!(
            reference,
            layers = layers.len(),
            digest = ?image.digest,
            "pulled base image"
        );

        Ok(PulledBase {
            reference: reference.to_string(),
            digest: image.digest.clone(),
            layers,
            config,
        })
    }
}

impl Default for BasePuller {
    fn default() -> Self {
        Self::new()
    }
}
