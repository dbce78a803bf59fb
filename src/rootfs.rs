//! Root filesystem selection.
//!
//! A board cannot boot without a root filesystem, so failing to find one
//! skips the whole board. The bundled [`CatalogChooser`] maps a board's
//! [`RootfsDescriptor`](crate::config::RootfsDescriptor) to an image path
//! under a base URL:
//!
//! ```toml
//! [rootfs]
//! base_url = "http://images.lab/rootfs"
//!
//! [rootfs.images]
//! armv7 = "armv7/rootfs.cpio.gz"
//! armv7-eb = "armv7eb/rootfs.cpio.gz"
//! ```
//!
//! A board with `rootfs = { arch = "armv7", flavor = "eb" }` gets the
//! `armv7-eb` image; without a flavor image, the plain `armv7` one.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::board::Board;
use crate::config::RootfsConfig;

/// Result type for rootfs lookups.
pub type RootfsResult<T> = Result<T, RootfsError>;

/// Reasons no rootfs could be found for a board.
#[derive(Debug, thiserror::Error)]
pub enum RootfsError {
    #[error("Board {0} has no rootfs requirements")]
    NoDescriptor(String),

    #[error("No rootfs image for '{key}' (board {board})")]
    NoImage { board: String, key: String },

    #[error("Rootfs catalog has no base_url")]
    NoBaseUrl,
}

/// Picks a bootable root filesystem URL for a board.
#[async_trait]
pub trait RootfsChooser: Send + Sync {
    async fn get_url(&self, board: &Board) -> RootfsResult<String>;
}

/// Chooser backed by the static `[rootfs]` catalog.
#[derive(Debug, Clone)]
pub struct CatalogChooser {
    base_url: Option<String>,
    images: BTreeMap<String, String>,
}

impl CatalogChooser {
    pub fn new(config: &RootfsConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string()),
            images: config.images.clone(),
        }
    }

    fn image_for(&self, board: &Board) -> RootfsResult<&str> {
        let descriptor = board
            .rootfs
            .as_ref()
            .ok_or_else(|| RootfsError::NoDescriptor(board.id.clone()))?;

        let key = match &descriptor.flavor {
            Some(flavor) => format!("{}-{}", descriptor.arch, flavor),
            None => descriptor.arch.clone(),
        };

        self.images
            .get(&key)
            .or_else(|| self.images.get(&descriptor.arch))
            .map(String::as_str)
            .ok_or(RootfsError::NoImage {
                board: board.id.clone(),
                key,
            })
    }
}

#[async_trait]
impl RootfsChooser for CatalogChooser {
    async fn get_url(&self, board: &Board) -> RootfsResult<String> {
        let image = self.image_for(board)?;
        if image.contains("://") {
            return Ok(image.to_string());
        }
        let base = self.base_url.as_deref().ok_or(RootfsError::NoBaseUrl)?;
        Ok(format!("{}/{}", base, image.trim_start_matches('/')))
    }
}
