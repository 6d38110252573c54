/// Media library access
///
/// This module handles:
/// - The asset provider interface the triage core consumes
/// - A folder-backed provider for photo directories on disk
/// - An in-memory provider for tests and demos
/// - The deduplicating decoded-image cache
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ProviderError;
use crate::state::data::{GeoLocation, PhotoItem};

pub mod cache;
pub mod folder;
pub mod memory;

pub use cache::{CacheLookup, ImageCache, TierSizes};
pub use folder::FolderProvider;
pub use memory::MemoryProvider;

/// Photo library authorization, checked before any other provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Authorized,
    /// The user granted access to a subset of the library
    Limited,
    Denied,
    NotDetermined,
}

impl Authorization {
    pub fn is_granted(self) -> bool {
        matches!(self, Authorization::Authorized | Authorization::Limited)
    }
}

/// Resolution tier of a decoded image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Thumbnail,
    Full,
}

impl Tier {
    pub fn policy(self) -> DeliveryPolicy {
        match self {
            Tier::Thumbnail => DeliveryPolicy::FastNoNetwork,
            Tier::Full => DeliveryPolicy::HighQualityNetworkAllowed,
        }
    }
}

/// How hard the provider may try to deliver an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Small and fast; never go to the network
    FastNoNetwork,
    /// Best quality; may download an original that is not on this device
    HighQualityNetworkAllowed,
}

/// One asset as enumerated by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    pub is_live: bool,
    pub location: Option<GeoLocation>,
}

impl From<AssetRecord> for PhotoItem {
    fn from(record: AssetRecord) -> Self {
        PhotoItem {
            id: record.id,
            created_at: record.created_at,
            width: record.width,
            height: record.height,
            location: record.location,
            is_live: record.is_live,
        }
    }
}

/// Parameters of a single image fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub id: String,
    /// Bounding box (width, height) the result should fit
    pub target_size: (u32, u32),
    pub policy: DeliveryPolicy,
}

/// A decoded RGBA8 image
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// The host media library, as seen by the triage core.
///
/// Implementations always deliver the current still representation of an
/// asset; for live/motion photos that means the key photo, never a frame
/// taken from the motion clip.
#[async_trait]
pub trait AssetProvider: Send + Sync {
    fn authorization(&self) -> Authorization;

    /// Ask the user for access. Providers without a prompt report the current status.
    async fn request_authorization(&self) -> Authorization {
        self.authorization()
    }

    /// Every asset, newest first.
    async fn fetch_all(&self) -> Result<Vec<AssetRecord>, ProviderError>;

    async fn request_image(&self, request: ImageRequest) -> Result<DecodedImage, ProviderError>;

    /// Delete all of `ids` or none of them.
    async fn delete_batch(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError>;
}

/// Fail with `Unauthorized` unless the provider has been granted access.
pub(crate) fn ensure_authorized(provider: &dyn AssetProvider) -> Result<(), ProviderError> {
    let status = provider.authorization();
    if status.is_granted() {
        Ok(())
    } else {
        Err(ProviderError::Unauthorized(status))
    }
}
