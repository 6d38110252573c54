/// In-memory asset provider
///
/// Holds a fixed list of assets and fabricates flat images on request.
/// Everything about it can be scripted: the authorization status, failing
/// deletions or image loads, and a gate that holds image requests until
/// released so tests can line up concurrent callers.
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::watch;

use super::{
    ensure_authorized, AssetProvider, AssetRecord, Authorization, DecodedImage, DeliveryPolicy,
    ImageRequest,
};
use crate::error::ProviderError;

pub struct MemoryProvider {
    assets: Mutex<Vec<AssetRecord>>,
    authorization: Mutex<Authorization>,
    fail_deletes: AtomicBool,
    failing_images: Mutex<HashSet<String>>,
    image_requests: Mutex<Vec<ImageRequest>>,
    fetch_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl MemoryProvider {
    pub fn new(mut assets: Vec<AssetRecord>) -> Self {
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let (gate, _) = watch::channel(true);
        MemoryProvider {
            assets: Mutex::new(assets),
            authorization: Mutex::new(Authorization::Authorized),
            fail_deletes: AtomicBool::new(false),
            failing_images: Mutex::new(HashSet::new()),
            image_requests: Mutex::new(Vec::new()),
            fetch_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            gate,
        }
    }

    /// Assets named by `ids`, newest first in the given order.
    pub fn with_photos<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let newest = Utc
            .with_ymd_and_hms(2024, 12, 19, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let assets = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| AssetRecord {
                id: id.into(),
                created_at: newest - Duration::minutes(i as i64),
                width: 4032,
                height: 3024,
                is_live: false,
                location: None,
            })
            .collect();
        Self::new(assets)
    }

    pub fn set_authorization(&self, status: Authorization) {
        *lock(&self.authorization) = status;
    }

    /// Add an asset, as another app would.
    pub fn insert(&self, asset: AssetRecord) {
        let mut assets = lock(&self.assets);
        assets.push(asset);
        assets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    /// Remove an asset behind the triage core's back.
    pub fn remove_external(&self, id: &str) {
        lock(&self.assets).retain(|a| a.id != id);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_image_failing(&self, id: &str, failing: bool) {
        let mut failing_images = lock(&self.failing_images);
        if failing {
            failing_images.insert(id.to_string());
        } else {
            failing_images.remove(id);
        }
    }

    /// Hold every image request until `release_images` is called.
    pub fn hold_images(&self) {
        self.gate.send_replace(false);
    }

    pub fn release_images(&self) {
        self.gate.send_replace(true);
    }

    pub fn ids(&self) -> Vec<String> {
        lock(&self.assets).iter().map(|a| a.id.clone()).collect()
    }

    pub fn image_requests(&self) -> Vec<ImageRequest> {
        lock(&self.image_requests).clone()
    }

    pub fn image_calls(&self) -> usize {
        lock(&self.image_requests).len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetProvider for MemoryProvider {
    fn authorization(&self) -> Authorization {
        *lock(&self.authorization)
    }

    async fn request_authorization(&self) -> Authorization {
        let mut status = lock(&self.authorization);
        if *status == Authorization::NotDetermined {
            *status = Authorization::Authorized;
        }
        *status
    }

    async fn fetch_all(&self) -> Result<Vec<AssetRecord>, ProviderError> {
        ensure_authorized(self)?;
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.assets).clone())
    }

    async fn request_image(&self, request: ImageRequest) -> Result<DecodedImage, ProviderError> {
        ensure_authorized(self)?;
        lock(&self.image_requests).push(request.clone());

        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| ProviderError::Rejected("provider shut down".into()))?;

        if lock(&self.failing_images).contains(&request.id) {
            return Err(ProviderError::Decode {
                id: request.id,
                reason: "scripted failure".into(),
            });
        }

        let (asset_width, asset_height) = lock(&self.assets)
            .iter()
            .find(|a| a.id == request.id)
            .map(|a| (a.width, a.height))
            .ok_or_else(|| ProviderError::NotFound(request.id.clone()))?;

        let width = request.target_size.0.min(asset_width).max(1);
        let height = request.target_size.1.min(asset_height).max(1);
        let shade = match request.policy {
            DeliveryPolicy::FastNoNetwork => 0x40,
            DeliveryPolicy::HighQualityNetworkAllowed => 0xC0,
        };
        Ok(DecodedImage {
            width,
            height,
            pixels: vec![shade; (width * height * 4) as usize],
        })
    }

    async fn delete_batch(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        ensure_authorized(self)?;
        self.delete_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected("the user declined the deletion".into()));
        }

        let mut assets = lock(&self.assets);
        if let Some(missing) = ids.iter().find(|id| !assets.iter().any(|a| &a.id == *id)) {
            return Err(ProviderError::NotFound(missing.clone()));
        }
        assets.retain(|a| !ids.contains(&a.id));
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
