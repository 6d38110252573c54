/// Folder-backed media library
///
/// Treats a directory tree of photos as the host media library:
/// - Asset ids are `/`-separated paths relative to the root
/// - A sibling `.mov`/`.mp4` with the same stem marks a Live photo; only the
///   still file is ever decoded, and the clip is deleted along with it
/// - Deletion stages every file into a hidden trash directory first and moves
///   them all back if any move fails, so a batch is all-or-nothing
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::imageops::FilterType;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::{
    ensure_authorized, AssetProvider, AssetRecord, Authorization, DecodedImage, DeliveryPolicy,
    ImageRequest,
};
use crate::error::ProviderError;

/// Still image formats we can decode
const PHOTO_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "webp", "gif", "bmp", "tif", "tiff"];

/// Motion clips that turn a still into a Live photo
const MOTION_EXTENSIONS: [&str; 2] = ["mov", "mp4"];

/// Staging area for deletions, skipped when scanning
const TRASH_DIR: &str = ".photo-swipe-trash";

#[derive(Debug, Clone)]
pub struct FolderProvider {
    root: PathBuf,
}

impl FolderProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FolderProvider { root: root.into() }
    }
}

#[async_trait]
impl AssetProvider for FolderProvider {
    fn authorization(&self) -> Authorization {
        if self.root.is_dir() && fs::read_dir(&self.root).is_ok() {
            Authorization::Authorized
        } else {
            Authorization::Denied
        }
    }

    async fn fetch_all(&self) -> Result<Vec<AssetRecord>, ProviderError> {
        ensure_authorized(self)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || scan_library(&root))
            .await
            .map_err(|e| ProviderError::Rejected(format!("Task join error: {}", e)))
    }

    async fn request_image(&self, request: ImageRequest) -> Result<DecodedImage, ProviderError> {
        ensure_authorized(self)?;
        let path = resolve(&self.root, &request.id)?;
        // Decoding is CPU-bound
        tokio::task::spawn_blocking(move || decode_still(&path, &request))
            .await
            .map_err(|e| ProviderError::Rejected(format!("Task join error: {}", e)))?
    }

    async fn delete_batch(&self, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
        ensure_authorized(self)?;
        let root = self.root.clone();
        let ids = ids.clone();
        tokio::task::spawn_blocking(move || delete_all_or_nothing(&root, &ids))
            .await
            .map_err(|e| ProviderError::Rejected(format!("Task join error: {}", e)))?
    }
}

/// Walk the library and collect metadata only; no pixels are read here.
fn scan_library(root: &Path) -> Vec<AssetRecord> {
    tracing::debug!("🔍 Scanning folder: {}", root.display());

    let files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    // Stems that have a motion clip next to them, lowercased
    let motion_stems: HashSet<String> = files
        .iter()
        .filter(|p| has_extension(p, &MOTION_EXTENSIONS))
        .map(|p| stem_key(p))
        .collect();

    let mut records = Vec::new();
    for path in files.iter().filter(|p| has_extension(p, &PHOTO_EXTENSIONS)) {
        let (width, height) = match image::image_dimensions(path) {
            Ok(dims) => dims,
            Err(e) => {
                tracing::warn!("⚠️  Skipping unreadable photo {}: {}", path.display(), e);
                continue;
            }
        };
        let Some(id) = relative_id(root, path) else {
            tracing::warn!("⚠️  Skipping photo with a non-UTF-8 path: {}", path.display());
            continue;
        };

        records.push(AssetRecord {
            id,
            created_at: creation_time(path),
            width,
            height,
            is_live: motion_stems.contains(&stem_key(path)),
            location: None,
        });
    }

    records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    tracing::info!("📷 Found {} photos in {}", records.len(), root.display());
    records
}

fn decode_still(path: &Path, request: &ImageRequest) -> Result<DecodedImage, ProviderError> {
    if !path.is_file() {
        return Err(ProviderError::NotFound(request.id.clone()));
    }

    let img = image::open(path).map_err(|e| ProviderError::Decode {
        id: request.id.clone(),
        reason: e.to_string(),
    })?;

    let (target_w, target_h) = request.target_size;
    let fits = img.width() <= target_w && img.height() <= target_h;
    let img = match request.policy {
        _ if fits => img,
        DeliveryPolicy::FastNoNetwork => img.thumbnail(target_w, target_h),
        DeliveryPolicy::HighQualityNetworkAllowed => {
            img.resize(target_w, target_h, FilterType::Lanczos3)
        }
    };

    let rgba = img.to_rgba8();
    Ok(DecodedImage {
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}

fn delete_all_or_nothing(root: &Path, ids: &BTreeSet<String>) -> Result<(), ProviderError> {
    let staging = root
        .join(TRASH_DIR)
        .join(format!("batch-{}", Utc::now().timestamp_millis()));
    fs::create_dir_all(&staging)?;

    let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
    let staged = stage_files(root, ids, &staging, &mut moved);

    if let Err(e) = staged {
        roll_back(&staging, &moved, &e)?;
        return Err(e);
    }

    // Every file has left the library; purging the staging copy can lag
    if let Err(e) = fs::remove_dir_all(&staging) {
        tracing::warn!("⚠️  Could not purge {}: {}", staging.display(), e);
    }
    tracing::info!("🗑️  Deleted {} photos", ids.len());
    Ok(())
}

/// Move staged files back where they came from. The staging directory is
/// only removed once every file is home again; otherwise it stays put and
/// the error names it.
fn roll_back(
    staging: &Path,
    moved: &[(PathBuf, PathBuf)],
    cause: &ProviderError,
) -> Result<(), ProviderError> {
    let mut stranded = 0;
    for (original, staged) in moved.iter().rev() {
        if let Err(e) = fs::rename(staged, original) {
            tracing::error!(
                "❌ Could not restore {} after failed delete: {}",
                original.display(),
                e
            );
            stranded += 1;
        }
    }

    if stranded > 0 {
        return Err(ProviderError::Stranded {
            count: stranded,
            staging: staging.to_path_buf(),
            reason: cause.to_string(),
        });
    }

    if let Err(e) = fs::remove_dir_all(staging) {
        tracing::warn!("⚠️  Could not remove empty staging dir {}: {}", staging.display(), e);
    }
    Ok(())
}

fn stage_files(
    root: &Path,
    ids: &BTreeSet<String>,
    staging: &Path,
    moved: &mut Vec<(PathBuf, PathBuf)>,
) -> Result<(), ProviderError> {
    for id in ids {
        let still = resolve(root, id)?;
        if !still.is_file() {
            return Err(ProviderError::NotFound(id.clone()));
        }

        let mut files = vec![still.clone()];
        files.extend(motion_companions(&still));

        for original in files {
            let name = original
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let target = staging.join(format!("{}-{}", moved.len(), name));
            fs::rename(&original, &target)?;
            moved.push((original, target));
        }
    }
    Ok(())
}

/// Motion clips sharing the still's stem in the same directory
fn motion_companions(still: &Path) -> Vec<PathBuf> {
    let Some(dir) = still.parent() else {
        return Vec::new();
    };
    let key = stem_key(still);
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file() && has_extension(p, &MOTION_EXTENSIONS))
                .filter(|p| stem_key(p) == key)
                .collect()
        })
        .unwrap_or_default()
}

/// Map an id back to a path, refusing anything that escapes the root.
fn resolve(root: &Path, id: &str) -> Result<PathBuf, ProviderError> {
    let relative = Path::new(id);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || id.is_empty() {
        return Err(ProviderError::NotFound(id.to_string()));
    }
    Ok(root.join(relative))
}

/// None when any component is not valid UTF-8, since such an id could not be
/// resolved back to the file.
fn relative_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<&str>>>()?;
    Some(parts.join("/"))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| extensions.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn stem_key(path: &Path) -> String {
    path.with_extension("").to_string_lossy().to_lowercase()
}

fn creation_time(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
