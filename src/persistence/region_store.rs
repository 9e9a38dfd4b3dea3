use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::simulation::composer::GlobalOverrides;
use crate::world::MapRegionKey;

const METADATA_FILE: &str = "world.bin";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot encode {what}: {message}")]
    Encode { what: &'static str, message: String },
    #[error("corrupt file {}: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },
}

/// World-level state saved next to the region blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMetadata {
    pub id: Uuid,
    pub world_seed: u64,
    pub total_days: f64,
    pub tick_count: u64,
    pub overrides: GlobalOverrides,
    /// Unix seconds of the last save.
    pub saved_at: u64,
}

/// One persisted region blob found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRegion {
    pub key: MapRegionKey,
    pub path: PathBuf,
    pub file_size: u64,
}

/// Directory of `region-{x}_{z}.bin` blobs plus `world.bin`.
///
/// The store does not interpret region blobs; framing and versioning belong
/// to the region itself.
#[derive(Debug, Clone)]
pub struct RegionStore {
    dir: PathBuf,
}

fn region_filename(key: MapRegionKey) -> String {
    format!("region-{}_{}.bin", key.x, key.z)
}

/// Expected format: `region-{x}_{z}.bin`
fn parse_region_filename(filename: &str) -> Option<MapRegionKey> {
    let stem = filename.strip_suffix(".bin")?;
    let rest = stem.strip_prefix("region-")?;
    let (x, z) = rest.split_once('_')?;
    Some(MapRegionKey::new(x.parse().ok()?, z.parse().ok()?))
}

pub fn unix_timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Write to a hidden temp file, then rename over the target so a partial
/// write never replaces good data.
fn write_atomic(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    let target = dir.join(filename);
    let tmp = dir.join(format!(".{}.tmp", filename));

    if let Err(e) = fs::write(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::Io(e));
    }
    if let Err(e) = fs::rename(&tmp, &target) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::Io(e));
    }
    Ok(target)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

impl RegionStore {
    /// Open (and create if needed) the save directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(RegionStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn region_path(&self, key: MapRegionKey) -> PathBuf {
        self.dir.join(region_filename(key))
    }

    pub fn save_region(&self, key: MapRegionKey, blob: &[u8]) -> Result<PathBuf, StoreError> {
        write_atomic(&self.dir, &region_filename(key), blob)
    }

    /// `Ok(None)` when the region was never saved.
    pub fn load_region(&self, key: MapRegionKey) -> Result<Option<Vec<u8>>, StoreError> {
        read_optional(&self.region_path(key))
    }

    pub fn remove_region(&self, key: MapRegionKey) -> Result<bool, StoreError> {
        match fs::remove_file(self.region_path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Persisted regions sorted by key.
    pub fn list_regions(&self) -> Result<Vec<StoredRegion>, StoreError> {
        let mut regions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Skip temp files
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = parse_region_filename(name) {
                let file_size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                regions.push(StoredRegion {
                    key,
                    path: path.clone(),
                    file_size,
                });
            }
        }
        regions.sort_by_key(|r| r.key);
        Ok(regions)
    }

    pub fn save_metadata(&self, metadata: &WorldMetadata) -> Result<PathBuf, StoreError> {
        let encoded = bincode::serialize(metadata).map_err(|e| StoreError::Encode {
            what: "world metadata",
            message: e.to_string(),
        })?;
        write_atomic(&self.dir, METADATA_FILE, &encoded)
    }

    /// `Ok(None)` for a fresh save directory.
    pub fn load_metadata(&self) -> Result<Option<WorldMetadata>, StoreError> {
        let path = self.dir.join(METADATA_FILE);
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        let metadata: WorldMetadata =
            bincode::deserialize(&bytes).map_err(|e| StoreError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;
        if !metadata.total_days.is_finite() || metadata.total_days < 0.0 {
            return Err(StoreError::Corrupt {
                path,
                message: format!("clock value {} is not a valid day count", metadata.total_days),
            });
        }
        Ok(Some(metadata))
    }
}
