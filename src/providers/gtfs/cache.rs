//! On-disk cache of parsed schedule snapshots, keyed by the SHA-256
//! fingerprint of the raw archive bytes. An unchanged archive skips the
//! whole parse on restart.
//!
//! The file format is a gzip stream of one version byte followed by the
//! bincode-encoded snapshot. It is not a compatibility surface; bump
//! the version byte whenever the snapshot shape changes and old files
//! become cache misses.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use super::{GtfsError, ScheduleSnapshot};

const SNAPSHOT_FORMAT_VERSION: u8 = 1;

/// Environment override for the parsed-snapshot cache directory.
pub const CACHE_DIR_ENV: &str = "SCHEDULE_CACHE_DIR";

/// Resolve the cache directory: env override, else a directory under
/// the OS temp dir.
pub fn default_cache_dir() -> PathBuf {
    match std::env::var(CACHE_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir().join("fleetmap-schedule-cache"),
    }
}

/// SHA-256 hex fingerprint of raw archive bytes.
pub fn fingerprint(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

fn snapshot_path(cache_dir: &Path, fingerprint: &str) -> PathBuf {
    cache_dir.join(format!("parsed_{fingerprint}.bin.gz"))
}

/// Load a previously parsed snapshot. Any decode problem, version
/// mismatch, or obviously incomplete snapshot is an error; callers
/// treat it as a cache miss.
pub fn load(cache_dir: &Path, fingerprint: &str) -> Result<(ScheduleSnapshot, PathBuf), GtfsError> {
    let path = snapshot_path(cache_dir, fingerprint);
    let file = fs::File::open(&path)?;

    let mut decoder = GzDecoder::new(file);
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;

    let Some((&version, payload)) = bytes.split_first() else {
        return Err(GtfsError::CacheError("cached snapshot is empty".into()));
    };
    if version != SNAPSHOT_FORMAT_VERSION {
        return Err(GtfsError::CacheError(format!(
            "unsupported snapshot format version {version}"
        )));
    }

    let (snapshot, _) =
        bincode::serde::decode_from_slice::<ScheduleSnapshot, _>(payload, bincode::config::standard())
            .map_err(|e| GtfsError::CacheError(e.to_string()))?;

    if snapshot.routes.is_empty() || snapshot.stops.is_empty() {
        return Err(GtfsError::CacheError("cached snapshot is incomplete".into()));
    }

    Ok((snapshot, path))
}

/// Persist a parsed snapshot. Writes to a temporary sibling first and
/// renames into place so readers never see a torn file.
pub fn save(
    cache_dir: &Path,
    fingerprint: &str,
    snapshot: &ScheduleSnapshot,
) -> Result<PathBuf, GtfsError> {
    fs::create_dir_all(cache_dir)?;

    let path = snapshot_path(cache_dir, fingerprint);
    let tmp_path = path.with_extension("gz.tmp");

    let result = write_snapshot(&tmp_path, snapshot);
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&tmp_path, &path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(path)
}

fn write_snapshot(tmp_path: &Path, snapshot: &ScheduleSnapshot) -> Result<(), GtfsError> {
    let payload = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
        .map_err(|e| GtfsError::CacheError(e.to_string()))?;

    let file = fs::File::create(tmp_path)?;
    let mut encoder = GzEncoder::new(file, Compression::fast());
    encoder.write_all(&[SNAPSHOT_FORMAT_VERSION])?;
    encoder.write_all(&payload)?;

    let file = encoder.finish()?;
    file.sync_all()?;
    Ok(())
}
