//! Output layout for packaged videos.
//!
//! Every package lives in its own `{output_root}/{output_name}/` directory:
//!
//! ```text
//! 240p.m3u8, 240p_000.ts, 240p_001.ts, ...
//! 1080p.m3u8, 1080p_000.ts, ...
//! master.m3u8
//! ```
//!
//! This module creates that directory, owns the naming scheme, and cleans up
//! files a previous run left behind.

use crate::ladder::ResolutionProfile;
use crate::manifest::parse_variant_uris;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// File name of the master manifest inside each package directory.
pub const MASTER_MANIFEST: &str = "master.m3u8";

/// Extension of media segments written by the encoder.
pub const SEGMENT_EXTENSION: &str = "ts";

/// Errors that can occur while preparing or tidying an output directory.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// The output name is not a single plain path component.
    #[error("Invalid output name '{0}': must be a single path component")]
    InvalidOutputName(String),

    /// Something other than a directory already occupies the path.
    #[error("Output path exists and is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// Creating, probing or cleaning the directory failed.
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LayoutError {
    fn io(path: &Path, source: io::Error) -> Self {
        LayoutError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Checks that `output_name` names a single directory below the output root.
pub fn validate_output_name(output_name: &str) -> Result<(), LayoutError> {
    let mut components = Path::new(output_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None)
            if !output_name.contains('/') && !output_name.contains('\\') =>
        {
            Ok(())
        }
        _ => Err(LayoutError::InvalidOutputName(output_name.to_string())),
    }
}

/// Idempotently creates `base_dir/output_name/` and returns its absolute path.
///
/// Fails if the path is occupied by a non-directory or cannot be written to.
/// Directory creation itself is all-or-nothing per `create_dir_all`.
pub fn prepare_output_directory(
    base_dir: &Path,
    output_name: &str,
) -> Result<PathBuf, LayoutError> {
    validate_output_name(output_name)?;

    for dir in [base_dir.to_path_buf(), base_dir.join(output_name)] {
        match fs::metadata(&dir) {
            Ok(meta) if !meta.is_dir() => return Err(LayoutError::NotADirectory(dir)),
            _ => {}
        }
    }

    let dir = base_dir.join(output_name);
    fs::create_dir_all(&dir).map_err(|e| LayoutError::io(&dir, e))?;
    let dir = fs::canonicalize(&dir).map_err(|e| LayoutError::io(&dir, e))?;

    // Permission bits lie for root and on some network mounts; try a real write
    let probe = dir.join(format!(".write-probe-{}", uuid::Uuid::new_v4()));
    fs::write(&probe, b"").map_err(|e| LayoutError::io(&dir, e))?;
    let _ = fs::remove_file(&probe);

    Ok(dir)
}

/// `{name}.m3u8`
pub fn playlist_file_name(profile: &ResolutionProfile) -> String {
    format!("{}.m3u8", profile.name)
}

/// `{name}_%03d.ts`, the encoder's segment filename template
pub fn segment_pattern(profile: &ResolutionProfile) -> String {
    format!("{}_%03d.{}", profile.name, SEGMENT_EXTENSION)
}

/// Manifest path relative to the public static-file root.
pub fn relative_manifest_path(output_name: &str) -> String {
    format!("{}/{}", output_name, MASTER_MANIFEST)
}

/// Profile name a media playlist or segment file belongs to, if any.
///
/// `720p.m3u8` -> `720p`, `720p_004.ts` -> `720p`; the master manifest and
/// unrelated files yield `None`.
fn owning_profile(file_name: &str) -> Option<&str> {
    if file_name == MASTER_MANIFEST {
        return None;
    }
    if let Some(stem) = file_name.strip_suffix(".m3u8") {
        return Some(stem);
    }
    let stem = file_name.strip_suffix(&format!(".{}", SEGMENT_EXTENSION))?;
    let (profile, index) = stem.rsplit_once('_')?;
    if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
        Some(profile)
    } else {
        None
    }
}

/// Removes playlists and segments a previous packaging run left behind.
///
/// Deletes files of profiles not in `kept`, plus segments of kept profiles that
/// their freshly written playlist no longer references. Returns the number of
/// files removed.
pub fn prune_stale_outputs(dir: &Path, kept: &[&ResolutionProfile]) -> Result<usize, LayoutError> {
    let kept_names: HashSet<&str> = kept.iter().map(|p| p.name.as_str()).collect();

    let mut referenced: HashSet<String> = HashSet::new();
    for profile in kept {
        let playlist = dir.join(playlist_file_name(profile));
        let text = fs::read_to_string(&playlist).map_err(|e| LayoutError::io(&playlist, e))?;
        referenced.extend(parse_variant_uris(&text));
    }

    let mut removed = 0;
    for entry in fs::read_dir(dir).map_err(|e| LayoutError::io(dir, e))? {
        let entry = entry.map_err(|e| LayoutError::io(dir, e))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(profile) = owning_profile(file_name) else {
            continue;
        };

        let stale = if kept_names.contains(profile) {
            file_name.ends_with(SEGMENT_EXTENSION) && !referenced.contains(file_name)
        } else {
            true
        };

        if stale {
            let path = entry.path();
            fs::remove_file(&path).map_err(|e| LayoutError::io(&path, e))?;
            tracing::debug!(path = %path.display(), "Removed stale package file");
            removed += 1;
        }
    }

    Ok(removed)
}

/// Removes `master.m3u8` if any playlist it references is missing.
///
/// Returns `true` if a manifest was removed.
pub fn invalidate_broken_master(dir: &Path) -> Result<bool, LayoutError> {
    let master = dir.join(MASTER_MANIFEST);
    let text = match fs::read_to_string(&master) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(LayoutError::io(&master, e)),
    };

    let broken = parse_variant_uris(&text)
        .iter()
        .any(|uri| !dir.join(uri).is_file());

    if broken {
        fs::remove_file(&master).map_err(|e| LayoutError::io(&master, e))?;
        tracing::warn!(path = %master.display(), "Removed master manifest referencing missing playlists");
    }

    Ok(broken)
}
