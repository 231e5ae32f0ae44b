//! Master manifest generation
//!
//! Renders the HLS master playlist for the profiles that encoded successfully
//! and writes it so that readers never observe a partial file.

use crate::ladder::ResolutionProfile;
use crate::layout::{playlist_file_name, MASTER_MANIFEST};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed header: format marker plus protocol version
const MANIFEST_HEADER: &str = "#EXTM3U\n#EXT-X-VERSION:3\n\n";

/// Error type for master manifest writes
#[derive(Debug, Error)]
pub enum ManifestError {
    /// No variant streams to reference
    #[error("Refusing to write a master manifest with no variant streams")]
    Empty,

    /// Writing, syncing or renaming the manifest failed
    #[error("Failed to write master manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Render the master playlist text
///
/// One `#EXT-X-STREAM-INF` / URI pair per profile, in the order given.
pub fn render_master_manifest<'a, I>(profiles: I) -> String
where
    I: IntoIterator<Item = &'a ResolutionProfile>,
{
    let mut text = String::from(MANIFEST_HEADER);
    for profile in profiles {
        text.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n",
            profile.bandwidth_bps(),
            profile.resolution()
        ));
        text.push_str(&playlist_file_name(profile));
        text.push('\n');
    }
    text
}

/// Write `master.m3u8` into `output_dir` for the given profiles
///
/// The text goes to a uniquely named sibling file first, is synced, then
/// renamed over the final name. Returns the absolute path written.
pub fn write_master_manifest(
    output_dir: &Path,
    succeeded: &[&ResolutionProfile],
) -> Result<PathBuf, ManifestError> {
    if succeeded.is_empty() {
        return Err(ManifestError::Empty);
    }

    let final_path = output_dir.join(MASTER_MANIFEST);
    let temp_path = output_dir.join(format!(".{}.{}.tmp", MASTER_MANIFEST, uuid::Uuid::new_v4()));
    let text = render_master_manifest(succeeded.iter().copied());

    let result = write_synced(&temp_path, text.as_bytes())
        .and_then(|()| fs::rename(&temp_path, &final_path));

    if let Err(source) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(ManifestError::Io {
            path: final_path,
            source,
        });
    }

    tracing::info!(
        path = %final_path.display(),
        variants = succeeded.len(),
        "Master manifest written"
    );

    Ok(final_path)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// URIs referenced by a playlist: every non-blank line that is not a tag
pub fn parse_variant_uris(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}
