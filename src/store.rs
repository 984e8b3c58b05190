//! Content-addressable storage for uploaded asset bytes.
//!
//! Uploads land in `<root>/<matter>/<sha256><ext>`. The upload is streamed
//! through a SHA-256 hasher into a temp file in the destination directory,
//! then renamed into place, so a crash mid-write never leaves a partial
//! destination. Identical bytes for the same matter resolve to the same
//! stored file; the caller still records every upload event separately.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const COPY_BUF_BYTES: usize = 64 * 1024;

/// Where an upload's bytes ended up.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub content_hash: String,
    pub size_bytes: i64,
    pub storage_path: PathBuf,
    /// True when an identical file already existed and no copy was made.
    pub deduped: bool,
}

/// Stream `reader` into the matter's directory under its content hash.
pub fn store_blob(
    root: &Path,
    matter_id: &str,
    original_name: &str,
    mut reader: impl Read,
) -> Result<StoredBlob> {
    let matter_dir = root.join(sanitize_segment(matter_id));
    std::fs::create_dir_all(&matter_dir)
        .with_context(|| format!("Failed to create matter directory {}", matter_dir.display()))?;

    let mut temp = tempfile::NamedTempFile::new_in(&matter_dir)
        .context("Failed to create temporary upload file")?;

    let mut hasher = Sha256::new();
    let mut size_bytes: i64 = 0;
    let mut buf = [0u8; COPY_BUF_BYTES];
    loop {
        let n = reader.read(&mut buf).context("Failed to read upload")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        temp.write_all(&buf[..n])
            .context("Failed to write upload to temporary file")?;
        size_bytes += n as i64;
    }
    temp.flush().context("Failed to flush upload")?;

    let content_hash = format!("{:x}", hasher.finalize());
    let dest = matter_dir.join(format!("{}{}", content_hash, extension_of(original_name)));

    if dest.exists() {
        // Identical bytes already stored for this matter; the temp file is
        // removed when dropped.
        return Ok(StoredBlob {
            content_hash,
            size_bytes,
            storage_path: dest,
            deduped: true,
        });
    }

    if let Err(e) = temp.persist(&dest) {
        // The temp file inside the error still cleans itself up; make sure
        // no partially written destination survives either.
        let _ = std::fs::remove_file(&dest);
        return Err(e.error).context(format!("Failed to store upload at {}", dest.display()));
    }

    Ok(StoredBlob {
        content_hash,
        size_bytes,
        storage_path: dest,
        deduped: false,
    })
}

/// Remove an asset's stored bytes. Missing files are not an error: the
/// same physical file may have been shared by a deduplicated upload and
/// already removed.
pub fn delete_blob(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

/// Lowercased extension including the dot, or empty.
fn extension_of(original_name: &str) -> String {
    Path::new(original_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}

/// Keep matter ids from escaping the storage root.
fn sanitize_segment(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
