//! Input artifact checks and per-job working files.
//!
//! Inputs are sniffed by magic number rather than decoded in full; the
//! engine is the authority on whether an image is usable, this gate only
//! keeps obviously broken uploads off the GPU.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("empty image payload")]
    Empty,
    #[error("unsupported image format (expected PNG, JPEG or WEBP)")]
    UnsupportedFormat,
    #[error("failed to write image: {0}")]
    Io(#[from] std::io::Error),
}

/// Formats the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    /// Identify the payload by its leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            return Ok(Self::Png);
        }
        if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Ok(Self::Jpeg);
        }
        // RIFF....WEBP
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            return Ok(Self::Webp);
        }
        Err(ImageError::UnsupportedFormat)
    }

    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
        }
    }
}

/// Directory holding every temporary file of one job. Exclusively owned by
/// that job's orchestrator run and removed at the end of every code path.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
}

impl JobWorkspace {
    /// Create a unique workspace under `base` for `job_id`.
    pub async fn create(base: &Path, job_id: &str) -> Result<Self, ImageError> {
        // job_id is caller-supplied; a random suffix keeps hostile or
        // duplicate ids from colliding on disk.
        let root = base.join(format!("{}-{}", sanitize(job_id), Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Validate and persist one uploaded artifact, returning its path.
    pub async fn save_input(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ImageError> {
        let format = ImageFormat::sniff(bytes)?;
        let path = self.root.join(format!("{name}.{}", format.extension()));
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), "saved input artifact");
        Ok(path)
    }

    /// Reserve a path for the engine's output image.
    #[must_use]
    pub fn output_path(&self) -> PathBuf {
        self.root.join("output.png")
    }

    /// Remove the workspace. Best-effort: failure to delete is logged and
    /// swallowed so cleanup can never abort a release.
    pub async fn cleanup(self) {
        if let Err(err) = tokio::fs::remove_dir_all(&self.root).await {
            warn!(path = %self.root.display(), error = %err, "failed to clean up job workspace");
        } else {
            debug!(path = %self.root.display(), "cleaned up job workspace");
        }
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(64)
        .collect()
}
