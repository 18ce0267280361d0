//! Splitting oversized files into deliverable parts.
//!
//! Binary content is cut into fixed-size byte chunks named `<name>.part001`,
//! `<name>.part002`, ... Time-based media is segmented by ffmpeg with stream copy into
//! `<stem>_part000<ext>`, ... and falls back to byte chunking when the duration cannot
//! be probed, the tool fails or times out, or a segment comes out over the part size.
//!
//! Parts never exceed `min(chunk_size, limit - safety_margin)`, where `limit` is the
//! sink's single-object limit.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::ToolsConfig;
use crate::error::TransferError;
use crate::utils::{SEGMENTABLE_EXTENSIONS, has_extension};
use crate::{Error, Result};

/// ffprobe gets this long to report a duration
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A stream-copy segmenting run is abandoned after this long
const SEGMENT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Sizes of the parts a `size`-byte file is cut into with `chunk`-byte parts
///
/// # Examples
///
/// ```
/// use seedrelay::packager::plan_parts;
///
/// let gb = 1_000_000_000u64;
/// assert_eq!(plan_parts(45 * gb / 10, 19 * gb / 10), vec![19 * gb / 10, 19 * gb / 10, 7 * gb / 10]);
/// ```
pub fn plan_parts(size: u64, chunk: u64) -> Vec<u64> {
    if chunk == 0 || size == 0 {
        return Vec::new();
    }
    let full = size / chunk;
    let mut parts = vec![chunk; full as usize];
    if size % chunk > 0 {
        parts.push(size % chunk);
    }
    parts
}

/// Locations of ffmpeg and ffprobe, when available
#[derive(Clone, Debug, Default)]
pub struct MediaTools {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
}

impl MediaTools {
    /// Explicit paths from config, else PATH lookup when allowed
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            ffmpeg: tools.resolve_binary(tools.ffmpeg_path.as_ref(), "ffmpeg"),
            ffprobe: tools.resolve_binary(tools.ffprobe_path.as_ref(), "ffprobe"),
        }
    }

    /// No media tools: media is always byte-chunked and never previewed
    pub fn none() -> Self {
        Self::default()
    }

    /// ffmpeg binary, if known
    pub fn ffmpeg(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    /// Media duration in seconds, `None` when it cannot be determined
    pub async fn probe_duration(&self, path: &Path) -> Option<f64> {
        let ffprobe = self.ffprobe.as_ref()?;
        let run = Command::new(ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(path)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(PROBE_TIMEOUT, run).await {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                tracing::debug!(path = ?path, code = ?output.status.code(), "ffprobe failed");
                return None;
            }
            Ok(Err(e)) => {
                tracing::debug!(path = ?path, error = %e, "failed to run ffprobe");
                return None;
            }
            Err(_) => {
                tracing::debug!(path = ?path, "ffprobe timed out");
                return None;
            }
        };

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d > 0.0)
    }
}

/// Cuts files into parts no larger than the chunk size or the sink limit
#[derive(Clone, Debug)]
pub struct Splitter {
    chunk_size: u64,
    safety_margin: u64,
    tools: MediaTools,
}

impl Splitter {
    /// Create a splitter with no safety margin
    pub fn new(chunk_size: u64, tools: MediaTools) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            safety_margin: 0,
            tools,
        }
    }

    /// Keep parts this many bytes below the sink limit
    pub fn with_safety_margin(mut self, safety_margin: u64) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    /// Largest part written for a sink with single-object `limit`
    ///
    /// A margin that would leave nothing of the limit is ignored.
    pub fn part_size(&self, limit: Option<u64>) -> u64 {
        let Some(limit) = limit else {
            return self.chunk_size;
        };
        let ceiling = match limit.saturating_sub(self.safety_margin) {
            0 => limit,
            reduced => reduced,
        };
        self.chunk_size.min(ceiling).max(1)
    }

    /// Media tools used for segmenting and previews
    pub fn tools(&self) -> &MediaTools {
        &self.tools
    }

    /// Split `path` into ordered parts written next to it
    ///
    /// `limit` is the sink's single-object limit (`None` = unlimited).
    pub async fn split(&self, path: &Path, limit: Option<u64>) -> Result<Vec<PathBuf>> {
        let part_size = self.part_size(limit);
        if has_extension(path, SEGMENTABLE_EXTENSIONS) {
            self.split_media(path, part_size).await
        } else {
            self.split_binary(path, part_size).await
        }
    }

    /// Fixed-size byte chunks of `part_size` bytes
    pub async fn split_binary(&self, path: &Path, part_size: u64) -> Result<Vec<PathBuf>> {
        tracing::info!(path = ?path, part_size, "Splitting file into byte chunks");
        let path = path.to_path_buf();
        let chunk = part_size.max(1);
        tokio::task::spawn_blocking(move || split_binary_blocking(&path, chunk))
            .await
            .map_err(|e| Error::Other(format!("split task panicked: {}", e)))?
    }

    async fn split_media(&self, path: &Path, part_size: u64) -> Result<Vec<PathBuf>> {
        match self.segment(path, part_size).await {
            Ok(parts) if !parts.is_empty() => return Ok(parts),
            Ok(_) => tracing::warn!(path = ?path, "ffmpeg produced no parts, falling back to byte chunks"),
            Err(e) => tracing::warn!(path = ?path, error = %e, "Media split failed, falling back to byte chunks"),
        }
        self.split_binary(path, part_size).await
    }

    async fn segment(&self, path: &Path, part_size: u64) -> Result<Vec<PathBuf>> {
        let ffmpeg = self
            .tools
            .ffmpeg
            .as_ref()
            .ok_or_else(|| Error::NotSupported("ffmpeg not available".to_string()))?;
        let duration = self
            .tools
            .probe_duration(path)
            .await
            .ok_or_else(|| Error::ExternalTool("media duration unavailable".to_string()))?;

        let size = tokio::fs::metadata(path).await?.len();
        let count = size.div_ceil(part_size.max(1)).max(1);
        let segment_time = duration / count as f64;

        let (dir, stem, ext) = media_name_parts(path);
        let pattern = dir.join(format!("{}_part%03d{}", stem, ext));

        // leftovers from an interrupted run would be picked up as parts
        let stale = clear_media_parts(&dir, &stem, &ext).await?;
        if stale > 0 {
            tracing::debug!(path = ?path, stale, "Removed stale segments");
        }

        tracing::info!(path = ?path, parts = count, segment_time, "Segmenting media");
        let run = Command::new(ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(path)
            .args(["-c", "copy", "-map", "0", "-f", "segment"])
            .arg("-segment_time")
            .arg(format!("{:.3}", segment_time))
            .args(["-reset_timestamps", "1"])
            .arg(&pattern)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(SEGMENT_TIMEOUT, run).await {
            Ok(output) => {
                output.map_err(|e| Error::ExternalTool(format!("Failed to execute ffmpeg: {}", e)))?
            }
            Err(_) => {
                clear_media_parts(&dir, &stem, &ext).await?;
                return Err(Error::ExternalTool(format!(
                    "ffmpeg timed out after {}s",
                    SEGMENT_TIMEOUT.as_secs()
                )));
            }
        };

        if !output.status.success() {
            clear_media_parts(&dir, &stem, &ext).await?;
            return Err(Error::ExternalTool(format!(
                "ffmpeg exited with {:?}: {}",
                output.status.code(),
                crate::error::truncate_diagnostics(&String::from_utf8_lossy(&output.stderr))
            )));
        }

        // segments cut at keyframes can overshoot the target size
        let parts = media_parts(&dir, &stem, &ext);
        for part in &parts {
            let len = tokio::fs::metadata(part).await?.len();
            if len > part_size {
                clear_media_parts(&dir, &stem, &ext).await?;
                return Err(Error::ExternalTool(format!(
                    "segment {} is {} bytes, over the {} byte part size",
                    part.display(),
                    len,
                    part_size
                )));
            }
        }
        Ok(parts)
    }
}

fn media_name_parts(path: &Path) -> (PathBuf, String, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (dir, stem, ext)
}

/// Segments ffmpeg wrote, in order (numbering is contiguous from 000)
fn media_parts(dir: &Path, stem: &str, ext: &str) -> Vec<PathBuf> {
    (0..)
        .map(|i| dir.join(format!("{}_part{:03}{}", stem, i, ext)))
        .take_while(|p| p.exists())
        .collect()
}

/// Whether `file_name` is `<stem>_partNNN<ext>` with at least three digits
fn is_media_part(file_name: &str, stem: &str, ext: &str) -> bool {
    file_name
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix("_part"))
        .and_then(|rest| rest.strip_suffix(ext))
        .is_some_and(|digits| digits.len() >= 3 && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Delete every `<stem>_partNNN<ext>` in `dir`, returning how many were removed
async fn clear_media_parts(dir: &Path, stem: &str, ext: &str) -> Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if is_media_part(&name.to_string_lossy(), stem, ext) {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn split_binary_blocking(path: &Path, chunk: u64) -> Result<Vec<PathBuf>> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::Packaging {
            path: path.to_path_buf(),
            reason: "path has no file name".to_string(),
        })?;
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut source = std::io::BufReader::new(std::fs::File::open(path)?);
    let mut parts = Vec::new();

    for index in 1.. {
        let part_path = dir.join(format!("{}.part{:03}", name, index));
        let mut out = std::io::BufWriter::new(std::fs::File::create(&part_path)?);
        let written = std::io::copy(&mut (&mut source).take(chunk), &mut out)?;
        out.flush()?;
        drop(out);

        if written == 0 {
            std::fs::remove_file(&part_path)?;
            break;
        }
        tracing::debug!(part = ?part_path, bytes = written, "Created part");
        parts.push(part_path);
    }

    Ok(parts)
}
