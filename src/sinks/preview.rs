//! Preview frames for video deliveries.

use std::path::{Path, PathBuf};

use tokio::process::Command;

/// Grab a frame five seconds in and write it to `<video>.thumb.jpg`
///
/// Returns `None` when ffmpeg is missing or fails; a preview is never required.
pub async fn generate_preview(ffmpeg: Option<&Path>, video: &Path) -> Option<PathBuf> {
    let Some(ffmpeg) = ffmpeg else {
        tracing::debug!(video = ?video, "ffmpeg not available, no preview");
        return None;
    };

    let mut thumb = video.as_os_str().to_owned();
    thumb.push(".thumb.jpg");
    let thumb = PathBuf::from(thumb);

    let output = Command::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(video)
        .args(["-ss", "00:00:05", "-vframes", "1", "-q:v", "2"])
        .arg(&thumb)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() && thumb.exists() => Some(thumb),
        Ok(output) => {
            tracing::warn!(video = ?video, code = ?output.status.code(), "Preview generation failed");
            None
        }
        Err(e) => {
            tracing::warn!(video = ?video, error = %e, "Failed to execute ffmpeg for preview");
            None
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_ffmpeg_means_no_preview() {
        let dir = tempfile::TempDir::new().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"x").unwrap();
        assert_eq!(generate_preview(None, &video).await, None);
    }

    #[tokio::test]
    async fn failing_tool_yields_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"x").unwrap();
        let missing = dir.path().join("no-such-ffmpeg");
        assert_eq!(generate_preview(Some(&missing), &video).await, None);
    }
}
