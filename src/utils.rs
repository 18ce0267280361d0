//! Utility functions for file operations, credentials and disk space

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Extensions of time-based media that are segmented instead of byte-chunked
pub const SEGMENTABLE_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "m4v", "flv", "wmv"];

/// Extensions that get a preview image before delivery to the messaging sink
pub const PREVIEW_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi"];

/// Strip whitespace, control characters and surrounding quotes from a secret
///
/// Tokens pasted into config files or environment variables often carry a trailing
/// `\r` or quotes, which the remote side rejects as an invalid credential.
///
/// # Examples
///
/// ```
/// use seedrelay::utils::sanitize_secret;
///
/// assert_eq!(sanitize_secret(" \"abc\r\n\" "), "abc");
/// ```
pub fn sanitize_secret(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t'))
        .collect();
    cleaned.trim().trim_matches('"').trim_matches('\'').to_string()
}

/// Lowercased extension of a path, if any
pub fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether a path has one of the given (lowercase) extensions
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    extension_lowercase(path).is_some_and(|ext| extensions.contains(&ext.as_str()))
}

/// Replace path separators and other characters that cannot appear in a file name
pub fn safe_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        "download".to_string()
    } else {
        cleaned
    }
}

/// Recursively list every regular file under `root`, sorted by path
///
/// A file root yields itself.
pub async fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(root).await?;
    if metadata.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("failed to read directory {}: {}", dir.display(), e),
            ))
        })?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Total size in bytes of every regular file under `root`
pub async fn dir_size(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    for file in collect_files(root).await? {
        total = total.saturating_add(tokio::fs::metadata(&file).await?.len());
    }
    Ok(total)
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux / macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid NUL-terminated string, stat is zero-initialized,
        // and the struct is only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail counts blocks available to unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is NUL-terminated and every out pointer refers to a live u64.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = path;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_secret_strips_hidden_characters_and_quotes() {
        assert_eq!(sanitize_secret("abc"), "abc");
        assert_eq!(sanitize_secret("  abc\r\n"), "abc");
        assert_eq!(sanitize_secret("'abc'"), "abc");
        assert_eq!(sanitize_secret("\"ab\tc\""), "abc");
    }

    #[test]
    fn has_extension_is_case_insensitive() {
        assert!(has_extension(Path::new("/x/Movie.MKV"), SEGMENTABLE_EXTENSIONS));
        assert!(!has_extension(Path::new("/x/notes.txt"), SEGMENTABLE_EXTENSIONS));
        assert!(!has_extension(Path::new("/x/noext"), SEGMENTABLE_EXTENSIONS));
    }

    #[test]
    fn preview_extensions_are_a_subset_of_segmentable_ones() {
        for ext in PREVIEW_EXTENSIONS {
            assert!(SEGMENTABLE_EXTENSIONS.contains(ext));
        }
    }

    #[test]
    fn safe_file_name_replaces_separators() {
        assert_eq!(safe_file_name("a/b\\c:d"), "a_b_c_d");
        assert_eq!(safe_file_name("  "), "download");
        assert_eq!(safe_file_name(".."), "download");
    }

    #[tokio::test]
    async fn collect_files_walks_nested_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("top.txt"), b"1").unwrap();
        std::fs::write(dir.path().join("a/mid.txt"), b"22").unwrap();
        std::fs::write(dir.path().join("a/b/deep.txt"), b"333").unwrap();

        let files = collect_files(dir.path()).await.unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(dir_size(dir.path()).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn collect_files_on_a_file_returns_it() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("one.bin");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(collect_files(&file).await.unwrap(), vec![file]);
    }

    #[test]
    fn get_available_space_valid_path() {
        let temp_dir = TempDir::new().unwrap();
        let available = get_available_space(temp_dir.path()).unwrap();
        assert!(available > 0, "Available space should be greater than 0");
    }

    #[test]
    fn get_available_space_nonexistent_path() {
        let result = get_available_space(Path::new("/nonexistent/path/that/should/not/exist"));
        assert!(result.is_err(), "Should return error for nonexistent path");
    }
}
