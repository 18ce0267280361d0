//! Zipping picture folders into a single deliverable archive.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::Result;

/// Whether a folder name contains one of the keywords (case-insensitive)
pub fn should_zip(name: &str, keywords: &[String]) -> bool {
    let name = name.to_lowercase();
    keywords.iter().any(|k| name.contains(&k.to_lowercase()))
}

/// Zip `folder` into `<folder>.zip` next to it, returning the archive path
///
/// Entries are stored relative to the folder, using `/` separators.
pub fn zip_folder(folder: &Path) -> Result<PathBuf> {
    let mut zip_name = folder.as_os_str().to_owned();
    zip_name.push(".zip");
    let zip_path = PathBuf::from(zip_name);

    let mut writer = zip::ZipWriter::new(BufWriter::new(File::create(&zip_path)?));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut files = Vec::new();
    let mut pending = vec![folder.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();

    for file in &files {
        let relative = file.strip_prefix(folder).unwrap_or(file);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        writer.start_file(name, options)?;
        let mut source = File::open(file)?;
        std::io::copy(&mut source, &mut writer)?;
    }

    let mut inner = writer.finish()?;
    inner.flush()?;

    tracing::info!(folder = ?folder, files = files.len(), archive = ?zip_path, "Zipped folder");
    Ok(zip_path)
}
