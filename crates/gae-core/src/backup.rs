use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::error::Result;

/// Zips `path` (an archive file or an extracted directory) next to itself
/// as `<name>_<timestamp>.zip` and returns the zip's path.
pub fn zip_backup(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("nothing to back up at {}", path.display()),
        )
        .into());
    }
    let parent = path.parent().unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("archive");
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let dest = parent.join(format!("{}_{}.zip", name, ts));

    let file = fs::File::create(&dest)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    if path.is_file() {
        zip.start_file(name, options).map_err(io::Error::from)?;
        zip.write_all(&fs::read(path)?)?;
    } else {
        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.map_err(io::Error::from)?;
            let Ok(rel) = entry.path().strip_prefix(path) else {
                continue;
            };
            if rel.as_os_str().is_empty() {
                continue;
            }
            let rel = rel.to_string_lossy().replace('\\', "/");
            if entry.file_type().is_dir() {
                zip.add_directory(rel, options).map_err(io::Error::from)?;
            } else {
                zip.start_file(rel, options).map_err(io::Error::from)?;
                zip.write_all(&fs::read(entry.path())?)?;
            }
        }
    }
    zip.finish().map_err(io::Error::from)?;
    info!(src = %path.display(), dest = %dest.display(), "wrote backup");
    Ok(dest)
}
