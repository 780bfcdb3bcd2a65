//! Zip packaging for test assets and report artifacts.
//!
//! These are blocking helpers; async callers run them on
//! `tokio::task::spawn_blocking`.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Error, Result};

fn options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Entry options for `path`, keeping its permission bits on Unix so shipped
/// executables stay executable.
fn file_options(path: &Path) -> Result<FileOptions> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode();
        Ok(options().unix_permissions(mode))
    }
    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(options())
    }
}

#[cfg(unix)]
fn restore_permissions(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_permissions(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Archive-internal name for `rel`, always `/`-separated.
fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn add_tree(
    writer: &mut ZipWriter<File>,
    root: &Path,
    prefix: &Path,
) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(io::Error::other(e)))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        let name = entry_name(&prefix.join(rel));
        if name.is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            writer.add_directory(name, options())?;
        } else {
            writer.start_file(name, file_options(entry.path())?)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, writer)?;
            count += 1;
        }
    }
    Ok(count)
}

/// Zip the contents of `source` (not the directory itself) into `archive`.
/// Returns the number of files written.
pub fn pack_directory(source: &Path, archive: &Path) -> Result<usize> {
    let mut writer = ZipWriter::new(File::create(archive)?);
    let count = add_tree(&mut writer, source, Path::new(""))?;
    writer.finish()?.flush()?;
    Ok(count)
}

/// Zip a list of files and directories into `archive`. Each path lands at the
/// archive root under its own file name; directories keep their structure.
pub fn pack_paths(paths: &[PathBuf], archive: &Path) -> Result<usize> {
    let mut writer = ZipWriter::new(File::create(archive)?);
    let mut count = 0;
    for path in paths {
        let name = path
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| Error::UnsafeArchivePath(path.display().to_string()))?;
        if path.is_dir() {
            count += add_tree(&mut writer, path, &name)?;
        } else {
            writer.start_file(entry_name(&name), file_options(path)?)?;
            let mut source = File::open(path)?;
            io::copy(&mut source, &mut writer)?;
            count += 1;
        }
    }
    writer.finish()?.flush()?;
    Ok(count)
}

/// Extract `archive` into `destination`, refusing entries that would land
/// outside of it. Returns the number of files extracted.
pub fn unpack(archive: &Path, destination: &Path) -> Result<usize> {
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    std::fs::create_dir_all(destination)?;
    let mut count = 0;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let rel = match file.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => return Err(Error::UnsafeArchivePath(file.name().to_string())),
        };
        let out = destination.join(rel);
        if file.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut target = File::create(&out)?;
        io::copy(&mut file, &mut target)?;
        restore_permissions(&out, file.unix_mode())?;
        count += 1;
    }
    Ok(count)
}
