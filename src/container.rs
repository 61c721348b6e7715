//! Archive container.
//!
//! A flat-layout zip: one manifest member at `_manifest.json`, plus zero
//! or more payload members at the archive root named `<remote_id><ext>`.

use crate::error::{EngineError, EngineResult};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MANIFEST_MEMBER_NAME: &str = "_manifest.json";

/// Create an archive file at `archive_file` containing every regular file
/// directly under `dir` (no subdirectories — the flat layout has none to
/// begin with), compressed with the container's default (deflate).
pub fn create(dir: &Path, archive_file: &Path) -> EngineResult<()> {
    let file = File::create(archive_file)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let member_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| EngineError::InvalidArchivePath(path.display().to_string()))?;

        writer.start_file(member_name, options)?;
        let mut src = BufReader::new(File::open(&path)?);
        std::io::copy(&mut src, &mut writer)?;
    }

    writer.finish()?;
    Ok(())
}

/// Extract every member of `archive_file` into `dir` (created if absent).
/// Tolerates any Unicode filename the remote produces; rejects members
/// whose name would escape `dir` (zip-slip guard).
pub fn extract_all(archive_file: &Path, dir: &Path) -> EngineResult<()> {
    fs::create_dir_all(dir)?;
    let file = File::open(archive_file)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        let member_name = member.name().to_string();
        let out_path = safe_join(dir, &member_name)?;

        if member.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = BufWriter::new(File::create(&out_path)?);
        std::io::copy(&mut member, &mut out_file)?;
    }
    Ok(())
}

fn safe_join(base: &Path, member_name: &str) -> EngineResult<PathBuf> {
    let member_path = Path::new(member_name);
    if member_path.is_absolute()
        || member_path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(EngineError::InvalidArchivePath(member_name.to_string()));
    }
    Ok(base.join(member_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_create_then_extract_round_trip() {
        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("X1.txt"), b"hello").unwrap();
        let mut manifest = File::create(src.path().join(MANIFEST_MEMBER_NAME)).unwrap();
        manifest.write_all(b"{}").unwrap();

        let out_dir = tempfile::tempdir().unwrap();
        let archive_path = out_dir.path().join("backup.zip");
        create(src.path(), &archive_path).unwrap();

        let extract_dir = tempfile::tempdir().unwrap();
        extract_all(&archive_path, extract_dir.path()).unwrap();

        assert_eq!(
            fs::read_to_string(extract_dir.path().join("X1.txt")).unwrap(),
            "hello"
        );
        assert!(extract_dir.path().join(MANIFEST_MEMBER_NAME).exists());
    }

    #[test]
    fn test_rejects_path_traversal_member() {
        assert!(safe_join(Path::new("/tmp/x"), "../../etc/passwd").is_err());
        assert!(safe_join(Path::new("/tmp/x"), "/etc/passwd").is_err());
        assert!(safe_join(Path::new("/tmp/x"), "ok.txt").is_ok());
    }
}
