//! One-time installation of bundled model assets into a writable directory.

use std::path::Path;

use tracing::{debug, info};

use lumen_core::{Error, Result};

/// Copy the bundled model assets from `src` into `dest`.
///
/// Skipped when `dest` already exists. Files are staged in a sibling
/// directory and renamed into place, so an interrupted copy is retried on
/// the next start instead of leaving a half-populated `dest`.
/// Returns whether a copy happened.
pub fn install_assets(src: &Path, dest: &Path) -> Result<bool> {
    if dest.exists() {
        debug!("Model assets already installed at {}", dest.display());
        return Ok(false);
    }
    if !src.is_dir() {
        return Err(Error::NotFound(format!(
            "bundled model assets: {}",
            src.display()
        )));
    }

    let staging = dest.with_extension("partial");
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    copy_dir(src, &staging)?;
    std::fs::rename(&staging, dest)?;

    info!("Installed model assets {} -> {}", src.display(), dest.display());
    Ok(true)
}

fn copy_dir(src: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copies_once() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("assets");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("tokenizer.json"), "{}").unwrap();
        std::fs::write(src.join("nested/vocab.txt"), "a\nb").unwrap();
        let dest = dir.path().join("embedding-model");

        assert!(install_assets(&src, &dest).unwrap());
        assert_eq!(std::fs::read_to_string(dest.join("nested/vocab.txt")).unwrap(), "a\nb");

        // A modified source is not re-copied.
        std::fs::write(src.join("tokenizer.json"), "changed").unwrap();
        assert!(!install_assets(&src, &dest).unwrap());
        assert_eq!(std::fs::read_to_string(dest.join("tokenizer.json")).unwrap(), "{}");
    }

    #[test]
    fn test_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = install_assets(&dir.path().join("nope"), &dir.path().join("dest"));
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(!dir.path().join("dest").exists());
    }
}
