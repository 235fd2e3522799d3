//! Gzipped tar archives moved in and out of application containers.

use std::io::{self, Read, Write};
use std::path::{Component, Path};

use appbox_common::error::{AppboxError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

fn invalid_archive(e: &io::Error) -> AppboxError {
    AppboxError::invalid(format!("invalid archive: {e}"))
}

fn stays_inside(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Decompresses a gzipped tar archive and returns the plain tar stream.
///
/// Every entry must have a relative path that stays below the directory
/// the archive is unpacked into, and the archive must not be empty.
pub(crate) fn decompress(gzipped: &[u8]) -> Result<Vec<u8>> {
    let mut tarball = Vec::new();
    let _ = GzDecoder::new(gzipped)
        .read_to_end(&mut tarball)
        .map_err(|e| invalid_archive(&e))?;

    let mut count = 0usize;
    {
        let mut archive = tar::Archive::new(tarball.as_slice());
        for entry in archive.entries().map_err(|e| invalid_archive(&e))? {
            let entry = entry.map_err(|e| invalid_archive(&e))?;
            let path = entry.path().map_err(|e| invalid_archive(&e))?;
            if !stays_inside(&path) {
                return Err(AppboxError::invalid(format!(
                    "archive entry {} escapes the target directory",
                    path.display()
                )));
            }
            count += 1;
        }
    }
    if count == 0 {
        return Err(AppboxError::invalid("archive is empty"));
    }
    tracing::debug!(entries = count, bytes = tarball.len(), "archive checked");
    Ok(tarball)
}

/// Gzips a plain tar stream into `out`.
pub(crate) fn compress(tarball: &[u8], out: &mut dyn Write) -> io::Result<()> {
    let mut encoder = GzEncoder::new(out, Compression::default());
    encoder.write_all(tarball)?;
    let _ = encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tarball(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn gzipped(tarball: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        compress(tarball, &mut out).unwrap();
        out
    }

    #[test]
    fn accepts_relative_entries() {
        let plain = tarball(&[("index.php", b"<?php echo 1;"), ("./lib/util.php", b"")]);
        assert_eq!(decompress(&gzipped(&plain)).unwrap(), plain);
    }

    #[test]
    fn rejects_entries_leaving_the_target() {
        let mut header = tar::Header::new_old();
        let name = b"../escape";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(1);
        header.set_mode(0o644);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append(&header, &b"x"[..]).unwrap();
        let plain = builder.into_inner().unwrap();

        let err = decompress(&gzipped(&plain)).unwrap_err();
        assert!(err.to_string().contains("escapes the target directory"), "{err}");
    }

    #[test]
    fn rejects_garbage_and_empty_archives() {
        assert!(matches!(decompress(b"not gzip"), Err(AppboxError::InvalidInput { .. })));
        let empty = tarball(&[]);
        assert!(matches!(decompress(&gzipped(&empty)), Err(AppboxError::InvalidInput { .. })));
    }
}
