// Destroys uploaded referral files: contents are overwritten with random bytes
// and flushed before the directory entry goes. Also clears uploads a crashed
// run left behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use rand::rngs::OsRng;
use rand::RngCore;

const NOISE_BLOCK: usize = 64 * 1024;

/// Overwrite, sync and remove `path`. A missing file counts as deleted.
///
/// A file that cannot be opened for writing is still removed; only the
/// removal itself can fail this call.
pub fn secure_delete_file(path: &Path) -> io::Result<()> {
    let len = match fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if len > 0 {
        let scrubbed = OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|mut file| overwrite_with_noise(&mut file, len));
        if let Err(e) = scrubbed {
            tracing::warn!(error = %e, "Upload removed without a full overwrite");
        }
    }

    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn overwrite_with_noise(file: &mut File, len: u64) -> io::Result<()> {
    let mut block = vec![0u8; NOISE_BLOCK.min(len as usize)];
    let mut left = len;
    while left > 0 {
        let n = left.min(block.len() as u64) as usize;
        OsRng.fill_bytes(&mut block[..n]);
        file.write_all(&block[..n])?;
        left -= n as u64;
    }
    file.sync_all()
}

/// Securely delete every regular file directly under `upload_dir`.
///
/// Returns how many were removed. An absent directory yields zero.
pub fn sweep_orphaned_uploads(upload_dir: &Path) -> usize {
    let Ok(entries) = fs::read_dir(upload_dir) else {
        return 0;
    };

    let removed = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| match secure_delete_file(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Orphaned upload could not be removed");
                false
            }
        })
        .count();

    if removed > 0 {
        tracing::info!(removed, "Swept uploads left by an earlier run");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_removes_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("referral.pdf");
        fs::write(&path, b"Patient John Smith DOB 1950-01-01").unwrap();

        secure_delete_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn overwrite_replaces_every_byte_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("letter.txt");
        let original = vec![b'A'; NOISE_BLOCK + 17];
        fs::write(&path, &original).unwrap();

        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        overwrite_with_noise(&mut file, original.len() as u64).unwrap();
        drop(file);

        let scrubbed = fs::read(&path).unwrap();
        assert_eq!(scrubbed.len(), original.len());
        assert_ne!(scrubbed, original);
    }

    #[test]
    fn missing_file_counts_as_deleted() {
        let dir = tempfile::tempdir().unwrap();
        assert!(secure_delete_file(&dir.path().join("missing.pdf")).is_ok());
    }

    #[test]
    fn empty_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pdf");
        fs::write(&path, b"").unwrap();

        secure_delete_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn sweep_takes_files_and_leaves_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.pdf"), b"letter one").unwrap();
        fs::write(dir.path().join("b.pdf"), b"letter two").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();

        assert_eq!(sweep_orphaned_uploads(dir.path()), 2);
        let left: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(left.len(), 1);
        assert!(left[0].path().is_dir());
    }

    #[test]
    fn sweep_of_absent_directory_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(sweep_orphaned_uploads(&dir.path().join("nope")), 0);
    }
}
