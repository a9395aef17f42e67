//! Local file fetcher: reads are confined to a base directory and capped.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::codes;
use crate::error::{GuardError, Result};
use crate::fetch::FetchOutcome;

pub struct FileFetcher {
    base_dir: PathBuf,
    max_bytes: u64,
}

impl FileFetcher {
    pub fn new(base_dir: impl Into<PathBuf>, max_bytes: u64) -> Result<Self> {
        let base_dir = base_dir.into().canonicalize()?;
        Ok(Self { base_dir, max_bytes })
    }

    /// Read a file relative to the base directory. Escapes — including
    /// through symlinks — are bad input, not policy denials; an oversized
    /// file is a policy denial.
    pub fn fetch(&self, relative: &str) -> Result<FetchOutcome> {
        let resolved = self.resolve(relative)?;

        let metadata = match fs::metadata(&resolved) {
            Ok(metadata) => metadata,
            Err(_) => return Err(GuardError::NotFound(format!("file {relative:?}"))),
        };
        if !metadata.is_file() {
            return Err(GuardError::NotFound(format!("file {relative:?}")));
        }
        if metadata.len() > self.max_bytes {
            tracing::debug!(path = relative, size = metadata.len(), "file over byte cap");
            return Ok(FetchOutcome::Denied {
                reason: codes::SIZE_EXCEEDED,
            });
        }

        match fs::read(&resolved) {
            Ok(bytes) if bytes.len() as u64 > self.max_bytes => Ok(FetchOutcome::Denied {
                reason: codes::SIZE_EXCEEDED,
            }),
            Ok(bytes) => Ok(FetchOutcome::Bytes(bytes)),
            Err(err) => {
                tracing::warn!(path = relative, error = %err, "file read failed");
                Ok(FetchOutcome::Denied {
                    reason: codes::FETCH_FAILED,
                })
            }
        }
    }

    /// Canonicalize and verify containment. Canonicalizing the joined
    /// path resolves `..` and symlinks in one step, so a link pointing
    /// outside the base is caught the same way a dotted path is.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        if Path::new(relative).is_absolute() {
            return Err(GuardError::PathEscape(relative.to_string()));
        }
        let joined = self.base_dir.join(relative);
        let resolved = joined
            .canonicalize()
            .map_err(|_| GuardError::NotFound(format!("file {relative:?}")))?;
        if resolved == self.base_dir || resolved.starts_with(&self.base_dir) {
            Ok(resolved)
        } else {
            Err(GuardError::PathEscape(relative.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn setup() -> (tempfile::TempDir, FileFetcher) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut f = File::create(dir.path().join("sub/readme.md")).unwrap();
        writeln!(f, "hello").unwrap();
        let fetcher = FileFetcher::new(dir.path(), 64).unwrap();
        (dir, fetcher)
    }

    #[test]
    fn reads_contained_file() {
        let (_dir, fetcher) = setup();
        match fetcher.fetch("sub/readme.md").unwrap() {
            FetchOutcome::Bytes(bytes) => assert_eq!(bytes, b"hello\n"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn dotted_escape_is_rejected() {
        let (_dir, fetcher) = setup();
        let err = fetcher.fetch("../outside.txt").unwrap_err();
        assert!(matches!(err, GuardError::PathEscape(_) | GuardError::NotFound(_)));
    }

    #[test]
    fn absolute_path_is_rejected() {
        let (_dir, fetcher) = setup();
        assert!(matches!(
            fetcher.fetch("/etc/passwd").unwrap_err(),
            GuardError::PathEscape(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let (dir, fetcher) = setup();
        let outside = dir.path().parent().unwrap().join("bw-outside.txt");
        fs::write(&outside, "outside").unwrap();
        std::os::unix::fs::symlink(&outside, dir.path().join("link.txt")).unwrap();

        let err = fetcher.fetch("link.txt").unwrap_err();
        assert!(matches!(err, GuardError::PathEscape(_)));
        let _ = fs::remove_file(outside);
    }

    #[test]
    fn oversized_file_is_denied_not_errored() {
        let (dir, fetcher) = setup();
        fs::write(dir.path().join("big.txt"), vec![b'x'; 1024]).unwrap();
        match fetcher.fetch("big.txt").unwrap() {
            FetchOutcome::Denied { reason } => assert_eq!(reason, "SIZE_EXCEEDED"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_bad_input() {
        let (_dir, fetcher) = setup();
        assert!(matches!(
            fetcher.fetch("nope.txt").unwrap_err(),
            GuardError::NotFound(_)
        ));
    }
}
