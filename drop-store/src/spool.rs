//! Temp spool: streams inbound bytes into uniquely named staging files.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::config::STAGING_PREFIX;
use crate::{ByteStream, DropError, DropResult};

/// A staged file on disk; dropping it removes the file
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    bytes: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes written while staging
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn into_temp_path(self) -> TempPath {
        self.path
    }
}

/// Writes byte streams to staging files under a fixed directory
#[derive(Debug, Clone)]
pub struct TempSpool {
    dir: PathBuf,
}

impl TempSpool {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stage a stream, failing once `max_bytes` is reached.
    ///
    /// A stream of exactly `max_bytes` is rejected as well: reaching the ceiling
    /// means the upload cannot be told apart from a truncated larger one.
    pub async fn stage(&self, mut body: ByteStream, max_bytes: u64) -> DropResult<StagedFile> {
        let named = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(DropError::spool)?;
        let (file, path) = named.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(DropError::spool)?;
            let remaining = max_bytes.saturating_sub(written);
            let take = chunk.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));

            file.write_all(&chunk[..take])
                .await
                .map_err(DropError::spool)?;
            written += take as u64;

            if written >= max_bytes {
                // `path` drops here and takes the partial file with it
                tracing::debug!(limit = max_bytes, "staged stream hit the byte ceiling");
                return Err(DropError::SizeLimitExceeded { limit: max_bytes });
            }
        }

        file.flush().await.map_err(DropError::spool)?;
        drop(file);

        tracing::debug!(bytes = written, path = %path.display(), "staged stream");
        Ok(StagedFile {
            path,
            bytes: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn stream_of(parts: Vec<&'static [u8]>) -> ByteStream {
        let items: Vec<Result<Bytes, std::io::Error>> =
            parts.into_iter().map(|p| Ok(Bytes::from_static(p))).collect();
        Box::pin(futures::stream::iter(items))
    }

    fn staging_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .count()
    }

    #[tokio::test]
    async fn stages_stream_under_limit() {
        let dir = TempDir::new().unwrap();
        let spool = TempSpool::new(dir.path());

        let staged = spool
            .stage(stream_of(vec![&b"hello "[..], &b"world"[..]]), 100)
            .await
            .unwrap();

        assert_eq!(staged.bytes(), 11);
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"hello world");
        assert!(staged
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(STAGING_PREFIX));

        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn rejects_and_removes_oversized_stream() {
        let dir = TempDir::new().unwrap();
        let spool = TempSpool::new(dir.path());

        let result = spool
            .stage(stream_of(vec![&[7u8; 60][..], &[7u8; 60][..], &[7u8; 30][..]]), 100)
            .await;

        assert!(matches!(
            result,
            Err(DropError::SizeLimitExceeded { limit: 100 })
        ));
        assert_eq!(staging_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn exact_ceiling_is_rejected() {
        let dir = TempDir::new().unwrap();
        let spool = TempSpool::new(dir.path());

        let result = spool.stage(stream_of(vec![&[1u8; 10][..]]), 10).await;
        assert!(matches!(result, Err(DropError::SizeLimitExceeded { .. })));
        assert_eq!(staging_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn stream_error_removes_staging_file() {
        let dir = TempDir::new().unwrap();
        let spool = TempSpool::new(dir.path());

        let items: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "gone")),
        ];
        let result = spool.stage(Box::pin(futures::stream::iter(items)), 100).await;

        assert!(matches!(result, Err(DropError::SpoolWriteFailed { .. })));
        assert_eq!(staging_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn concurrent_stages_never_collide() {
        let dir = TempDir::new().unwrap();
        let spool = TempSpool::new(dir.path());

        let mut handles = Vec::new();
        for i in 0..16u8 {
            let spool = spool.clone();
            handles.push(tokio::spawn(async move {
                let data = Bytes::from(vec![i; 32]);
                let body: ByteStream = Box::pin(futures::stream::iter(vec![Ok(data)]));
                spool.stage(body, 1024).await.unwrap()
            }));
        }

        let mut staged = Vec::new();
        for handle in handles {
            staged.push(handle.await.unwrap());
        }

        let mut paths: Vec<_> = staged.iter().map(|s| s.path().to_path_buf()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 16);
        for s in &staged {
            let contents = std::fs::read(s.path()).unwrap();
            assert_eq!(contents.len(), 32);
            assert!(contents.iter().all(|b| *b == contents[0]));
        }
    }
}
