use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use crate::{DropError, DropResult};

/// Stream of bytes for upload content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Short content-derived identifier of a published object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    /// Create from existing string
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the metadata sidecar inside the object's directory
    pub fn sidecar_name(&self) -> String {
        format!("{}.json.gz", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Client-chosen token grouping the chunks of one upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<String> for SessionToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

/// Metadata record of a published object, persisted as its gzip JSON sidecar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentObject {
    pub id: ObjectId,
    pub name: String,
    pub hash: String,
    /// Logical (uncompressed) size in bytes
    pub size: u64,
    pub content_type: String,
    pub modified: DateTime<Utc>,
    pub is_image: bool,
    pub is_text: bool,
    pub is_audio: bool,
    pub is_video: bool,
    pub is_ascii: bool,
}

impl ContentObject {
    /// `<id>/<name>`, the path the routing layer turns into a public link
    pub fn path(&self) -> String {
        format!("{}/{}", self.id, self.name)
    }

    /// Time this object is allowed to live for the given retention scale
    pub fn time_to_deletion(&self, minutes_per_gigabyte: f64) -> Duration {
        crate::retention::ttl_for_size(self.size, minutes_per_gigabyte)
    }

    /// Instant after which the age-based sweep deletes this object
    pub fn expires_at(&self, minutes_per_gigabyte: f64) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.time_to_deletion(minutes_per_gigabyte))
            .unwrap_or(chrono::Duration::MAX);
        self.modified
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// One chunk of a multi-part upload as described by the client
#[derive(Debug, Clone)]
pub struct ChunkSubmission {
    pub token: SessionToken,
    /// 1-based position of this chunk
    pub index: u32,
    pub total: u32,
    /// Declared size of every chunk, used for the up-front ceiling check
    pub chunk_size: u64,
    pub filename: String,
}

impl ChunkSubmission {
    pub fn new<T: Into<SessionToken>, N: Into<String>>(
        token: T,
        index: u32,
        total: u32,
        chunk_size: u64,
        filename: N,
    ) -> Self {
        Self {
            token: token.into(),
            index,
            total,
            chunk_size,
            filename: filename.into(),
        }
    }

    /// Upper bound on the assembled size implied by the declaration
    pub fn declared_size(&self) -> u64 {
        u64::from(self.total).saturating_mul(self.chunk_size)
    }
}

/// Disk usage of the content directory, recomputed on demand
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSnapshot {
    pub total_bytes: u64,
    pub object_count: usize,
    /// Largest published object and its size on disk
    pub largest: Option<(ObjectId, u64)>,
}

/// Reduce a client-supplied name to its final path component
pub fn sanitize_filename(raw: &str) -> DropResult<String> {
    let name = raw
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(DropError::invalid("No filename provided."));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_last_component() {
        assert_eq!(sanitize_filename("report.pdf").unwrap(), "report.pdf");
        assert_eq!(sanitize_filename("a/b/c.txt").unwrap(), "c.txt");
        assert_eq!(sanitize_filename("..\\..\\evil.exe").unwrap(), "evil.exe");
    }

    #[test]
    fn sanitize_rejects_empty_names() {
        assert!(sanitize_filename("").is_err());
        assert!(sanitize_filename("dir/").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("a/.").is_err());
    }

    #[test]
    fn declared_size_saturates() {
        let chunk = ChunkSubmission::new("t", 1, u32::MAX, u64::MAX, "f");
        assert_eq!(chunk.declared_size(), u64::MAX);

        let chunk = ChunkSubmission::new("t", 1, 3, 10, "f");
        assert_eq!(chunk.declared_size(), 30);
    }

    #[test]
    fn sidecar_is_named_after_id() {
        let id = ObjectId::from("ab12cd");
        assert_eq!(id.sidecar_name(), "ab12cd.json.gz");
    }
}
