//! Assembler and content store.
//!
//! Everything here is blocking file I/O; async callers go through
//! `tokio::task::spawn_blocking`. An object becomes visible only when its fully
//! built staging directory is renamed to `<root>/<id>`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tempfile::TempPath;

use crate::classify::{ContentClassifier, DefaultClassifier, SNIFF_LEN};
use crate::config::STAGING_PREFIX;
use crate::id::derive_identifier;
use crate::session::FinalizeTicket;
use crate::spool::StagedFile;
use crate::{sanitize_filename, ContentObject, DirSnapshot, DropError, DropResult, ObjectId};

const COPY_BUF: usize = 64 * 1024;

/// Payload reader handed out by [`ContentStore::open_payload`]
pub type PayloadReader = Box<dyn Read + Send>;

/// On-disk home of published objects
pub struct ContentStore {
    root: PathBuf,
    id_length: usize,
    classifier: Arc<dyn ContentClassifier>,
    publish_lock: Mutex<()>,
}

impl ContentStore {
    /// Open (creating if needed) the content directory
    pub fn open<P: Into<PathBuf>>(root: P, id_length: usize) -> DropResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            id_length,
            classifier: Arc::new(DefaultClassifier),
            publish_lock: Mutex::new(()),
        })
    }

    /// Replace the content classifier
    pub fn with_classifier<C: ContentClassifier + 'static>(mut self, classifier: C) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Assemble a completed chunk session and publish it
    pub fn finalize(&self, ticket: FinalizeTicket) -> DropResult<ContentObject> {
        let filename = ticket.filename.clone();
        self.assemble(&filename, ticket.into_chunks())
    }

    /// Publish a single-shot upload as a one-chunk session
    pub fn publish_single_shot(&self, staged: StagedFile, filename: &str) -> DropResult<ContentObject> {
        self.assemble(filename, vec![staged.into_temp_path()])
    }

    fn assemble(&self, filename: &str, chunks: Vec<TempPath>) -> DropResult<ContentObject> {
        let name = sanitize_filename(filename)?;

        let (payload, size, head) = self.concatenate(chunks)?;
        let hash = hash_file(&payload).map_err(DropError::spool)?;
        let id = derive_identifier(&hash, self.id_length);

        if name == id.sidecar_name() {
            return Err(DropError::invalid(format!(
                "filename '{}' is reserved",
                name
            )));
        }

        let classification = self.classifier.classify(&name, &head);
        let object = ContentObject {
            id,
            name,
            hash,
            size,
            modified: Utc::now(),
            is_image: classification.is_image(),
            is_text: classification.is_text(),
            is_audio: classification.is_audio(),
            is_video: classification.is_video(),
            is_ascii: classification.is_ascii,
            content_type: classification.content_type,
        };

        self.publish(&object, payload)?;
        tracing::info!(
            id = %object.id,
            name = %object.name,
            size = object.size,
            content_type = %object.content_type,
            "published object"
        );
        Ok(object)
    }

    /// Gzip the chunks, in order, into a fresh staging file.
    ///
    /// Returns the staging file, the uncompressed byte count and the leading bytes
    /// used for classification.
    fn concatenate(&self, chunks: Vec<TempPath>) -> DropResult<(TempPath, u64, Vec<u8>)> {
        let (file, payload) = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.root)
            .map_err(DropError::spool)?
            .into_parts();

        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut size: u64 = 0;
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut buf = vec![0u8; COPY_BUF];

        for chunk in chunks {
            let mut reader = File::open(&chunk).map_err(DropError::spool)?;
            loop {
                let n = reader.read(&mut buf).map_err(DropError::spool)?;
                if n == 0 {
                    break;
                }
                if head.len() < SNIFF_LEN {
                    let take = n.min(SNIFF_LEN - head.len());
                    head.extend_from_slice(&buf[..take]);
                }
                encoder.write_all(&buf[..n]).map_err(DropError::spool)?;
                size += n as u64;
            }
            drop(reader);
            if let Err(e) = chunk.close() {
                tracing::warn!(error = %e, "failed to remove consumed chunk");
            }
        }

        let writer = encoder.finish().map_err(DropError::spool)?;
        let file = writer
            .into_inner()
            .map_err(|e| DropError::spool(e.into_error()))?;
        file.sync_all().map_err(DropError::spool)?;

        Ok((payload, size, head))
    }

    fn publish(&self, object: &ContentObject, payload: TempPath) -> DropResult<()> {
        let id = object.id.as_str();
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| DropError::rename(id, e))?;

        payload
            .persist(staging.path().join(&object.name))
            .map_err(|e| DropError::rename(id, e.error))?;
        write_sidecar(&staging.path().join(object.id.sidecar_name()), object)?;

        let target = self.root.join(id);
        {
            let _guard = self.publish_lock.lock();
            if target.exists() {
                tracing::info!(id, "replacing existing object with identical content");
                fs::remove_dir_all(&target).map_err(|e| DropError::rename(id, e))?;
            }
            fs::rename(staging.path(), &target).map_err(|e| DropError::rename(id, e))?;
        }

        // The staging path is gone now, so the TempDir drop has nothing left to do.
        drop(staging);
        Ok(())
    }

    /// Metadata of a published object
    pub fn load(&self, id: &ObjectId) -> DropResult<ContentObject> {
        let dir = self.object_dir(id)?;
        match read_sidecar(&dir.join(id.sidecar_name())) {
            Err(DropError::Io { source }) if source.kind() == io::ErrorKind::NotFound => {
                Err(DropError::not_found(id.as_str()))
            }
            other => other,
        }
    }

    /// Open an object's payload, either as stored (gzip) or decompressed
    pub fn open_payload(&self, id: &ObjectId, decompress: bool) -> DropResult<(ContentObject, PayloadReader)> {
        let object = self.load(id)?;
        let file = File::open(self.root.join(id.as_str()).join(&object.name)).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                DropError::not_found(id.as_str())
            } else {
                DropError::from(e)
            }
        })?;

        let reader: PayloadReader = if decompress {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(file)
        };
        Ok((object, reader))
    }

    /// Whether `<id>/<filename>` is a published payload
    pub fn exists(&self, id: &ObjectId, filename: &str) -> bool {
        match self.load(id) {
            Ok(object) => object.name == filename,
            Err(_) => false,
        }
    }

    /// Remove an object on user request
    pub fn delete(&self, id: &ObjectId) -> DropResult<()> {
        let dir = self.object_dir(id)?;
        self.load(id)?;
        fs::remove_dir_all(&dir)?;
        tracing::info!(id = %id, "deleted object on request");
        Ok(())
    }

    /// Remove an object directory, used by the retention policies
    pub(crate) fn remove(&self, id: &ObjectId) -> io::Result<()> {
        fs::remove_dir_all(self.root.join(id.as_str()))
    }

    /// Byte totals over fully published objects
    pub fn snapshot(&self) -> DropResult<DirSnapshot> {
        let mut snapshot = DirSnapshot::default();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(STAGING_PREFIX) || !entry.file_type()?.is_dir() {
                continue;
            }

            let id = ObjectId(name);
            if !entry.path().join(id.sidecar_name()).is_file() {
                continue;
            }

            let bytes = match dir_size(&entry.path()) {
                Ok(bytes) => bytes,
                // Removed by a concurrent sweep or replacement
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            snapshot.total_bytes += bytes;
            snapshot.object_count += 1;
            let larger = match &snapshot.largest {
                Some((_, largest)) => bytes > *largest,
                None => true,
            };
            if larger {
                snapshot.largest = Some((id, bytes));
            }
        }

        Ok(snapshot)
    }

    /// Directory of a published object; identifiers are plain alphanumerics
    fn object_dir(&self, id: &ObjectId) -> DropResult<PathBuf> {
        let valid = !id.as_str().is_empty()
            && id.as_str().chars().all(|c| c.is_ascii_alphanumeric());
        if !valid {
            return Err(DropError::not_found(id.as_str()));
        }
        Ok(self.root.join(id.as_str()))
    }

    #[cfg(test)]
    pub(crate) fn rewrite_metadata(&self, object: &ContentObject) -> DropResult<()> {
        let path = self.root.join(object.id.as_str()).join(object.id.sidecar_name());
        write_sidecar(&path, object)
    }
}

/// Read a gzip JSON sidecar
pub(crate) fn read_sidecar(path: &Path) -> DropResult<ContentObject> {
    let file = File::open(path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(serde_json::from_reader(decoder)?)
}

fn write_sidecar(path: &Path, object: &ContentObject) -> DropResult<()> {
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer_pretty(&mut encoder, object)?;
    let writer = encoder.finish()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}
