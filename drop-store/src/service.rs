use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::classify::ContentClassifier;
use crate::retention::RetentionManager;
use crate::session::{ChunkOutcome, FinalizeTicket, SessionTable};
use crate::spool::TempSpool;
use crate::store::ContentStore;
use crate::{
    sanitize_filename, ByteStream, ChunkSubmission, ContentObject, DropError, DropResult, ObjectId,
    StoreConfig,
};

const READ_CHUNK: usize = 64 * 1024;

/// A published object opened for reading
pub struct OpenedObject {
    pub object: ContentObject,
    /// Payload bytes, gzip or decompressed depending on how it was opened
    pub body: ByteStream,
}

/// The main drop facade embedded by the HTTP layer
#[derive(Clone)]
pub struct DropService {
    store: Arc<ContentStore>,
    sessions: SessionTable,
    spool: TempSpool,
    retention: Arc<RetentionManager>,
    config: StoreConfig,
}

impl DropService {
    /// Create a service over `config.content_dir`
    pub fn new(config: StoreConfig) -> DropResult<Self> {
        let store = ContentStore::open(&config.content_dir, config.id_length)?;
        Ok(Self::from_store(store, config))
    }

    /// Create with a custom content classifier
    pub fn with_classifier<C: ContentClassifier + 'static>(
        config: StoreConfig,
        classifier: C,
    ) -> DropResult<Self> {
        let store = ContentStore::open(&config.content_dir, config.id_length)?.with_classifier(classifier);
        Ok(Self::from_store(store, config))
    }

    fn from_store(store: ContentStore, config: StoreConfig) -> Self {
        let store = Arc::new(store);
        let sessions = SessionTable::new(config.max_bytes_per_file);
        let spool = TempSpool::new(store.root());
        let retention = Arc::new(RetentionManager::new(
            store.clone(),
            sessions.clone(),
            config.clone(),
        ));

        Self {
            store,
            sessions,
            spool,
            retention,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn retention(&self) -> &Arc<RetentionManager> {
        &self.retention
    }

    /// Store a whole file from one stream (single-shot upload)
    pub async fn put(&self, filename: &str, body: ByteStream) -> DropResult<ContentObject> {
        let filename = sanitize_filename(filename)?;
        let staged = self.spool.stage(body, self.config.max_bytes_per_file).await?;

        let store = self.store.clone();
        let object = blocking(move || store.publish_single_shot(staged, &filename)).await?;

        self.schedule_capacity_pass();
        Ok(object)
    }

    /// Accept one chunk of a multi-part upload.
    ///
    /// Resolves once the whole session is published, to the same object for every
    /// chunk of the session.
    pub async fn upload_chunk(
        &self,
        mut submission: ChunkSubmission,
        body: ByteStream,
    ) -> DropResult<ContentObject> {
        submission.filename = sanitize_filename(&submission.filename)?;
        self.sessions.admit(&submission)?;

        let staged = self.spool.stage(body, self.config.max_bytes_per_file).await?;

        match self.sessions.submit(&submission, staged)? {
            ChunkOutcome::Waiting { .. } => {
                self.sessions
                    .wait_for(&submission.token, self.config.max_wait)
                    .await
            }
            ChunkOutcome::ReadyToFinalize(ticket) => {
                // Detached so a dropped request still resolves the session's waiters
                let service = self.clone();
                tokio::spawn(async move { service.finalize_session(ticket).await })
                    .await
                    .map_err(|e| DropError::from(std::io::Error::other(e)))?
            }
        }
    }

    async fn finalize_session(&self, ticket: FinalizeTicket) -> DropResult<ContentObject> {
        let token = ticket.token.clone();
        let store = self.store.clone();
        let result = blocking(move || store.finalize(ticket)).await;

        match &result {
            Ok(object) => {
                self.sessions.resolve(&token, Ok(object.clone()));
                self.schedule_capacity_pass();
            }
            Err(e) => {
                tracing::error!(token = %token, error = %e, "failed to finalize upload");
                self.sessions.resolve(&token, Err(e.to_string()));
            }
        }
        result
    }

    /// Metadata of a published object
    pub async fn load(&self, id: &ObjectId) -> DropResult<ContentObject> {
        let store = self.store.clone();
        let id = id.clone();
        blocking(move || store.load(&id)).await
    }

    /// Open a published object, streaming either the stored gzip bytes or the original bytes
    pub async fn open(&self, id: &ObjectId, decompress: bool) -> DropResult<OpenedObject> {
        let store = self.store.clone();
        let id = id.clone();
        let (object, reader) = blocking(move || store.open_payload(&id, decompress)).await?;

        Ok(OpenedObject {
            object,
            body: reader_stream(reader),
        })
    }

    pub async fn exists(&self, id: &ObjectId, filename: &str) -> DropResult<bool> {
        let store = self.store.clone();
        let id = id.clone();
        let filename = filename.to_string();
        blocking(move || Ok(store.exists(&id, &filename))).await
    }

    /// Delete a published object on request
    pub async fn delete(&self, id: &ObjectId) -> DropResult<()> {
        let store = self.store.clone();
        let id = id.clone();
        blocking(move || store.delete(&id)).await
    }

    /// Start the periodic retention task
    pub fn spawn_retention(&self) -> JoinHandle<()> {
        tokio::spawn(self.retention.clone().start())
    }

    /// Run capacity enforcement in the background
    pub fn schedule_capacity_pass(&self) {
        let retention = self.retention.clone();
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || retention.enforce_capacity()).await {
                Ok(Ok(0)) => {}
                Ok(Ok(evicted)) => tracing::info!(evicted, "capacity pass finished"),
                Ok(Err(e)) => tracing::warn!(error = %e, "capacity pass failed"),
                Err(e) => tracing::warn!(error = %e, "capacity pass task failed"),
            }
        });
    }

    /// Run capacity enforcement and wait for it
    pub async fn enforce_capacity(&self) -> DropResult<usize> {
        let retention = self.retention.clone();
        blocking(move || retention.enforce_capacity()).await
    }
}

async fn blocking<T, F>(f: F) -> DropResult<T>
where
    F: FnOnce() -> DropResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DropError::from(std::io::Error::other(e)))?
}

/// Pump a blocking reader into a byte stream from the blocking pool
fn reader_stream(mut reader: Box<dyn Read + Send>) -> ByteStream {
    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(4);

    tokio::task::spawn_blocking(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });

    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}
