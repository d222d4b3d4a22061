//! # drop-store: content-addressed file drop storage
//!
//! `drop-store` accepts uploads (whole files or dropzone-style chunks), assembles them
//! into gzip-compressed objects named by a short identifier derived from their content,
//! publishes them atomically, and expires them again based on size and total disk usage.
//!
//! ## Key Features
//!
//! - **Bounded staging**: inbound streams are spooled to disk and cut off at the per-file ceiling
//! - **Chunked uploads**: chunks may arrive in any order and from concurrent requests;
//!   exactly one request assembles the session while the others wait for its result
//! - **Content addressing**: identical content always maps to the same identifier
//! - **Atomic publishing**: an object directory appears fully formed or not at all
//! - **Size-aware retention**: small objects live longer than large ones, and the largest
//!   objects are evicted first when the directory grows past its ceiling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use drop_store::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> DropResult<()> {
//! let service = DropService::new(StoreConfig::default().with_content_dir("data"))?;
//! service.spawn_retention();
//!
//! let body = futures::stream::once(async { Ok(bytes::Bytes::from_static(b"Hello, world!")) });
//! let object = service.put("hello.txt", Box::pin(body)).await?;
//!
//! println!("published {}", object.path());
//! # Ok(())
//! # }
//! ```
//!
//! ## On-disk layout
//!
//! ```text
//! <content_dir>/
//! ├── <id>/
//! │   ├── <filename>        gzip payload
//! │   └── <id>.json.gz      gzip JSON metadata
//! └── droptemp*             staging files and directories
//! ```

pub mod classify;
mod config;
mod error;
mod id;
pub mod retention;
pub mod service;
pub mod session;
mod spool;
pub mod store;
mod types;

pub use classify::{Classification, ContentClassifier, DefaultClassifier};
pub use config::{StoreConfig, STAGING_PREFIX};
pub use error::{DropError, DropResult};
pub use id::derive_identifier;
pub use retention::{ttl_for_size, RetentionManager, SweepReport};
pub use service::{DropService, OpenedObject};
pub use session::{ChunkOutcome, FinalizeTicket, SessionTable};
pub use spool::{StagedFile, TempSpool};
pub use store::ContentStore;
pub use types::{
    sanitize_filename, ByteStream, ChunkSubmission, ContentObject, DirSnapshot, ObjectId,
    SessionToken,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ByteStream, ChunkSubmission, ContentObject, DropError, DropResult, DropService, ObjectId,
        StoreConfig,
    };
}
