//! Chunk coordinator: per-token bookkeeping of in-flight multi-part uploads.
//!
//! Every read-increment-decide step runs under one lock, so exactly one submission
//! per session observes the final chunk. The winning caller receives a
//! [`FinalizeTicket`] owning the staged chunk files and performs the assembly
//! outside the lock. Other callers wait on a per-token completion channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempPath;
use tokio::sync::watch;

use crate::spool::StagedFile;
use crate::{ChunkSubmission, ContentObject, DropError, DropResult, SessionToken};

/// Outcome relayed to every request of a session once it is finalized
pub type Finished = Result<ContentObject, String>;

/// Result of submitting one chunk
#[derive(Debug)]
pub enum ChunkOutcome {
    /// More chunks are expected
    Waiting { received: u32, total: u32 },
    /// This submission completed the session; the caller must finalize it
    ReadyToFinalize(FinalizeTicket),
}

/// Ownership of a completed session's staged chunks, ordered by index
#[derive(Debug)]
pub struct FinalizeTicket {
    pub token: SessionToken,
    pub filename: String,
    chunks: Vec<TempPath>,
}

impl FinalizeTicket {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub(crate) fn into_chunks(self) -> Vec<TempPath> {
        self.chunks
    }
}

struct SessionEntry {
    total: u32,
    filename: String,
    received_bytes: u64,
    chunks: BTreeMap<u32, TempPath>,
    touched: Instant,
}

struct Completion {
    tx: watch::Sender<Option<Finished>>,
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct TableState {
    sessions: HashMap<SessionToken, SessionEntry>,
    completions: HashMap<SessionToken, Completion>,
}

/// Table of in-flight upload sessions
#[derive(Clone)]
pub struct SessionTable {
    state: Arc<Mutex<TableState>>,
    max_bytes_per_file: u64,
}

impl SessionTable {
    pub fn new(max_bytes_per_file: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(TableState::default())),
            max_bytes_per_file,
        }
    }

    /// Check a chunk declaration before any of its data is staged.
    ///
    /// The declared-size ceiling is only evaluated for the first chunk of a session.
    pub fn admit(&self, chunk: &ChunkSubmission) -> DropResult<()> {
        validate_position(chunk)?;

        let state = self.state.lock();
        match state.sessions.get(&chunk.token) {
            Some(entry) => check_consistent(entry, chunk),
            None => self.check_new_session(&state, chunk),
        }
    }

    /// Record a staged chunk; the caller finalizing the session gets the ticket.
    pub fn submit(&self, chunk: &ChunkSubmission, staged: StagedFile) -> DropResult<ChunkOutcome> {
        validate_position(chunk)?;

        let mut overflow: Option<Vec<TempPath>> = None;
        let outcome = {
            let mut state = self.state.lock();

            if !state.sessions.contains_key(&chunk.token) {
                self.check_new_session(&state, chunk)?;
                let (tx, _) = watch::channel(None);
                state.completions.insert(
                    chunk.token.clone(),
                    Completion {
                        tx,
                        finished_at: None,
                    },
                );
                state.sessions.insert(
                    chunk.token.clone(),
                    SessionEntry {
                        total: chunk.total,
                        filename: chunk.filename.clone(),
                        received_bytes: 0,
                        chunks: BTreeMap::new(),
                        touched: Instant::now(),
                    },
                );
                tracing::debug!(token = %chunk.token, total = chunk.total, "opened upload session");
            }

            let entry = state
                .sessions
                .get_mut(&chunk.token)
                .ok_or_else(|| DropError::session_invalid(chunk.token.as_str(), "unknown session"))?;
            check_consistent(entry, chunk)?;
            if entry.chunks.contains_key(&chunk.index) {
                return Err(DropError::session_invalid(
                    chunk.token.as_str(),
                    format!("chunk {} already received", chunk.index),
                ));
            }

            entry.received_bytes = entry.received_bytes.saturating_add(staged.bytes());
            entry.chunks.insert(chunk.index, staged.into_temp_path());
            entry.touched = Instant::now();
            let received = entry.chunks.len() as u32;
            let total = entry.total;

            if entry.received_bytes > self.max_bytes_per_file {
                if let Some(entry) = state.sessions.remove(&chunk.token) {
                    overflow = Some(entry.chunks.into_values().collect());
                }
                resolve_locked(
                    &mut state,
                    &chunk.token,
                    Err(format!("upload exceeds maximum size ({} bytes)", self.max_bytes_per_file)),
                );
                None
            } else if received == total {
                // Removed before the lock is released so a retried final chunk cannot
                // trigger a second finalization.
                let entry = state.sessions.remove(&chunk.token).ok_or_else(|| {
                    DropError::session_invalid(chunk.token.as_str(), "unknown session")
                })?;
                tracing::debug!(token = %chunk.token, total, "upload session complete");
                Some(ChunkOutcome::ReadyToFinalize(FinalizeTicket {
                    token: chunk.token.clone(),
                    filename: entry.filename,
                    chunks: entry.chunks.into_values().collect(),
                }))
            } else {
                tracing::debug!(token = %chunk.token, received, total, "chunk recorded");
                Some(ChunkOutcome::Waiting { received, total })
            }
        };

        match outcome {
            Some(outcome) => Ok(outcome),
            None => {
                drop(overflow);
                Err(DropError::SizeLimitExceeded {
                    limit: self.max_bytes_per_file,
                })
            }
        }
    }

    /// Publish the outcome of a finalized session to everyone waiting on it
    pub fn resolve(&self, token: &SessionToken, result: Finished) {
        let mut state = self.state.lock();
        resolve_locked(&mut state, token, result);
    }

    /// Wait until the session identified by `token` has been finalized.
    pub async fn wait_for(&self, token: &SessionToken, max_wait: Duration) -> DropResult<ContentObject> {
        let mut rx = {
            let state = self.state.lock();
            state
                .completions
                .get(token)
                .map(|c| c.tx.subscribe())
                .ok_or_else(|| DropError::session_invalid(token.as_str(), "unknown session"))?
        };

        let finished = match tokio::time::timeout(max_wait, rx.wait_for(Option::is_some)).await {
            Ok(Ok(value)) => value.clone(),
            Ok(Err(_)) => {
                return Err(DropError::upload_failed(format!(
                    "upload session {} was abandoned",
                    token
                )))
            }
            Err(_) => {
                return Err(DropError::WaitTimeout {
                    token: token.to_string(),
                    waited: max_wait,
                })
            }
        };

        match finished {
            Some(Ok(object)) => Ok(object),
            Some(Err(reason)) => Err(DropError::upload_failed(reason)),
            None => Err(DropError::upload_failed("upload session resolved without outcome")),
        }
    }

    /// Drop sessions idle for longer than `max_age` along with their staged files,
    /// and forget completion records older than `max_age`.
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        let mut released: Vec<TempPath> = Vec::new();
        let evicted = {
            let mut state = self.state.lock();
            let stale: Vec<SessionToken> = state
                .sessions
                .iter()
                .filter(|(_, entry)| entry.touched.elapsed() >= max_age)
                .map(|(token, _)| token.clone())
                .collect();

            for token in &stale {
                if let Some(entry) = state.sessions.remove(token) {
                    released.extend(entry.chunks.into_values());
                }
                resolve_locked(&mut state, token, Err("upload session expired".to_string()));
                state.completions.remove(token);
            }

            state.completions.retain(|_, completion| match completion.finished_at {
                Some(at) => at.elapsed() < max_age,
                None => true,
            });

            stale.len()
        };

        if evicted > 0 {
            tracing::info!(
                sessions = evicted,
                chunks = released.len(),
                "evicted stale upload sessions"
            );
        }
        evicted
    }

    /// Number of sessions still waiting for chunks
    pub fn active_sessions(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Received and expected chunk counts for an active session
    pub fn progress(&self, token: &SessionToken) -> Option<(u32, u32)> {
        let state = self.state.lock();
        state
            .sessions
            .get(token)
            .map(|entry| (entry.chunks.len() as u32, entry.total))
    }

    fn check_new_session(&self, state: &TableState, chunk: &ChunkSubmission) -> DropResult<()> {
        if state.completions.contains_key(&chunk.token) {
            return Err(DropError::session_invalid(
                chunk.token.as_str(),
                "session already finalized",
            ));
        }

        let declared = chunk.declared_size();
        if declared > self.max_bytes_per_file {
            return Err(DropError::UploadTooLarge {
                declared,
                max: self.max_bytes_per_file,
            });
        }

        Ok(())
    }
}

fn resolve_locked(state: &mut TableState, token: &SessionToken, result: Finished) {
    if let Some(completion) = state.completions.get_mut(token) {
        completion.tx.send_replace(Some(result));
        completion.finished_at = Some(Instant::now());
    }
}

fn validate_position(chunk: &ChunkSubmission) -> DropResult<()> {
    if chunk.total == 0 {
        return Err(DropError::session_invalid(
            chunk.token.as_str(),
            "total chunk count must be at least 1",
        ));
    }
    if chunk.index == 0 || chunk.index > chunk.total {
        return Err(DropError::session_invalid(
            chunk.token.as_str(),
            format!("chunk index {} outside 1..={}", chunk.index, chunk.total),
        ));
    }
    Ok(())
}

fn check_consistent(entry: &SessionEntry, chunk: &ChunkSubmission) -> DropResult<()> {
    if entry.total != chunk.total {
        return Err(DropError::session_invalid(
            chunk.token.as_str(),
            format!("expected {} chunks, got declaration of {}", entry.total, chunk.total),
        ));
    }
    if entry.filename != chunk.filename {
        return Err(DropError::session_invalid(
            chunk.token.as_str(),
            "filename changed mid-session",
        ));
    }
    Ok(())
}
