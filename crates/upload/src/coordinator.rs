//! Admission, scheduling and per-session workers.
//!
//! Every admitted file gets one spawned task that owns its [`UploadSession`].
//! Callers feed chunks through a bounded channel, which keeps them in order
//! and pushes back on senders when the worker falls behind. A semaphore caps
//! how many sessions write to disk at once. A session takes a slot for each
//! batch it writes and gives it back while waiting for the next one, so
//! sessions over the cap wait for a slot instead of being turned away.

use crate::admission::{AdmissionCheck, BlockedExtensions};
use crate::error::{UploadError, UploadResult};
use crate::finalizer::AtomicFinalizer;
use crate::metrics;
use crate::report::{SessionSnapshot, UploadReport};
use crate::session::{EncryptionSetup, UploadSession};
use bytes::Bytes;
use dashmap::DashMap;
use futures::future::join_all;
use lanvan_cipher::CipherKey;
use lanvan_core::config::{AppConfig, PacingConfig, UploadConfig};
use lanvan_core::pacer::select_probe;
use lanvan_core::{
    AdaptivePacer, ChunkBuffer, ContentHash, FileDescriptor, Load, ResourceProbe, SessionId,
    UploadStatus, sanitize_filename,
};
use lanvan_storage::UploadDirectory;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Terminal reports kept for late status queries.
const REPORT_HISTORY: usize = 256;

/// Collaborators built once at startup and handed to the coordinator.
#[derive(Clone)]
pub struct Environment {
    probe: Arc<dyn ResourceProbe>,
    pacer: AdaptivePacer,
    admission: Option<Arc<dyn AdmissionCheck>>,
}

impl Environment {
    /// Probe selected by `pacing.probe`, pacer from the same section, no admission check.
    pub fn from_config(config: &PacingConfig) -> Self {
        let probe: Arc<dyn ResourceProbe> = Arc::from(select_probe(config.probe));
        tracing::info!(probe = probe.name(), "Resource probe selected");
        Self {
            probe,
            pacer: AdaptivePacer::from_config(config),
            admission: None,
        }
    }

    /// Like [`Environment::from_config`], adding an extension block list if one is configured.
    pub fn for_app(config: &AppConfig) -> Self {
        let env = Self::from_config(&config.pacing);
        let blocked = BlockedExtensions::new(&config.upload.blocked_extensions);
        if blocked.is_empty() {
            env
        } else {
            env.with_admission(Arc::new(blocked))
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_admission(mut self, check: Arc<dyn AdmissionCheck>) -> Self {
        self.admission = Some(check);
        self
    }

    pub fn probe(&self) -> &dyn ResourceProbe {
        self.probe.as_ref()
    }

    pub fn pacer(&self) -> &AdaptivePacer {
        &self.pacer
    }
}

struct ChunkMessage {
    data: Bytes,
    is_last: bool,
}

impl std::fmt::Debug for ChunkMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkMessage")
            .field("len", &self.data.len())
            .field("is_last", &self.is_last)
            .finish()
    }
}

/// Latest state published by a worker.
#[derive(Clone, Debug)]
struct Progress {
    status: UploadStatus,
    bytes_received: u64,
    report: Option<UploadReport>,
}

struct SessionEntry {
    filename: String,
    expected_size: Option<u64>,
    sender: mpsc::Sender<ChunkMessage>,
    progress: watch::Receiver<Progress>,
    cancel: CancellationToken,
}

struct Inner {
    config: UploadConfig,
    kdf_iterations: u32,
    env: Environment,
    directory: Arc<UploadDirectory>,
    finalizer: AtomicFinalizer,
    slots: Arc<Semaphore>,
    sessions: DashMap<SessionId, SessionEntry>,
    reports: Mutex<VecDeque<UploadReport>>,
    admitted: AtomicUsize,
    receiving: AtomicUsize,
    peak_receiving: AtomicUsize,
}

impl Inner {
    fn retained_report(&self, id: SessionId) -> Option<UploadReport> {
        let reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        reports.iter().rev().find(|r| r.session_id == id).cloned()
    }

    fn retain_report(&self, report: UploadReport) {
        let mut reports = self.reports.lock().unwrap_or_else(PoisonError::into_inner);
        if reports.len() >= REPORT_HISTORY {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    /// Reserve a pending slot, refusing once `max_pending_sessions` are live.
    fn reserve_admission(&self) -> UploadResult<()> {
        let cap = self.config.max_pending_sessions;
        self.admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < cap).then_some(n + 1)
            })
            .map(|_| ())
            .map_err(|n| {
                UploadError::ResourceExhausted(format!("{n} sessions already pending (limit {cap})"))
            })
    }

    fn release_admission(&self) {
        self.admitted.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Caller's side of an admitted session.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    filename: String,
    declared_filename: String,
    chunk_size: usize,
    random_key: Option<CipherKey>,
    sender: mpsc::Sender<ChunkMessage>,
    progress: watch::Receiver<Progress>,
}

impl SessionHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Sanitized name the file will be published under, before collision numbering.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn declared_filename(&self) -> &str {
        &self.declared_filename
    }

    /// Suggested size for the chunks the caller sends.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Key for a random-key encrypted session. Not stored anywhere else.
    pub fn random_key(&self) -> Option<&CipherKey> {
        self.random_key.as_ref()
    }

    pub fn status(&self) -> UploadStatus {
        self.progress.borrow().status
    }

    /// Queue the next chunk, waiting for room in the session's channel.
    ///
    /// With `is_last` this waits for the terminal report.
    pub async fn send_chunk(
        &self,
        data: Bytes,
        is_last: bool,
    ) -> UploadResult<Option<UploadReport>> {
        deliver(
            self.session_id,
            &self.sender,
            self.progress.clone(),
            data,
            is_last,
        )
        .await
    }

    /// Wait for the terminal report.
    pub async fn wait(&self) -> UploadResult<UploadReport> {
        wait_report(self.session_id, self.progress.clone()).await
    }
}

async fn deliver(
    id: SessionId,
    sender: &mpsc::Sender<ChunkMessage>,
    progress: watch::Receiver<Progress>,
    data: Bytes,
    is_last: bool,
) -> UploadResult<Option<UploadReport>> {
    let repeat_close = is_last && data.is_empty();
    if sender.send(ChunkMessage { data, is_last }).await.is_err() {
        // The queue closed after the closing chunk. A repeated empty close
        // still gets the outcome; anything carrying data is refused.
        return if repeat_close {
            wait_report(id, progress).await.map(Some)
        } else {
            Err(UploadError::SessionClosed(id))
        };
    }
    if !is_last {
        return Ok(None);
    }
    wait_report(id, progress).await.map(Some)
}

async fn wait_report(
    id: SessionId,
    mut progress: watch::Receiver<Progress>,
) -> UploadResult<UploadReport> {
    let progress = progress
        .wait_for(|p| p.report.is_some())
        .await
        .map_err(|_| UploadError::SessionClosed(id))?;
    progress
        .report
        .clone()
        .ok_or(UploadError::SessionClosed(id))
}

/// Runs concurrent uploads with a bounded number of disk writers.
#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<Inner>,
}

impl UploadCoordinator {
    /// Open the upload directory and clear temp files left by an earlier process.
    pub async fn new(config: &AppConfig, env: Environment) -> UploadResult<Self> {
        config.validate()?;
        let directory = Arc::new(UploadDirectory::new(&config.upload.upload_dir).await?);
        let swept = directory.remove_orphaned_temp_files().await?;
        if swept > 0 {
            tracing::info!(count = swept, "Removed orphaned temp files");
        }

        let slots = config.upload.max_concurrent_uploads;
        tracing::info!(
            upload_dir = %directory.root().display(),
            max_concurrent_uploads = slots,
            "Upload coordinator ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config: config.upload.clone(),
                kdf_iterations: config.encryption.kdf_iterations,
                env,
                finalizer: AtomicFinalizer::new(directory.clone()),
                directory,
                slots: Arc::new(Semaphore::new(slots)),
                sessions: DashMap::new(),
                reports: Mutex::new(VecDeque::with_capacity(REPORT_HISTORY)),
                admitted: AtomicUsize::new(0),
                receiving: AtomicUsize::new(0),
                peak_receiving: AtomicUsize::new(0),
            }),
        })
    }

    /// Admit a batch of files. Results line up with `files`; a rejected file
    /// does not affect the others.
    pub async fn submit(&self, files: Vec<FileDescriptor>) -> Vec<UploadResult<SessionHandle>> {
        join_all(files.into_iter().map(|descriptor| self.admit(descriptor))).await
    }

    #[tracing::instrument(skip(self, descriptor), fields(filename = %descriptor.filename, size = ?descriptor.declared_size))]
    async fn admit(&self, descriptor: FileDescriptor) -> UploadResult<SessionHandle> {
        let inner = &self.inner;
        let filename = sanitize_filename(&descriptor.filename)?;

        if let (Some(limit), Some(size)) = (inner.config.max_file_size, descriptor.declared_size)
            && size > limit
        {
            return Err(UploadError::Validation(format!(
                "declared size {size} exceeds the {limit} byte limit"
            )));
        }
        let expected_hash = descriptor
            .expected_sha256
            .as_deref()
            .map(ContentHash::from_hex)
            .transpose()?;

        if let Some(check) = &inner.env.admission
            && descriptor
                .declared_size
                .is_none_or(|size| size <= inner.config.admission_scan_threshold_bytes)
        {
            check
                .check(&descriptor, &filename)
                .await
                .map_err(UploadError::Validation)?;
        }

        inner.reserve_admission()?;
        match self.spawn_session(descriptor, filename, expected_hash).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                inner.release_admission();
                Err(e)
            }
        }
    }

    async fn spawn_session(
        &self,
        descriptor: FileDescriptor,
        filename: String,
        expected_hash: Option<ContentHash>,
    ) -> UploadResult<SessionHandle> {
        let inner = &self.inner;
        let id = SessionId::new();
        let mut session = UploadSession::new(id, &descriptor, filename.clone(), expected_hash);

        let mut random_key = None;
        if let Some(request) = descriptor.encryption.clone() {
            let iterations = inner.kdf_iterations;
            let setup = tokio::task::spawn_blocking(move || {
                EncryptionSetup::prepare(&request, iterations)
            })
            .await
            .map_err(|e| UploadError::Io(std::io::Error::other(e)))??;
            random_key = setup.random_key;
            session = session.with_cipher(setup.cipher, setup.metadata);
        }

        let chunk_size = inner
            .env
            .pacer
            .chunk_size(descriptor.declared_size, inner.env.probe.available_memory());
        let (sender, receiver) = mpsc::channel(inner.config.chunk_queue_depth);
        let (progress_tx, progress_rx) = watch::channel(Progress {
            status: UploadStatus::Pending,
            bytes_received: 0,
            report: None,
        });
        let cancel = CancellationToken::new();

        inner.sessions.insert(
            id,
            SessionEntry {
                filename: filename.clone(),
                expected_size: descriptor.declared_size,
                sender: sender.clone(),
                progress: progress_rx.clone(),
                cancel: cancel.clone(),
            },
        );
        metrics::UPLOAD_SESSIONS_CREATED.inc();
        metrics::ACTIVE_UPLOAD_SESSIONS.inc();

        let span = tracing::info_span!("upload", session_id = %id, filename = %filename);
        let worker = Worker {
            inner: inner.clone(),
            session,
            receiver,
            progress: progress_tx,
            cancel,
            buffer: ChunkBuffer::with_capacity(chunk_size),
            chunks_since_yield: 0,
        };
        tokio::spawn(worker.run().instrument(span));

        tracing::info!(
            session_id = %id,
            chunk_size,
            encrypted = descriptor.encryption.is_some(),
            "Upload session admitted"
        );
        Ok(SessionHandle {
            session_id: id,
            filename,
            declared_filename: descriptor.filename,
            chunk_size,
            random_key,
            sender,
            progress: progress_rx,
        })
    }

    /// Deliver a chunk by session id. `is_last` waits for and returns the report.
    ///
    /// A finished session still answers an empty closing chunk with its
    /// retained report.
    pub async fn push_chunk(
        &self,
        id: SessionId,
        data: Bytes,
        is_last: bool,
    ) -> UploadResult<Option<UploadReport>> {
        let channel = self
            .inner
            .sessions
            .get(&id)
            .map(|entry| (entry.sender.clone(), entry.progress.clone()));
        match channel {
            Some((sender, progress)) => deliver(id, &sender, progress, data, is_last).await,
            None => match self.inner.retained_report(id) {
                Some(report) if is_last && data.is_empty() => Ok(Some(report)),
                Some(_) => Err(UploadError::SessionClosed(id)),
                None => Err(UploadError::SessionNotFound(id)),
            },
        }
    }

    /// Cancel a session and wait for its terminal report.
    ///
    /// Sessions already past `Receiving` finish normally and report that outcome.
    pub async fn abort(&self, id: SessionId) -> UploadResult<UploadReport> {
        let live = self
            .inner
            .sessions
            .get(&id)
            .map(|entry| (entry.cancel.clone(), entry.progress.clone()));
        match live {
            Some((cancel, progress)) => {
                cancel.cancel();
                wait_report(id, progress).await
            }
            None => self
                .inner
                .retained_report(id)
                .ok_or(UploadError::SessionNotFound(id)),
        }
    }

    /// Current state of a live or recently finished session.
    pub fn status(&self, id: SessionId) -> UploadResult<SessionSnapshot> {
        if let Some(entry) = self.inner.sessions.get(&id) {
            let progress = entry.progress.borrow();
            return Ok(SessionSnapshot {
                session_id: id,
                filename: entry.filename.clone(),
                status: progress.status,
                bytes_received: progress.bytes_received,
                expected_size: entry.expected_size,
            });
        }
        self.inner
            .retained_report(id)
            .map(|report| SessionSnapshot {
                session_id: id,
                filename: report.filename,
                status: report.status,
                bytes_received: report.size,
                expected_size: None,
            })
            .ok_or(UploadError::SessionNotFound(id))
    }

    /// Terminal report, if the session finished recently.
    pub fn report(&self, id: SessionId) -> Option<UploadReport> {
        self.inner.retained_report(id)
    }

    /// Wait until the session finishes.
    pub async fn wait(&self, id: SessionId) -> UploadResult<UploadReport> {
        let progress = self
            .inner
            .sessions
            .get(&id)
            .map(|entry| entry.progress.clone());
        match progress {
            Some(progress) => wait_report(id, progress).await,
            None => self
                .inner
                .retained_report(id)
                .ok_or(UploadError::SessionNotFound(id)),
        }
    }

    /// Admitted sessions that have not finished.
    pub fn active_sessions(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Sessions holding a worker slot right now.
    pub fn receiving_uploads(&self) -> usize {
        self.inner.receiving.load(Ordering::SeqCst)
    }

    /// Highest `receiving_uploads` seen since startup.
    pub fn peak_receiving_uploads(&self) -> usize {
        self.inner.peak_receiving.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_uploads(&self) -> usize {
        self.inner.config.max_concurrent_uploads
    }

    pub fn directory(&self) -> &UploadDirectory {
        &self.inner.directory
    }
}

/// Worker slot held while a session writes one batch of chunks.
struct SlotGuard {
    inner: Arc<Inner>,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    fn new(inner: Arc<Inner>, permit: OwnedSemaphorePermit) -> Self {
        let now = inner.receiving.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_receiving.fetch_max(now, Ordering::SeqCst);
        metrics::RECEIVING_UPLOAD_SESSIONS.inc();
        Self {
            inner,
            _permit: permit,
        }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // Runs before the permit field is released.
        self.inner.receiving.fetch_sub(1, Ordering::SeqCst);
        metrics::RECEIVING_UPLOAD_SESSIONS.dec();
    }
}

struct Worker {
    inner: Arc<Inner>,
    session: UploadSession,
    receiver: mpsc::Receiver<ChunkMessage>,
    progress: watch::Sender<Progress>,
    cancel: CancellationToken,
    buffer: ChunkBuffer,
    chunks_since_yield: u32,
}

impl Worker {
    async fn run(mut self) {
        let report = match self.drive().await {
            Ok(path) => {
                metrics::UPLOAD_SESSIONS_COMMITTED.inc();
                UploadReport::committed(&self.session, &path)
            }
            Err(error) => {
                self.settle(&error).await;
                if matches!(error, UploadError::Aborted) {
                    metrics::UPLOAD_SESSIONS_ABORTED.inc();
                } else {
                    metrics::record_upload_error(error.kind());
                }
                UploadReport::failed(&self.session, &error)
            }
        };
        self.finish(report);
    }

    /// Receive chunks until the closing one, then commit.
    ///
    /// The slot is taken per message and released while waiting on the
    /// network, so idle senders never hold back other sessions. Reaching the
    /// declared size does not commit; only a closing chunk does, and any
    /// bytes past the declaration fail the session.
    async fn drive(&mut self) -> UploadResult<PathBuf> {
        loop {
            let ChunkMessage { mut data, is_last } = self.next_chunk().await?;
            if data.is_empty() && !is_last {
                continue;
            }
            if is_last {
                self.close_queue()?;
            }

            let _slot = self.acquire_slot().await?;
            if self.session.status() == UploadStatus::Pending {
                self.session.begin(&self.inner.directory).await?;
            }
            self.ingest(&mut data).await?;

            if is_last {
                let tail = self.buffer.take();
                self.session.append_last(&tail).await?;
                self.publish_progress();
                return self.commit().await;
            }
            self.publish_progress();
        }
    }

    async fn next_chunk(&mut self) -> UploadResult<ChunkMessage> {
        let idle = self.inner.config.idle_timeout();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(UploadError::Aborted),
            received = tokio::time::timeout(idle, self.receiver.recv()) => match received {
                Ok(Some(message)) => Ok(message),
                Ok(None) => Err(UploadError::Aborted),
                Err(_) => Err(UploadError::Timeout(idle)),
            },
        }
    }

    /// Stop accepting chunks once the closing one arrived.
    ///
    /// Data queued behind the closing chunk would otherwise be dropped
    /// unread, so it fails the session instead.
    fn close_queue(&mut self) -> UploadResult<()> {
        self.receiver.close();
        let mut trailing = 0u64;
        while let Ok(message) = self.receiver.try_recv() {
            trailing += message.data.len() as u64;
        }
        if trailing == 0 {
            return Ok(());
        }
        let declared = self.session.bytes_received() + self.buffer.len() as u64;
        Err(UploadError::Overflow {
            declared: self.session.expected_size().unwrap_or(declared),
            received: declared + trailing,
        })
    }

    /// Wait for a worker slot.
    async fn acquire_slot(&self) -> UploadResult<SlotGuard> {
        let wait_limit = self.inner.config.slot_acquire_timeout();
        let waited = Instant::now();
        let acquire = self.inner.slots.clone().acquire_owned();
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(UploadError::Aborted),
            acquired = tokio::time::timeout(wait_limit, acquire) => match acquired {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => {
                    return Err(UploadError::ResourceExhausted(
                        "worker slots closed".to_string(),
                    ));
                }
                Err(_) => {
                    return Err(UploadError::ResourceExhausted(format!(
                        "no worker slot free within {wait_limit:?}"
                    )));
                }
            },
        };
        metrics::SLOT_WAIT_DURATION.observe(waited.elapsed().as_secs_f64());
        Ok(SlotGuard::new(self.inner.clone(), permit))
    }

    /// Stage `data`, writing every full chunk it completes.
    async fn ingest(&mut self, data: &mut Bytes) -> UploadResult<()> {
        self.session
            .ensure_capacity((self.buffer.len() + data.len()) as u64)?;
        while !data.is_empty() {
            if let Some(chunk) = self.buffer.push(data) {
                self.session.append(&chunk).await?;
                metrics::CHUNKS_WRITTEN.inc();
                metrics::BYTES_RECEIVED.inc_by(chunk.len() as u64);
                tracing::debug!(
                    len = chunk.len(),
                    total = self.session.bytes_received(),
                    "Chunk written"
                );
                self.pace().await;
            }
        }
        Ok(())
    }

    async fn pace(&mut self) {
        let load = Load::sample(
            self.inner.receiving.load(Ordering::SeqCst),
            self.inner.config.max_concurrent_uploads,
            self.inner.env.probe.as_ref(),
        );
        self.chunks_since_yield += 1;
        if self.chunks_since_yield < self.inner.env.pacer.yield_every(&load) {
            return;
        }
        self.chunks_since_yield = 0;
        let pause = self.inner.env.pacer.yield_interval(&load);
        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            // Cancellation is picked up at the next receive.
            tokio::select! {
                () = self.cancel.cancelled() => {}
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn commit(&mut self) -> UploadResult<PathBuf> {
        let started = Instant::now();
        let path = self.inner.finalizer.commit(&mut self.session).await?;
        metrics::UPLOAD_COMMIT_DURATION.observe(started.elapsed().as_secs_f64());
        Ok(path)
    }

    /// Move a session that stopped early into its terminal state.
    async fn settle(&mut self, error: &UploadError) {
        if self.session.status().is_terminal() {
            return;
        }
        let directory = &self.inner.directory;
        let aborting = matches!(error, UploadError::Aborted)
            && self.session.status().can_transition_to(UploadStatus::Aborted);
        let result = if aborting {
            self.session.abort(directory).await
        } else {
            self.session.fail(directory, error).await
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to settle upload session");
        }
    }

    fn publish_progress(&self) {
        let status = self.session.status();
        let bytes_received = self.session.bytes_received();
        self.progress.send_modify(|p| {
            p.status = status;
            p.bytes_received = bytes_received;
        });
    }

    fn finish(self, report: UploadReport) {
        let id = self.session.id();
        self.inner.retain_report(report.clone());
        self.inner.sessions.remove(&id);
        self.inner.release_admission();
        metrics::ACTIVE_UPLOAD_SESSIONS.dec();
        // Waiters wake only after the session's resources are released.
        self.progress.send_replace(Progress {
            status: report.status,
            bytes_received: report.size,
            report: Some(report),
        });
    }
}
