//! # Sync Adaptor Core
//!
//! Drives one provider/data-type pair from a [`SyncRequest`] to a
//! [`SyncOutcome`].
//!
//! ## Workflow
//!
//! 1. **Validating**: fetch the credential and check the minimum resync
//!    interval. Neither step touches the network.
//! 2. **Running**: fetch pages with retry, applying each one in its own
//!    [`PageTransaction`](crate::PageTransaction) before asking for the
//!    next. An optional [`CommitHook`] may attach follow-up work to each
//!    committed page; the run waits for it before leaving Running.
//! 3. **Finalizing**: persist the last-success timestamp.
//!
//! Failures keep every page committed so far. Cancellation before
//! Finalizing replays the inverse of the committed pages so local storage
//! ends up exactly as it was before the run. Pending follow-up work is
//! dropped on cancellation, failure and timeout.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let core = SyncAdaptorCore::new(source, store, credentials, state, settings, event_bus, clock);
//! let handle = core.start_sync(SyncRequest::new("vk", DataType::Contacts, AccountId::new(42)));
//! // ...
//! core.cancel(&handle);
//! let outcome = handle.outcome().await;
//! ```

use crate::hook::CommitHook;
use crate::repository::SyncStateRepository;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::run::{SyncJobId, SyncRun};
use crate::source::{PageRequest, PageSource, Record};
use crate::store::LocalStore;
use crate::types::{DataType, SyncOutcome, SyncRequest, SyncScope};
use crate::{Result, SyncError};
use bridge_traits::time::Clock;
use core_auth::{AccessToken, CredentialProvider};
use core_runtime::config::SyncSettings;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, SyncEvent};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Handle
// ============================================================================

/// Cancellable handle to a running sync.
///
/// Awaiting [`outcome`](Self::outcome) yields the run's single
/// [`SyncOutcome`]. Dropping the handle detaches the run; it keeps going.
#[derive(Debug)]
pub struct SyncHandle {
    job_id: SyncJobId,
    cancellation_token: CancellationToken,
    join: JoinHandle<SyncOutcome>,
}

impl SyncHandle {
    pub fn job_id(&self) -> SyncJobId {
        self.job_id
    }

    /// Request cooperative cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn outcome(self) -> SyncOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(job_id = %self.job_id, error = %e, "Sync task did not finish");
                SyncOutcome::failed(&SyncError::Internal(format!("sync task aborted: {}", e)), 0)
            }
        }
    }
}

// ============================================================================
// Adaptor
// ============================================================================

/// Removes the scope from the active set when the run task ends, including
/// on panic.
struct ActiveRunGuard {
    active: Arc<Mutex<HashSet<SyncScope>>>,
    scope: SyncScope,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.scope);
    }
}

/// Generic sync engine for one [`PageSource`].
///
/// Cheap to clone; clones share the active-run set, so two clones still
/// refuse to run the same scope concurrently.
#[derive(Clone)]
pub struct SyncAdaptorCore {
    source: Arc<dyn PageSource>,
    store: Arc<dyn LocalStore>,
    credentials: Arc<dyn CredentialProvider>,
    state: Arc<dyn SyncStateRepository>,
    settings: SyncSettings,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    commit_hook: Option<Arc<dyn CommitHook>>,
    active: Arc<Mutex<HashSet<SyncScope>>>,
}

impl SyncAdaptorCore {
    pub fn new(
        source: Arc<dyn PageSource>,
        store: Arc<dyn LocalStore>,
        credentials: Arc<dyn CredentialProvider>,
        state: Arc<dyn SyncStateRepository>,
        settings: SyncSettings,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source,
            store,
            credentials,
            state,
            settings,
            event_bus,
            clock,
            commit_hook: None,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Attach follow-up work to every committed page.
    pub fn with_commit_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.commit_hook = Some(hook);
        self
    }

    pub fn provider(&self) -> &str {
        self.source.provider()
    }

    pub fn data_type(&self) -> DataType {
        self.source.data_type()
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Start a run in the background.
    ///
    /// Must be called from within a Tokio runtime. Every call yields exactly
    /// one outcome through the returned handle, including requests rejected
    /// because the same scope is already syncing.
    pub fn start_sync(&self, request: SyncRequest) -> SyncHandle {
        let job_id = SyncJobId::new();
        let cancellation_token = CancellationToken::new();
        let scope = request.scope();

        let admitted = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.insert(scope.clone())
        };

        let join = if admitted {
            let guard = ActiveRunGuard {
                active: Arc::clone(&self.active),
                scope,
            };
            let core = self.clone();
            let token = cancellation_token.clone();
            tokio::spawn(async move {
                let _guard = guard;
                core.execute(request, job_id, token).await
            })
        } else {
            warn!(scope = %scope, "Sync already in progress, rejecting request");
            let error = SyncError::SyncInProgress {
                scope: scope.to_string(),
            };
            self.emit(CoreEvent::Sync(SyncEvent::Failed {
                job_id: job_id.to_string(),
                kind: error.kind().as_str().to_string(),
                message: error.to_string(),
                items_changed: 0,
            }));
            tokio::spawn(async move { SyncOutcome::failed(&error, 0) })
        };

        SyncHandle {
            job_id,
            cancellation_token,
            join,
        }
    }

    pub fn cancel(&self, handle: &SyncHandle) {
        info!(job_id = %handle.job_id, "Cancelling sync");
        handle.cancel();
    }

    #[instrument(
        skip(self, request, cancel),
        fields(
            job_id = %job_id,
            provider = %request.provider,
            data_type = %request.data_type,
            account_id = %request.account_id
        )
    )]
    async fn execute(
        &self,
        request: SyncRequest,
        job_id: SyncJobId,
        cancel: CancellationToken,
    ) -> SyncOutcome {
        let started = Instant::now();
        let scope = request.scope();

        self.emit(CoreEvent::Sync(SyncEvent::Started {
            job_id: job_id.to_string(),
            provider: request.provider.clone(),
            data_type: request.data_type.as_str().to_string(),
            account_id: request.account_id.get(),
        }));

        let run = match SyncRun::with_id(job_id, &request).validate() {
            Ok(run) => run,
            Err(e) => return self.abandon(job_id, e),
        };

        // ---- Validating ----
        let token = match self.validate(&request).await {
            Ok(token) => token,
            Err(error) => return self.fail(run, error).await,
        };

        if cancel.is_cancelled() {
            return self.cancel_run(run, &scope, Vec::new()).await;
        }

        let mut run = match run.start() {
            Ok(run) => run,
            Err(e) => return self.abandon(job_id, e),
        };

        // ---- Running ----
        let mut inverse: Vec<Vec<Record>> = Vec::new();
        let mut follow_ups: JoinSet<()> = JoinSet::new();
        let run_timeout = self.settings.run_timeout;
        let pages = tokio::time::timeout(run_timeout, async {
            self.run_pages(
                &request,
                &token,
                &mut run,
                &mut inverse,
                &mut follow_ups,
                &cancel,
            )
            .await?;
            self.await_follow_ups(&mut follow_ups, &cancel).await?;
            Ok::<(), SyncError>(())
        })
        .await;

        if !matches!(pages, Ok(Ok(()))) && !follow_ups.is_empty() {
            debug!(pending = follow_ups.len(), "Dropping page follow-ups");
            follow_ups.shutdown().await;
        }

        match pages {
            Ok(Ok(())) => {}
            Ok(Err(SyncError::Cancelled)) => return self.cancel_run(run, &scope, inverse).await,
            Ok(Err(error)) => {
                if let SyncError::Credential { status, .. } = &error {
                    self.reject_credential(&request, *status).await;
                }
                return self.fail(run, error).await;
            }
            Err(_) => {
                error!(timeout_secs = run_timeout.as_secs(), "Sync run timed out");
                return self.fail(run, SyncError::Timeout(run_timeout.as_secs())).await;
            }
        }

        if cancel.is_cancelled() {
            return self.cancel_run(run, &scope, inverse).await;
        }

        // ---- Finalizing ----
        let run = match run.finalize() {
            Ok(run) => run,
            Err(e) => return self.abandon(job_id, e),
        };

        if let Err(error) = self.state.set_last_success(&scope, self.clock.now()).await {
            return self.fail(run, error).await;
        }

        let run = match run.complete() {
            Ok(run) => run,
            Err(e) => return self.abandon(job_id, e),
        };
        self.record(&run).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            pages = run.pages_committed,
            items_changed = run.items_changed,
            duration_ms,
            "Sync completed"
        );
        self.emit(CoreEvent::Sync(SyncEvent::Completed {
            job_id: job_id.to_string(),
            items_changed: run.items_changed,
            pages: run.pages_committed,
            duration_ms,
        }));

        SyncOutcome::success(run.items_changed)
    }

    /// Credential lookup, routing check and the resync floor.
    async fn validate(&self, request: &SyncRequest) -> Result<AccessToken> {
        if request.provider != self.source.provider()
            || request.data_type != self.source.data_type()
        {
            return Err(SyncError::Internal(format!(
                "request for {}/{} routed to {}/{} source",
                request.provider,
                request.data_type,
                self.source.provider(),
                self.source.data_type()
            )));
        }

        let token = match self
            .credentials
            .access_token(&request.provider, request.account_id)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                let error = SyncError::from(e);
                if matches!(error, SyncError::Credential { .. }) {
                    self.emit(CoreEvent::Auth(AuthEvent::CredentialRejected {
                        provider: request.provider.clone(),
                        account_id: request.account_id.get(),
                        status: None,
                    }));
                }
                return Err(error);
            }
        };

        self.check_resync_floor(request).await?;
        Ok(token)
    }

    async fn check_resync_floor(&self, request: &SyncRequest) -> Result<()> {
        let last_success = match request.last_success {
            Some(at) => Some(at),
            None => self.state.last_success(&request.scope()).await?,
        };
        let Some(last_success) = last_success else {
            return Ok(());
        };

        let floor = chrono::Duration::from_std(self.settings.min_resync_interval)
            .map_err(|e| SyncError::Internal(format!("resync interval out of range: {}", e)))?;
        let elapsed = self.clock.now() - last_success;

        if elapsed < floor {
            let retry_in = (floor - elapsed).to_std().unwrap_or_default();
            return Err(SyncError::TooSoon { retry_in });
        }
        Ok(())
    }

    async fn run_pages(
        &self,
        request: &SyncRequest,
        token: &AccessToken,
        run: &mut SyncRun,
        inverse: &mut Vec<Vec<Record>>,
        follow_ups: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let scope = request.scope();
        let policy = RetryPolicy::from_settings(&self.settings);
        let request_timeout = self.settings.request_timeout;
        let page_size = self.settings.page_size;
        let source = self.source.as_ref();
        let mut cursor: Option<String> = None;
        let mut page_index: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let current = cursor.as_deref();
            let since = request.last_success;
            let page = retry_with_backoff(&policy, cancel, move |attempt| async move {
                debug!(page = page_index, attempt, "Fetching page");
                let fetch = source.fetch_page(PageRequest {
                    token,
                    cursor: current,
                    page_size,
                    since,
                    page_index,
                });
                match tokio::time::timeout(request_timeout, fetch).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::TransientNetwork(format!(
                        "page request timed out after {}s",
                        request_timeout.as_secs()
                    ))),
                }
            })
            .await
            .map_err(|error| {
                if let SyncError::MalformedResponse { provider, message } = &error {
                    error!(
                        provider = %provider,
                        page = page_index,
                        cursor = ?current,
                        message = %message,
                        "Provider returned a malformed page"
                    );
                }
                error
            })?;

            let mut tx = self.store.begin(&scope).await?;
            let mut apply_error = None;
            for record in &page.records {
                if cancel.is_cancelled() {
                    break;
                }
                if let Err(e) = tx.apply(record).await {
                    apply_error = Some(e);
                    break;
                }
            }

            if apply_error.is_some() || cancel.is_cancelled() {
                if let Err(e) = tx.rollback().await {
                    warn!(page = page_index, error = %e, "Failed to roll back page");
                }
                return Err(apply_error.unwrap_or(SyncError::Cancelled));
            }

            let receipt = tx.commit().await?;
            run.record_page(receipt.changed)?;
            inverse.push(receipt.inverse);

            debug!(
                page = page_index,
                records = page.records.len(),
                changed = receipt.changed,
                "Page committed"
            );
            self.emit(CoreEvent::Sync(SyncEvent::PageCommitted {
                job_id: run.id.to_string(),
                page: page_index,
                records: receipt.changed,
                total_records: run.items_changed,
            }));

            if let Some(hook) = &self.commit_hook {
                if let Some(work) = hook.after_commit(&scope, &page.records) {
                    follow_ups.spawn(work);
                }
            }

            match page.next_cursor {
                Some(next) if Some(next.as_str()) == cursor.as_deref() => {
                    return Err(SyncError::MalformedResponse {
                        provider: request.provider.clone(),
                        message: format!("cursor {} did not advance", next),
                    });
                }
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
            page_index += 1;
        }
    }

    /// Wait for follow-up work of committed pages, or until cancelled.
    async fn await_follow_ups(
        &self,
        follow_ups: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !follow_ups.is_empty() {
            debug!(pending = follow_ups.len(), "Waiting for page follow-ups");
        }
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                joined = follow_ups.join_next() => match joined {
                    None => return Ok(()),
                    Some(Err(e)) if e.is_panic() => {
                        warn!(error = %e, "Page follow-up panicked");
                    }
                    Some(_) => {}
                },
            }
        }
    }

    /// Revert committed pages and report `Cancelled`.
    async fn cancel_run(
        &self,
        run: SyncRun,
        scope: &SyncScope,
        inverse: Vec<Vec<Record>>,
    ) -> SyncOutcome {
        let reverted = run.items_changed;
        if let Err(error) = self.revert(scope, inverse).await {
            error!(error = %error, "Could not revert cancelled run");
            return self.fail(run, error).await;
        }

        let job_id = run.id;
        match run.cancel() {
            Ok(run) => self.record(&run).await,
            Err(e) => warn!(error = %e, "Invalid cancel transition"),
        }

        info!(job_id = %job_id, reverted, "Sync cancelled");
        self.emit(CoreEvent::Sync(SyncEvent::Cancelled {
            job_id: job_id.to_string(),
            items_changed: reverted,
        }));
        SyncOutcome::cancelled()
    }

    async fn revert(&self, scope: &SyncScope, inverse: Vec<Vec<Record>>) -> Result<()> {
        let records: Vec<Record> = inverse
            .into_iter()
            .rev()
            .flat_map(|page| page.into_iter().rev())
            .collect();
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.store.begin(scope).await?;
        for record in &records {
            if let Err(e) = tx.apply(record).await {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back revert");
                }
                return Err(e);
            }
        }
        tx.commit().await?;
        debug!(records = records.len(), "Reverted committed pages");
        Ok(())
    }

    async fn fail(&self, run: SyncRun, error: SyncError) -> SyncOutcome {
        let job_id = run.id;
        let items_changed = run.items_changed;

        match &error {
            SyncError::TooSoon { retry_in } => {
                info!(retry_in_secs = retry_in.as_secs(), "Sync skipped, too soon");
                self.emit(CoreEvent::Sync(SyncEvent::Skipped {
                    job_id: job_id.to_string(),
                    retry_in_secs: retry_in.as_secs(),
                }));
            }
            _ => {
                warn!(kind = %error.kind(), error = %error, items_changed, "Sync failed");
                self.emit(CoreEvent::Sync(SyncEvent::Failed {
                    job_id: job_id.to_string(),
                    kind: error.kind().as_str().to_string(),
                    message: error.to_string(),
                    items_changed,
                }));
            }
        }

        match run.fail(&error) {
            Ok(run) => self.record(&run).await,
            Err(e) => warn!(error = %e, "Invalid fail transition"),
        }

        SyncOutcome::failed(&error, items_changed)
    }

    /// Outcome for a broken state machine. Only reachable through a bug.
    fn abandon(&self, job_id: SyncJobId, error: SyncError) -> SyncOutcome {
        error!(job_id = %job_id, error = %error, "Sync state machine rejected a transition");
        SyncOutcome::failed(&error, 0)
    }

    async fn reject_credential(&self, request: &SyncRequest, status: Option<u16>) {
        warn!(?status, "Provider rejected credential, invalidating");
        if let Err(e) = self
            .credentials
            .invalidate(&request.provider, request.account_id)
            .await
        {
            warn!(error = %e, "Failed to invalidate credential");
        }
        self.emit(CoreEvent::Auth(AuthEvent::CredentialRejected {
            provider: request.provider.clone(),
            account_id: request.account_id.get(),
            status,
        }));
    }

    async fn record(&self, run: &SyncRun) {
        if let Err(e) = self.state.record_run(run).await {
            warn!(job_id = %run.id, error = %e, "Failed to record sync run");
        }
    }

    fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}
