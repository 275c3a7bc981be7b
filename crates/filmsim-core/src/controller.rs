//! Chat event orchestration
//!
//! [`ChatController`] owns the session store and turns decoded chat events
//! into session transitions and job submissions. Rendering menus is left to
//! the transport; the controller only hands back session snapshots.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{CatalogError, PresetCatalog, CATEGORY_ALL};
use crate::config::PAGE_SIZE;
use crate::jobs::{EnqueueError, Intensity, Job, JobQueue, WorkerContext};
use crate::quota::{QuotaError, QuotaStore};
use crate::session::{PageWindow, Session, SessionStore};
use crate::transport::ChatTransport;
use crate::workdir::WorkDirs;
use crate::{ChatId, MessageId, UserId};

/// Initial text of a job's status message
pub const QUEUED_TEXT: &str = "Queued…";
/// Status text when the queue rejected the job for lack of capacity
pub const QUEUE_FULL_TEXT: &str = "Server is busy. Try again shortly.";
/// Status text when the user raced in a second job
pub const STILL_BUSY_TEXT: &str = "Still processing your last request…";

/// Errors of menu navigation
#[derive(Error, Debug)]
pub enum SelectionError {
    /// The user has no session yet
    #[error("No active session")]
    NoSession,
    /// A callback referenced an item that is not in the session's list
    #[error("Selection index {0} out of range")]
    IndexOutOfRange(usize),
    /// The button belongs to a menu whose list has since been replaced
    #[error("Menu revision {0} is outdated")]
    StaleMenu(u32),
    /// Listing presets failed
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Reasons a job submission was rejected
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The user has no session yet
    #[error("No active session")]
    NoSession,
    /// No filter has been selected
    #[error("No filter selected")]
    NoFilter,
    /// The intensity button belongs to an earlier filter selection
    #[error("Selection revision {0} is outdated")]
    StaleSelection(u32),
    /// The uploaded photo is missing
    #[error("No input photo")]
    NoInput,
    /// The selected preset no longer resolves
    #[error("Invalid preset: {0}")]
    InvalidPreset(#[source] CatalogError),
    /// A job of this user is still in flight
    #[error("A job is already in flight")]
    Busy,
    /// The free daily limit is used up
    #[error("Daily limit reached ({used}/{limit})")]
    QuotaExceeded {
        /// Exports today
        used: u32,
        /// Free daily limit
        limit: u32,
    },
    /// The job queue is at capacity
    #[error("Job queue is full")]
    QueueFull,
    /// The queue no longer accepts jobs
    #[error("Job queue is closed")]
    QueueClosed,
    /// The quota store failed
    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),
    /// The status message could not be sent
    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

/// An accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    /// Id of the enqueued job
    pub job_id: Uuid,
    /// Status message the worker will edit
    pub status_message_id: MessageId,
    /// Selected preset
    pub preset_id: String,
}

/// A picked filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSelection {
    /// Selected preset
    pub preset_id: String,
    /// Revision the intensity buttons must carry
    pub revision: u32,
}

/// Answer to `/usage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageReport {
    /// Whether the user currently has premium
    pub premium: bool,
    /// Exports today
    pub used: u32,
    /// Free daily limit
    pub limit: u32,
}

/// Session state machine and submission gatekeeper
pub struct ChatController {
    sessions: SessionStore,
    catalog: Arc<PresetCatalog>,
    queue: Arc<JobQueue>,
    quota: Arc<dyn QuotaStore>,
    transport: Arc<dyn ChatTransport>,
    work: WorkDirs,
    free_daily_limit: u32,
    revisions: AtomicU32,
}

impl ChatController {
    /// Create a controller sharing the workers' queue, catalog and stores
    #[must_use]
    pub fn new(ctx: &WorkerContext, free_daily_limit: u32) -> Self {
        Self {
            sessions: SessionStore::new(),
            catalog: Arc::clone(&ctx.catalog),
            queue: Arc::clone(&ctx.queue),
            quota: Arc::clone(&ctx.quota),
            transport: Arc::clone(&ctx.transport),
            work: ctx.work.clone(),
            free_daily_limit,
            revisions: AtomicU32::new(0),
        }
    }

    // One counter for all users: a revision is never reused, even after a
    // session was cleared and recreated.
    fn next_revision(&self) -> u32 {
        self.revisions.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Working directory layout
    #[must_use]
    pub const fn work_dirs(&self) -> &WorkDirs {
        &self.work
    }

    /// Shared job queue
    #[must_use]
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Quota and entitlement store
    #[must_use]
    pub fn quota(&self) -> &dyn QuotaStore {
        self.quota.as_ref()
    }

    /// Snapshot of a user's session
    pub async fn session(&self, user_id: UserId) -> Option<Session> {
        self.sessions.get(user_id).await
    }

    /// A new photo was stored at `input_path`: reset the selection and list
    /// every category.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    pub async fn photo_received(
        &self,
        user_id: UserId,
        input_path: PathBuf,
    ) -> Result<Session, CatalogError> {
        let presets = self.catalog.list_presets().await?;
        let categories = crate::catalog::categories_of(&presets);
        let mut session = Session::for_input(input_path, categories, presets);
        session.menu_rev = self.next_revision();
        session.selection_rev = self.next_revision();
        self.sessions.insert(user_id, session.clone()).await;
        info!(user_id, presets = session.filters.len(), "Photo received");
        Ok(session)
    }

    /// Open the category browser, keeping any uploaded photo.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    pub async fn open_recipes(&self, user_id: UserId) -> Result<Session, CatalogError> {
        let categories = self.catalog.list_categories().await?;
        let revision = self.next_revision();
        Ok(self
            .sessions
            .upsert(user_id, |s| {
                s.menu_rev = revision;
                s.categories = categories;
                s.category = CATEGORY_ALL.to_string();
                s.category_page = 0;
                s.clone()
            })
            .await)
    }

    /// Move the category menu to `page` (clamped).
    ///
    /// # Errors
    ///
    /// Returns `NoSession` if the user has no session.
    pub async fn category_page(
        &self,
        user_id: UserId,
        page: usize,
    ) -> Result<Session, SelectionError> {
        self.sessions
            .update(user_id, |s| {
                s.category_page = PageWindow::new(s.categories.len(), page, PAGE_SIZE).page;
                s.clone()
            })
            .await
            .ok_or(SelectionError::NoSession)
    }

    /// Return to the category menu at `page`.
    ///
    /// # Errors
    ///
    /// Returns `NoSession` if the user has no session.
    pub async fn back_to_categories(
        &self,
        user_id: UserId,
        page: usize,
    ) -> Result<Session, SelectionError> {
        self.category_page(user_id, page).await
    }

    /// Pick the category at `index` of the menu at `revision`, shown on `page`.
    ///
    /// # Errors
    ///
    /// Returns `NoSession`, `StaleMenu` when the lists changed since the menu
    /// was rendered, `IndexOutOfRange`, or a catalog error.
    pub async fn select_category(
        &self,
        user_id: UserId,
        revision: u32,
        page: usize,
        index: usize,
    ) -> Result<Session, SelectionError> {
        let session = self
            .sessions
            .get(user_id)
            .await
            .ok_or(SelectionError::NoSession)?;
        if session.menu_rev != revision {
            return Err(SelectionError::StaleMenu(revision));
        }
        let category = session
            .categories
            .get(index)
            .cloned()
            .ok_or(SelectionError::IndexOutOfRange(index))?;

        let filters = self.catalog.list_by_category(&category).await?;
        debug!(user_id, category = %category, filters = filters.len(), "Category selected");

        let menu_rev = self.next_revision();
        let selection_rev = self.next_revision();
        self.sessions
            .update(user_id, |s| {
                // Another tap may have replaced the lists while the catalog was read.
                if s.menu_rev != revision {
                    return Err(SelectionError::StaleMenu(revision));
                }
                s.category_page = PageWindow::new(s.categories.len(), page, PAGE_SIZE).page;
                s.category = category;
                s.filters = filters;
                s.filter_page = 0;
                s.selected_filter = None;
                s.menu_rev = menu_rev;
                s.selection_rev = selection_rev;
                Ok(s.clone())
            })
            .await
            .ok_or(SelectionError::NoSession)?
    }

    /// Move the filter menu to `page` (clamped).
    ///
    /// # Errors
    ///
    /// Returns `NoSession` if the user has no session.
    pub async fn filter_page(
        &self,
        user_id: UserId,
        page: usize,
    ) -> Result<Session, SelectionError> {
        self.sessions
            .update(user_id, |s| {
                s.filter_page = PageWindow::new(s.filters.len(), page, PAGE_SIZE).page;
                s.clone()
            })
            .await
            .ok_or(SelectionError::NoSession)
    }

    /// Pick the filter at `index` of the menu at `revision`.
    ///
    /// # Errors
    ///
    /// Returns `NoSession`, `StaleMenu` or `IndexOutOfRange`.
    pub async fn select_filter(
        &self,
        user_id: UserId,
        revision: u32,
        page: usize,
        index: usize,
    ) -> Result<FilterSelection, SelectionError> {
        let selection_rev = self.next_revision();
        self.sessions
            .update(user_id, |s| {
                if s.menu_rev != revision {
                    return Err(SelectionError::StaleMenu(revision));
                }
                let preset_id = s
                    .filters
                    .get(index)
                    .cloned()
                    .ok_or(SelectionError::IndexOutOfRange(index))?;
                s.filter_page = PageWindow::new(s.filters.len(), page, PAGE_SIZE).page;
                s.selected_filter = Some(preset_id.clone());
                s.selection_rev = selection_rev;
                Ok(FilterSelection {
                    preset_id,
                    revision: selection_rev,
                })
            })
            .await
            .ok_or(SelectionError::NoSession)?
    }

    /// Submit a job for the selection at `revision` at `intensity`.
    ///
    /// Preconditions are checked in order: session, filter, selection
    /// revision, input photo, preset, busy, quota. On success a status message has been sent and the
    /// job is queued with its user in the busy-set.
    ///
    /// # Errors
    ///
    /// Returns the first failed precondition, or `QueueFull`/`Busy` when the
    /// atomic enqueue is rejected (the status message is then edited).
    pub async fn submit(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        revision: u32,
        intensity: Intensity,
    ) -> Result<Submitted, SubmitError> {
        let session = self
            .sessions
            .get(user_id)
            .await
            .ok_or(SubmitError::NoSession)?;
        let preset_id = session
            .current_filter()
            .map(ToString::to_string)
            .ok_or(SubmitError::NoFilter)?;
        if session.selection_rev != revision {
            return Err(SubmitError::StaleSelection(revision));
        }
        let input_path = match &session.input_path {
            Some(path) if tokio::fs::metadata(path).await.is_ok_and(|m| m.is_file()) => {
                path.clone()
            }
            _ => return Err(SubmitError::NoInput),
        };
        self.catalog
            .resolve(&preset_id)
            .await
            .map_err(SubmitError::InvalidPreset)?;

        if self.queue.is_busy(user_id) {
            return Err(SubmitError::Busy);
        }
        let check = self.quota.can_process(user_id, self.free_daily_limit).await?;
        if !check.allowed {
            info!(user_id, used = check.used, limit = check.limit, "Daily limit reached");
            return Err(SubmitError::QuotaExceeded {
                used: check.used,
                limit: check.limit,
            });
        }

        let status_message_id = self
            .transport
            .send_message(chat_id, QUEUED_TEXT)
            .await
            .map_err(SubmitError::Transport)?;

        let job = Job {
            id: Uuid::new_v4(),
            user_id,
            chat_id,
            status_message_id,
            input_path,
            preset_id: preset_id.clone(),
            intensity,
            output_path: self.work.output_path(user_id),
        };
        let job_id = job.id;

        match self.queue.submit(job) {
            Ok(()) => {
                info!(user_id, job_id = %job_id, preset = %preset_id, %intensity, "Job queued");
                Ok(Submitted {
                    job_id,
                    status_message_id,
                    preset_id,
                })
            }
            Err(e) => Err(self.reject(user_id, chat_id, status_message_id, e).await),
        }
    }

    async fn reject(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        status_message_id: MessageId,
        error: EnqueueError,
    ) -> SubmitError {
        let (text, err) = match error {
            EnqueueError::Busy => (STILL_BUSY_TEXT, SubmitError::Busy),
            EnqueueError::Full => (QUEUE_FULL_TEXT, SubmitError::QueueFull),
            EnqueueError::Closed => (QUEUE_FULL_TEXT, SubmitError::QueueClosed),
        };
        warn!(user_id, %error, "Job rejected by queue");
        if let Err(e) = self
            .transport
            .edit_message_text(chat_id, status_message_id, text)
            .await
        {
            warn!(user_id, error = %e, "Failed to update status message");
        }
        err
    }

    /// Forget the user's session and photo and release their busy mark.
    ///
    /// A job that is already running still completes.
    pub async fn clear(&self, user_id: UserId) {
        self.sessions.remove(user_id).await;
        self.queue.release(user_id);
        self.work.remove_inputs(user_id).await;
        info!(user_id, "Session cleared");
    }

    /// Today's usage and premium status.
    ///
    /// # Errors
    ///
    /// Returns an error if the quota store fails.
    pub async fn usage(&self, user_id: UserId) -> Result<UsageReport, QuotaError> {
        let used = self.quota.usage_today(user_id).await?;
        let premium = self.quota.is_premium(user_id).await?;
        Ok(UsageReport {
            premium,
            used,
            limit: self.free_daily_limit,
        })
    }
}
