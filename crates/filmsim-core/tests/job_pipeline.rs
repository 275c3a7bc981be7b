use anyhow::Result;
use async_trait::async_trait;
use filmsim_core::catalog::PresetCatalog;
use filmsim_core::controller::{ChatController, SelectionError, SubmitError};
use filmsim_core::jobs::{Intensity, JobQueue, ToolError, TransformTool, WorkerContext, WorkerPool};
use filmsim_core::quota::{QuotaStore, SqliteQuotaStore};
use filmsim_core::transport::ChatTransport;
use filmsim_core::workdir::WorkDirs;
use filmsim_core::{ChatId, MessageId, UserId};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

const CHAT: ChatId = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Message { id: MessageId, text: String },
    Photo { caption: String, existed: bool },
    Edit { id: MessageId, text: String },
}

#[derive(Default)]
struct RecordingTransport {
    next_id: AtomicI32,
    sent: Mutex<Vec<Sent>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent lock").clone()
    }

    fn last_edit_of(&self, message_id: MessageId) -> Option<String> {
        self.sent().into_iter().rev().find_map(|s| match s {
            Sent::Edit { id, text } if id == message_id => Some(text),
            _ => None,
        })
    }

    fn photos(&self) -> Vec<(String, bool)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Photo { caption, existed } => Some((caption, existed)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(&self, _chat_id: ChatId, text: &str) -> Result<MessageId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().expect("sent lock").push(Sent::Message {
            id,
            text: text.to_string(),
        });
        Ok(id)
    }

    async fn send_photo(&self, _chat_id: ChatId, photo: &Path, caption: &str) -> Result<()> {
        self.sent.lock().expect("sent lock").push(Sent::Photo {
            caption: caption.to_string(),
            existed: photo.is_file(),
        });
        Ok(())
    }

    async fn edit_message_text(
        &self,
        _chat_id: ChatId,
        message_id: MessageId,
        text: &str,
    ) -> Result<()> {
        self.sent.lock().expect("sent lock").push(Sent::Edit {
            id: message_id,
            text: text.to_string(),
        });
        Ok(())
    }
}

enum Script {
    Succeed,
    Exit(i32),
    Timeout,
    Panic,
    Hold { started: Notify, release: Notify },
}

struct ScriptedTool(Script);

#[async_trait]
impl TransformTool for ScriptedTool {
    async fn apply(
        &self,
        _input: &Path,
        _preset: &Path,
        output: &Path,
        _intensity: Intensity,
    ) -> Result<(), ToolError> {
        match &self.0 {
            Script::Succeed => {}
            Script::Exit(code) => return Err(ToolError::NonZeroExit { code: Some(*code) }),
            Script::Timeout => return Err(ToolError::Timeout(Duration::from_secs(120))),
            Script::Panic => panic!("transform crashed"),
            Script::Hold { started, release } => {
                started.notify_one();
                release.notified().await;
            }
        }
        tokio::fs::write(output, b"processed").await?;
        Ok(())
    }
}

struct Harness {
    dir: TempDir,
    ctx: Arc<WorkerContext>,
    controller: ChatController,
    transport: Arc<RecordingTransport>,
    quota: Arc<SqliteQuotaStore>,
    tool: Arc<ScriptedTool>,
}

impl Harness {
    async fn new(script: Script, capacity: usize, free_daily_limit: u32) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let luts = dir.path().join("luts");
        for preset in ["A/film1.cube", "A/film2.cube", "B/chrome.cube", "plain.CUBE"] {
            let path = luts.join(preset);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            std::fs::write(&path, b"LUT_3D_SIZE 2").expect("write preset");
        }
        std::fs::write(dir.path().join("secret.cube"), b"outside").expect("write secret");

        let transport = Arc::new(RecordingTransport::default());
        let quota = Arc::new(SqliteQuotaStore::in_memory().await.expect("quota store"));
        let tool = Arc::new(ScriptedTool(script));
        let ctx = Arc::new(WorkerContext {
            queue: Arc::new(JobQueue::new(capacity)),
            catalog: Arc::new(PresetCatalog::new(luts)),
            tool: Arc::clone(&tool) as Arc<dyn TransformTool>,
            quota: Arc::clone(&quota) as Arc<dyn QuotaStore>,
            transport: Arc::clone(&transport) as Arc<dyn ChatTransport>,
            work: WorkDirs::new(dir.path().join("work")),
            delete_input: false,
        });
        let controller = ChatController::new(&ctx, free_daily_limit);

        Self {
            dir,
            ctx,
            controller,
            transport,
            quota,
            tool,
        }
    }

    async fn upload(&self, user: UserId) -> PathBuf {
        self.ctx.work.ensure_user_dir(user).await.expect("user dir");
        let input = self.ctx.work.input_path(user);
        tokio::fs::write(&input, b"jpeg").await.expect("write input");
        self.controller
            .photo_received(user, input.clone())
            .await
            .expect("photo received");
        input
    }

    async fn pick(&self, user: UserId, category: &str, filter: &str) {
        let session = self.controller.session(user).await.expect("session");
        let cat_idx = session
            .categories
            .iter()
            .position(|c| c == category)
            .expect("category listed");
        let session = self
            .controller
            .select_category(user, session.menu_rev, 0, cat_idx)
            .await
            .expect("category selected");
        let filter_idx = session
            .filters
            .iter()
            .position(|f| f == filter)
            .expect("filter listed");
        let picked = self
            .controller
            .select_filter(user, session.menu_rev, 0, filter_idx)
            .await
            .expect("filter selected");
        assert_eq!(picked.preset_id, filter);
    }

    async fn submit(&self, user: UserId) -> Result<MessageId, SubmitError> {
        let revision = self
            .controller
            .session(user)
            .await
            .map_or(0, |s| s.selection_rev);
        self.submit_at(user, revision).await
    }

    async fn submit_at(&self, user: UserId, revision: u32) -> Result<MessageId, SubmitError> {
        let intensity: Intensity = "0.75".parse().expect("intensity");
        self.controller
            .submit(user, CHAT, revision, intensity)
            .await
            .map(|s| s.status_message_id)
    }

    async fn drain(&self) {
        WorkerPool::spawn(1, Arc::clone(&self.ctx)).shutdown().await;
    }
}

#[tokio::test]
async fn successful_job_delivers_and_counts_once() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    let input = h.upload(1).await;

    let session = h.controller.session(1).await.expect("session");
    assert_eq!(session.categories, ["All", "A", "B", "Uncategorized"]);

    h.pick(1, "A", "A/film1.cube").await;
    let status = h.submit(1).await.expect("submitted");
    assert!(h.ctx.queue.is_busy(1));
    assert_eq!(h.ctx.queue.len(), 1);

    h.drain().await;

    assert_eq!(
        h.transport.photos(),
        [("A/film1 recipe @ 0.75".to_string(), true)]
    );
    assert_eq!(h.quota.usage_today(1).await.expect("usage"), 1);
    assert!(!h.ctx.queue.is_busy(1));
    assert_eq!(h.transport.last_edit_of(status).as_deref(), Some("Done ✅"));
    assert!(!h.ctx.work.output_path(1).exists());
    assert!(input.exists(), "input is kept for re-use");
}

#[tokio::test]
async fn timeout_reports_and_does_not_count() {
    let h = Harness::new(Script::Timeout, 10, 5).await;
    h.upload(1).await;
    h.pick(1, "A", "A/film1.cube").await;
    let status = h.submit(1).await.expect("submitted");

    h.drain().await;

    assert_eq!(
        h.transport.last_edit_of(status).as_deref(),
        Some("Error: processing timed out.")
    );
    assert!(h.transport.photos().is_empty());
    assert_eq!(h.quota.usage_today(1).await.expect("usage"), 0);
    assert!(!h.ctx.queue.is_busy(1));
}

#[tokio::test]
async fn non_zero_exit_reports_code() {
    let h = Harness::new(Script::Exit(3), 10, 5).await;
    h.upload(1).await;
    h.pick(1, "B", "B/chrome.cube").await;
    let status = h.submit(1).await.expect("submitted");

    h.drain().await;

    assert_eq!(
        h.transport.last_edit_of(status).as_deref(),
        Some("Error: processing failed (3).")
    );
    assert_eq!(h.quota.usage_today(1).await.expect("usage"), 0);
}

#[tokio::test]
async fn submissions_while_in_flight_are_rejected_as_busy() {
    let h = Harness::new(
        Script::Hold {
            started: Notify::new(),
            release: Notify::new(),
        },
        10,
        50,
    )
    .await;
    h.upload(1).await;
    h.pick(1, "A", "A/film2.cube").await;
    h.submit(1).await.expect("submitted");

    let pool = WorkerPool::spawn(1, Arc::clone(&h.ctx));
    let Script::Hold { started, release } = &h.tool.0 else {
        unreachable!("tool is scripted to hold");
    };
    started.notified().await;

    for _ in 0..5 {
        assert!(matches!(h.submit(1).await, Err(SubmitError::Busy)));
    }
    assert!(h.ctx.queue.is_empty());

    release.notify_one();
    pool.shutdown().await;

    assert_eq!(h.quota.usage_today(1).await.expect("usage"), 1);
    assert!(!h.ctx.queue.is_busy(1));
    assert!(h.submit(1).await.is_ok(), "user can submit again afterwards");
}

#[tokio::test]
async fn full_queue_rejects_without_marking_busy() {
    let h = Harness::new(Script::Succeed, 1, 5).await;
    for user in [1, 2] {
        h.upload(user).await;
        h.pick(user, "All", "plain.CUBE").await;
    }

    h.submit(1).await.expect("first job fits");
    assert!(matches!(h.submit(2).await, Err(SubmitError::QueueFull)));
    assert!(!h.ctx.queue.is_busy(2));

    let rejected_status = h
        .transport
        .sent()
        .into_iter()
        .filter_map(|s| match s {
            Sent::Message { id, .. } => Some(id),
            _ => None,
        })
        .last()
        .expect("status message");
    assert_eq!(
        h.transport.last_edit_of(rejected_status).as_deref(),
        Some("Server is busy. Try again shortly.")
    );

    h.drain().await;
    assert!(h.submit(2).await.is_ok(), "user 2 is not spuriously blocked");
}

#[tokio::test]
async fn daily_limit_blocks_before_queueing() {
    let h = Harness::new(Script::Succeed, 10, 1).await;
    h.upload(1).await;
    h.pick(1, "A", "A/film1.cube").await;
    h.quota.increment_usage(1, 1).await.expect("usage");

    let err = h.submit(1).await.expect_err("limit reached");
    assert!(matches!(err, SubmitError::QuotaExceeded { used: 1, limit: 1 }));
    assert!(h.transport.sent().is_empty(), "no status message is sent");
    assert!(!h.ctx.queue.is_busy(1));

    h.quota.grant_premium_days(1, 30).await.expect("premium");
    assert!(h.submit(1).await.is_ok());
}

#[tokio::test]
async fn missing_preconditions_are_rejected() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    assert!(matches!(h.submit(1).await, Err(SubmitError::NoSession)));

    h.upload(1).await;
    assert!(matches!(h.submit(1).await, Err(SubmitError::NoFilter)));

    // Browsing recipes without a photo still needs an upload before running.
    h.controller.open_recipes(2).await.expect("recipes");
    h.pick(2, "A", "A/film1.cube").await;
    assert!(matches!(h.submit(2).await, Err(SubmitError::NoInput)));

    assert!(h.transport.sent().is_empty());
    assert_eq!(h.ctx.queue.busy_count(), 0);
}

#[tokio::test]
async fn preset_removed_after_queueing_reports_not_found() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    h.upload(1).await;
    h.pick(1, "A", "A/film1.cube").await;
    let status = h.submit(1).await.expect("submitted");

    std::fs::remove_file(h.ctx.catalog.root().join("A/film1.cube")).expect("remove preset");
    h.drain().await;

    assert_eq!(
        h.transport.last_edit_of(status).as_deref(),
        Some("Error: recipe not found.")
    );
    assert_eq!(h.quota.usage_today(1).await.expect("usage"), 0);
}

#[tokio::test]
async fn catalog_refuses_paths_outside_root() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    let catalog = &h.ctx.catalog;

    assert!(catalog.resolve("A/film1.cube").await.is_ok());
    for bad in ["../secret.cube", "A/../../secret.cube", "/etc/passwd", ""] {
        let err = catalog.resolve(bad).await.expect_err("rejected");
        assert!(err.is_not_found(), "{bad} must not resolve");
    }

    #[cfg(unix)]
    {
        let link = catalog.root().join("A/escape.cube");
        std::os::unix::fs::symlink(h.dir.path().join("secret.cube"), &link).expect("symlink");
        assert!(catalog.resolve("A/escape.cube").await.is_err());
    }
}

#[tokio::test]
async fn clear_forgets_session_and_input() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    let input = h.upload(1).await;
    h.pick(1, "A", "A/film1.cube").await;
    h.submit(1).await.expect("submitted");

    h.controller.clear(1).await;

    assert!(h.controller.session(1).await.is_none());
    assert!(!h.ctx.queue.is_busy(1));
    assert!(!input.exists());
    assert!(matches!(h.submit(1).await, Err(SubmitError::NoSession)));
}

#[tokio::test]
async fn outdated_filter_menu_is_refused() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    h.upload(1).await;
    let session = h.controller.session(1).await.expect("session");
    let a_idx = session.categories.iter().position(|c| c == "A").expect("A");
    let b_idx = session.categories.iter().position(|c| c == "B").expect("B");

    let menu_a = h
        .controller
        .select_category(1, session.menu_rev, 0, a_idx)
        .await
        .expect("A selected");
    assert_eq!(menu_a.filters[0], "A/film1.cube");

    // Back to the categories (same revision), then into B.
    let categories = h.controller.back_to_categories(1, 0).await.expect("back");
    let menu_b = h
        .controller
        .select_category(1, categories.menu_rev, 0, b_idx)
        .await
        .expect("B selected");

    // A tap on the first button of the old A menu.
    let err = h
        .controller
        .select_filter(1, menu_a.menu_rev, 0, 0)
        .await
        .expect_err("outdated menu");
    assert!(matches!(err, SelectionError::StaleMenu(rev) if rev == menu_a.menu_rev));
    assert_eq!(
        h.controller.session(1).await.and_then(|s| s.selected_filter),
        None
    );

    let picked = h
        .controller
        .select_filter(1, menu_b.menu_rev, 0, 0)
        .await
        .expect("current menu");
    assert_eq!(picked.preset_id, "B/chrome.cube");
}

#[tokio::test]
async fn menu_of_previous_photo_is_refused() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    h.upload(1).await;
    let old = h.controller.session(1).await.expect("session");

    h.upload(1).await;
    let err = h
        .controller
        .select_category(1, old.menu_rev, 0, 1)
        .await
        .expect_err("outdated menu");
    assert!(matches!(err, SelectionError::StaleMenu(_)));
}

#[tokio::test]
async fn intensity_of_earlier_selection_is_refused() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    h.upload(1).await;
    h.pick(1, "A", "A/film1.cube").await;
    let film1_rev = h.controller.session(1).await.expect("session").selection_rev;

    h.pick(1, "A", "A/film2.cube").await;
    let err = h.submit_at(1, film1_rev).await.expect_err("outdated selection");
    assert!(matches!(err, SubmitError::StaleSelection(_)));
    assert!(h.transport.sent().is_empty());
    assert!(!h.ctx.queue.is_busy(1));

    h.submit(1).await.expect("current selection");
    h.drain().await;
    assert_eq!(
        h.transport.photos(),
        [("A/film2 recipe @ 0.75".to_string(), true)]
    );
}

#[tokio::test]
async fn new_upload_resets_selection_to_all() {
    let h = Harness::new(Script::Succeed, 10, 5).await;
    h.upload(1).await;
    h.pick(1, "B", "B/chrome.cube").await;

    h.upload(1).await;
    let session = h.controller.session(1).await.expect("session");
    assert_eq!(session.selected_filter, None);
    assert_eq!(session.category, "All");
    assert_eq!(session.category_page, 0);
    assert_eq!(session.filters.len(), 4);
    assert!(matches!(h.submit(1).await, Err(SubmitError::NoFilter)));
}

#[tokio::test]
async fn panicking_job_is_reported_and_worker_keeps_going() {
    let h = Harness::new(Script::Panic, 10, 5).await;
    for user in [1, 2] {
        h.upload(user).await;
        h.pick(user, "A", "A/film1.cube").await;
    }
    let first = h.submit(1).await.expect("first");
    let second = h.submit(2).await.expect("second");

    h.drain().await;

    for status in [first, second] {
        assert_eq!(
            h.transport.last_edit_of(status).as_deref(),
            Some("Error: internal error.")
        );
    }
    assert_eq!(h.ctx.queue.busy_count(), 0);
    assert_eq!(h.quota.usage_today(1).await.expect("usage"), 0);
}
