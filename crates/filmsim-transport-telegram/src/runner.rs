use crate::bot;
use crate::bot::handlers::Command;
use crate::bot::TelegramChatTransport;
use crate::config::BotSettings;
use filmsim_core::catalog::PresetCatalog;
use filmsim_core::config::FilmSimSettings;
use filmsim_core::controller::ChatController;
use filmsim_core::jobs::{JobQueue, LutScript, WorkerContext, WorkerPool};
use filmsim_core::quota::SqliteQuotaStore;
use filmsim_core::workdir::WorkDirs;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, PreCheckoutQuery};
use tracing::{error, info};

/// Run the Telegram transport runtime.
///
/// Returns after Ctrl-C, once the queued jobs have drained.
pub async fn run_bot(settings: Arc<BotSettings>) {
    let filmsim = settings.filmsim.as_ref();
    check_script(filmsim);
    init_work_dir(filmsim);
    let quota = init_quota_store(filmsim).await;

    let bot = Bot::new(settings.telegram.telegram_token.clone());
    let ctx = Arc::new(WorkerContext {
        queue: Arc::new(JobQueue::new(filmsim.queue_capacity())),
        catalog: Arc::new(PresetCatalog::new(&filmsim.filmsim_lut_dir)),
        tool: Arc::new(LutScript::new(&filmsim.filmsim_script, filmsim.tool_timeout())),
        quota,
        transport: Arc::new(TelegramChatTransport::new(bot.clone())),
        work: WorkDirs::new(&filmsim.filmsim_work_dir),
        delete_input: filmsim.filmsim_delete_input,
    });
    info!(
        lut_dir = %filmsim.filmsim_lut_dir.display(),
        workers = filmsim.worker_count(),
        delete_input = filmsim.filmsim_delete_input,
        "FilmSim initialized."
    );

    let pool = WorkerPool::spawn(filmsim.worker_count(), Arc::clone(&ctx));
    let controller = Arc::new(ChatController::new(&ctx, filmsim.filmsim_free_daily_limit));
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![controller])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped, draining job queue...");
    pool.shutdown().await;
}

fn check_script(settings: &FilmSimSettings) {
    if !settings.filmsim_script.is_file() {
        error!(
            "Transform script not found at {}",
            settings.filmsim_script.display()
        );
        std::process::exit(1);
    }
}

fn init_work_dir(settings: &FilmSimSettings) {
    if let Err(e) = std::fs::create_dir_all(&settings.filmsim_work_dir) {
        error!(
            "Failed to create work directory {}: {}",
            settings.filmsim_work_dir.display(),
            e
        );
        std::process::exit(1);
    }
}

async fn init_quota_store(
    settings: &FilmSimSettings,
) -> Arc<SqliteQuotaStore> {
    match SqliteQuotaStore::open(&settings.filmsim_db_path).await {
        Ok(store) => {
            info!("Quota database initialized.");
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to initialize quota database: {}", e);
            std::process::exit(1);
        }
    }
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(Update::filter_pre_checkout_query().endpoint(handle_pre_checkout))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint(handle_command),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.successful_payment().is_some())
                        .endpoint(handle_successful_payment),
                )
                .branch(
                    dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo),
                ),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    controller: Arc<ChatController>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start | Command::Help => bot::handlers::help(bot, msg).await,
        Command::Recipes => bot::handlers::recipes(bot, msg, controller).await,
        Command::Clear => bot::handlers::clear(bot, msg, controller).await,
        Command::Usage => bot::handlers::usage(bot, msg, controller).await,
        Command::Premium => bot::handlers::premium(bot, msg).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_photo(
    bot: Bot,
    msg: Message,
    controller: Arc<ChatController>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_photo(bot, msg, controller).await {
        error!("Photo handler error: {}", e);
    }
    respond(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    controller: Arc<ChatController>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_callback(bot, q, controller).await {
        error!("Callback handler error: {}", e);
    }
    respond(())
}

async fn handle_pre_checkout(
    bot: Bot,
    q: PreCheckoutQuery,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_pre_checkout(bot, q).await {
        error!("Pre-checkout handler error: {}", e);
    }
    respond(())
}

async fn handle_successful_payment(
    bot: Bot,
    msg: Message,
    controller: Arc<ChatController>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_successful_payment(bot, msg, controller).await {
        error!("Payment handler error: {}", e);
    }
    respond(())
}
