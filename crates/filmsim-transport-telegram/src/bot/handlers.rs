use crate::bot::callback::CallbackAction;
use crate::bot::resilient::{edit_markup_resilient, edit_message_resilient, send_message_resilient};
use crate::bot::views::{
    category_keyboard, filter_keyboard, filter_selected_text, intensity_keyboard,
    limit_reached_answer, limit_reached_text, premium_active_text, usage_text, BUSY_RETRY_LATER,
    CLEARED_TEXT, HELP_TEXT, MENU_OUTDATED, PAYMENT_UNKNOWN_PLAN, PHOTO_RECEIVED_TEXT, PICK_CATEGORY_TEXT,
    PICK_FILTER_TEXT, PICK_RECIPE_FIRST, QUEUED, RECIPE_NOT_FOUND, SELECTED, SEND_PHOTO_AGAIN,
    SEND_PHOTO_FIRST, SOMETHING_WENT_WRONG, STILL_PROCESSING, UNKNOWN_ACTION, UNKNOWN_PLAN,
};
use crate::utils::retry_telegram_operation;
use anyhow::{anyhow, Result};
use filmsim_core::billing::{self, BillingError, PREMIUM_30D, STARS_CURRENCY};
use filmsim_core::controller::{ChatController, SelectionError, SubmitError};
use filmsim_core::jobs::Intensity;
use filmsim_core::UserId;
use std::sync::Arc;
use teloxide::{
    net::Download,
    prelude::*,
    types::{LabeledPrice, MessageId, PreCheckoutQuery},
    utils::command::BotCommands,
};
use tracing::{debug, error, info, warn};

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show usage instructions
    #[command(description = "Show usage instructions.")]
    Start,
    /// Show usage instructions
    #[command(description = "Show usage instructions.")]
    Help,
    /// Browse recipes
    #[command(description = "Browse film look recipes.")]
    Recipes,
    /// Forget the current photo
    #[command(description = "Forget the current photo.")]
    Clear,
    /// Show today's usage
    #[command(description = "Show your usage for today.")]
    Usage,
    /// Buy premium
    #[command(description = "Unlimited exports with Premium.")]
    Premium,
}

/// Start/help handler
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn help(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, HELP_TEXT, None).await?;
    Ok(())
}

/// Open the category browser without requiring a new photo
///
/// # Errors
///
/// Returns an error if the catalog cannot be listed or the menu cannot be sent.
pub async fn recipes(bot: Bot, msg: Message, controller: Arc<ChatController>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let session = controller.open_recipes(user_id).await?;
    send_message_resilient(
        &bot,
        msg.chat.id,
        PICK_CATEGORY_TEXT,
        Some(category_keyboard(&session)),
    )
    .await?;
    Ok(())
}

/// Clear handler
///
/// # Errors
///
/// Returns an error if the confirmation cannot be sent.
pub async fn clear(bot: Bot, msg: Message, controller: Arc<ChatController>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    controller.clear(user_id).await;
    send_message_resilient(&bot, msg.chat.id, CLEARED_TEXT, None).await?;
    Ok(())
}

/// Usage handler
///
/// # Errors
///
/// Returns an error if the quota store fails or the reply cannot be sent.
pub async fn usage(bot: Bot, msg: Message, controller: Arc<ChatController>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let report = controller.usage(user_id).await?;
    send_message_resilient(&bot, msg.chat.id, usage_text(&report), None).await?;
    Ok(())
}

/// Premium handler: sends a Telegram Stars invoice
///
/// # Errors
///
/// Returns an error if the invoice cannot be sent.
pub async fn premium(bot: Bot, msg: Message) -> Result<()> {
    let plan = PREMIUM_30D;
    let prices = vec![LabeledPrice {
        label: plan.title.to_string(),
        amount: plan.stars,
    }];
    bot.send_invoice(
        msg.chat.id,
        plan.title,
        plan.description,
        plan.payload,
        STARS_CURRENCY,
        prices,
    )
    .await?;
    info!(user_id = get_user_id_safe(&msg), plan = plan.payload, "Invoice sent");
    Ok(())
}

/// Handle an uploaded photo: store the largest size and show the categories
///
/// # Errors
///
/// Returns an error if the download, the catalog or the reply fails.
pub async fn handle_photo(bot: Bot, msg: Message, controller: Arc<ChatController>) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let photo = msg
        .photo()
        .and_then(|p| p.last())
        .ok_or_else(|| anyhow!("No photo found"))?;

    // Download photo file with retry logic
    let buffer = retry_telegram_operation(|| async {
        let file = bot.get_file(photo.file.id.clone()).await?;
        let mut buf = Vec::new();
        bot.download_file(&file.path, &mut buf).await?;
        Ok(buf)
    })
    .await?;

    let work = controller.work_dirs();
    work.ensure_user_dir(user_id).await?;
    let input = work.input_path(user_id);
    tokio::fs::write(&input, &buffer).await?;
    debug!(user_id, bytes = buffer.len(), "Photo stored");

    let session = controller.photo_received(user_id, input).await?;
    send_message_resilient(
        &bot,
        msg.chat.id,
        PHOTO_RECEIVED_TEXT,
        Some(category_keyboard(&session)),
    )
    .await?;
    Ok(())
}

/// Handle inline button presses
///
/// # Errors
///
/// Returns an error if the callback carries no message.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    controller: Arc<ChatController>,
) -> Result<()> {
    let user_id = q.from.id.0.cast_signed();
    let data = q.data.as_deref().unwrap_or_default();

    let Some(action) = CallbackAction::parse(data) else {
        debug!(user_id, data, "Unknown callback payload");
        answer(&bot, &q, Some(UNKNOWN_ACTION.to_string())).await;
        return Ok(());
    };
    if action == CallbackAction::Noop {
        answer(&bot, &q, None).await;
        return Ok(());
    }

    let (chat_id, message_id) = q
        .message
        .as_ref()
        .map(|m| (m.chat().id, m.id()))
        .ok_or_else(|| anyhow!("Callback message missing chat id"))?;

    let reply = if let CallbackAction::Intensity { rev, intensity } = action {
        submit(&bot, &controller, user_id, chat_id, rev, intensity).await
    } else {
        match navigate(&bot, &controller, user_id, chat_id, message_id, action).await {
            Ok(reply) => reply.map(ToString::to_string),
            Err(e) => Some(selection_reply(&e).to_string()),
        }
    };

    answer(&bot, &q, reply).await;
    Ok(())
}

async fn answer(bot: &Bot, q: &CallbackQuery, text: Option<String>) {
    let mut req = bot.answer_callback_query(q.id.clone());
    if let Some(text) = text {
        req = req.text(text);
    }
    if let Err(e) = req.await {
        warn!("Failed to answer callback query: {e}");
    }
}

async fn navigate(
    bot: &Bot,
    controller: &ChatController,
    user_id: UserId,
    chat_id: ChatId,
    message_id: MessageId,
    action: CallbackAction,
) -> Result<Option<&'static str>> {
    match action {
        CallbackAction::CategoryPage(page) => {
            let session = controller.category_page(user_id, page).await?;
            edit_markup_resilient(bot, chat_id, message_id, category_keyboard(&session)).await?;
            Ok(None)
        }
        CallbackAction::Categories(page) => {
            let session = controller.back_to_categories(user_id, page).await?;
            edit_message_resilient(
                bot,
                chat_id,
                message_id,
                PICK_CATEGORY_TEXT,
                Some(category_keyboard(&session)),
            )
            .await?;
            Ok(None)
        }
        CallbackAction::Category { rev, page, index } => {
            let session = controller.select_category(user_id, rev, page, index).await?;
            edit_message_resilient(
                bot,
                chat_id,
                message_id,
                PICK_FILTER_TEXT,
                Some(filter_keyboard(&session)),
            )
            .await?;
            Ok(Some(SELECTED))
        }
        CallbackAction::FilterPage(page) => {
            let session = controller.filter_page(user_id, page).await?;
            edit_markup_resilient(bot, chat_id, message_id, filter_keyboard(&session)).await?;
            Ok(None)
        }
        CallbackAction::Filter { rev, page, index } => {
            let selection = controller.select_filter(user_id, rev, page, index).await?;
            send_message_resilient(
                bot,
                chat_id,
                filter_selected_text(&selection.preset_id),
                Some(intensity_keyboard(selection.revision)),
            )
            .await?;
            Ok(Some(SELECTED))
        }
        CallbackAction::Noop | CallbackAction::Intensity { .. } => Ok(None),
    }
}

fn selection_reply(e: &anyhow::Error) -> &'static str {
    match e.downcast_ref::<SelectionError>() {
        Some(SelectionError::NoSession) => SEND_PHOTO_FIRST,
        Some(SelectionError::StaleMenu(_)) => MENU_OUTDATED,
        Some(SelectionError::IndexOutOfRange(_)) => UNKNOWN_ACTION,
        _ => {
            error!("Menu navigation failed: {e}");
            SOMETHING_WENT_WRONG
        }
    }
}

async fn submit(
    bot: &Bot,
    controller: &ChatController,
    user_id: UserId,
    chat_id: ChatId,
    rev: u32,
    intensity: Intensity,
) -> Option<String> {
    let err = match controller.submit(user_id, chat_id.0, rev, intensity).await {
        Ok(_) => return Some(QUEUED.to_string()),
        Err(e) => e,
    };

    let reply = match &err {
        SubmitError::NoSession => SEND_PHOTO_FIRST,
        SubmitError::NoFilter => PICK_RECIPE_FIRST,
        SubmitError::StaleSelection(_) => MENU_OUTDATED,
        SubmitError::NoInput => SEND_PHOTO_AGAIN,
        SubmitError::InvalidPreset(_) => RECIPE_NOT_FOUND,
        SubmitError::Busy => STILL_PROCESSING,
        SubmitError::QueueFull | SubmitError::QueueClosed => BUSY_RETRY_LATER,
        SubmitError::QuotaExceeded { used, limit } => {
            if let Err(e) =
                send_message_resilient(bot, chat_id, limit_reached_text(*limit), None).await
            {
                warn!(user_id, "Failed to send upsell message: {e}");
            }
            return Some(limit_reached_answer(*used, *limit));
        }
        SubmitError::Quota(_) | SubmitError::Transport(_) => {
            error!(user_id, "Job submission failed: {err}");
            SOMETHING_WENT_WRONG
        }
    };
    debug!(user_id, reason = %err, "Job submission rejected");
    Some(reply.to_string())
}

/// Approve pre-checkout queries for known plans only
///
/// # Errors
///
/// Returns an error if the answer cannot be sent.
pub async fn handle_pre_checkout(bot: Bot, q: PreCheckoutQuery) -> Result<()> {
    match billing::pre_checkout(&q.invoice_payload) {
        Ok(plan) => {
            debug!(plan = plan.payload, "Pre-checkout approved");
            bot.answer_pre_checkout_query(q.id.clone(), true).await?;
        }
        Err(_) => {
            bot.answer_pre_checkout_query(q.id.clone(), false)
                .error_message(UNKNOWN_PLAN)
                .await?;
        }
    }
    Ok(())
}

/// Grant premium after a successful payment
///
/// # Errors
///
/// Returns an error if the grant or the reply fails.
pub async fn handle_successful_payment(
    bot: Bot,
    msg: Message,
    controller: Arc<ChatController>,
) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let payload = msg
        .successful_payment()
        .map(|p| p.invoice_payload.clone())
        .unwrap_or_default();

    let text = match billing::apply_successful_payment(controller.quota(), user_id, &payload).await
    {
        Ok(until) => premium_active_text(until),
        Err(BillingError::UnknownPlan(_)) => {
            warn!(user_id, payload = %payload, "Payment for unknown plan");
            PAYMENT_UNKNOWN_PLAN.to_string()
        }
        Err(e) => return Err(e.into()),
    };
    send_message_resilient(&bot, msg.chat.id, text, None).await?;
    Ok(())
}
