//! Recipe browser UI components
//!
//! Contains keyboards, text messages, and formatters for the photo →
//! category → filter → intensity flow.

use crate::bot::callback::CallbackAction;
use chrono::{DateTime, Utc};
use filmsim_core::catalog::display_name;
use filmsim_core::config::{LABEL_MAX_CHARS, PAGE_SIZE};
use filmsim_core::controller::UsageReport;
use filmsim_core::jobs::Intensity;
use filmsim_core::session::{PageWindow, Session};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

// ─────────────────────────────────────────────────────────────────────────────
// Texts
// ─────────────────────────────────────────────────────────────────────────────

/// Reply to `/start` and `/help`
pub const HELP_TEXT: &str = "Send me a photo, then choose a recipe.\n\n\
Commands:\n\
/recipes  (browse film look recipes)\n\
/clear (forget current photo)\n\
/usage (your current usage for today)\n\
/premium (unlimited exports)\n";
/// Header of the category menu after an upload
pub const PHOTO_RECEIVED_TEXT: &str = "Photo received. Pick a category:";
/// Header of the category menu
pub const PICK_CATEGORY_TEXT: &str = "Pick a category:";
/// Header of the filter menu
pub const PICK_FILTER_TEXT: &str = "Pick a filter:";
/// Reply to `/clear`
pub const CLEARED_TEXT: &str = "Cleared your current selection.";
/// Callback answer without a session
pub const SEND_PHOTO_FIRST: &str = "Send a photo first.";
/// Callback answer when the upload is gone
pub const SEND_PHOTO_AGAIN: &str = "Send a photo again.";
/// Callback answer without a selected filter
pub const PICK_RECIPE_FIRST: &str = "Pick a recipe first.";
/// Callback answer for stale or unknown buttons
pub const UNKNOWN_ACTION: &str = "Unknown action.";
/// Callback answer for a button of an outdated menu
pub const MENU_OUTDATED: &str = "This menu is out of date. Use the latest one.";
/// Callback answer for a selected item
pub const SELECTED: &str = "Selected";
/// Callback answer for a queued job
pub const QUEUED: &str = "Queued";
/// Callback answer while a job is in flight
pub const STILL_PROCESSING: &str = "Still processing your last request…";
/// Callback answer when the queue is full
pub const BUSY_RETRY_LATER: &str = "Busy right now, try again in a minute.";
/// Callback answer when the recipe vanished
pub const RECIPE_NOT_FOUND: &str = "Recipe not found. Pick another one.";
/// Generic failure answer
pub const SOMETHING_WENT_WRONG: &str = "Something went wrong. Try again later.";
/// Pre-checkout refusal reason
pub const UNKNOWN_PLAN: &str = "Unknown plan.";
/// Reply to a payment with an unknown payload
pub const PAYMENT_UNKNOWN_PLAN: &str = "Payment received, but the plan is unknown.";

/// Message shown after a filter was picked
#[must_use]
pub fn filter_selected_text(preset_id: &str) -> String {
    format!(
        "Selected filter:\n{}\n\nPick intensity:",
        display_name(preset_id)
    )
}

/// Callback answer when the daily limit is reached
#[must_use]
pub fn limit_reached_answer(used: u32, limit: u32) -> String {
    format!("Daily limit reached ({used}/{limit}).")
}

/// Upsell message when the daily limit is reached
#[must_use]
pub fn limit_reached_text(limit: u32) -> String {
    format!("You’ve hit today’s free limit ({limit}).\nUpgrade to Premium for unlimited. (/premium)")
}

/// Reply to `/usage`
#[must_use]
pub fn usage_text(report: &UsageReport) -> String {
    if report.premium {
        format!("⭐ Premium: unlimited exports.\nToday: {} exports.", report.used)
    } else {
        format!(
            "Free exports today: {}/{}\nUpgrade: /premium",
            report.used, report.limit
        )
    }
}

/// Reply to a successful payment
#[must_use]
pub fn premium_active_text(until: DateTime<Utc>) -> String {
    format!("Premium active until {} ✅", until.format("%Y-%m-%d"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyboards
// ─────────────────────────────────────────────────────────────────────────────

/// Shorten a label to fit a button, keeping its tail
#[must_use]
pub fn button_label(text: &str) -> String {
    let count = text.chars().count();
    if count <= LABEL_MAX_CHARS {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - (LABEL_MAX_CHARS - 1)).collect();
    format!("…{tail}")
}

fn button(label: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(label, action.to_string())
}

fn nav_row(
    window: PageWindow,
    to_page: impl Fn(usize) -> CallbackAction,
) -> Vec<InlineKeyboardButton> {
    let mut row = Vec::with_capacity(3);
    if window.has_prev() {
        row.push(button("⬅ Prev", to_page(window.page - 1)));
    }
    row.push(button(
        format!("Page {}/{}", window.page + 1, window.pages),
        CallbackAction::Noop,
    ));
    if window.has_next() {
        row.push(button("Next ➡", to_page(window.page + 1)));
    }
    row
}

/// Paginated category menu of a session
#[must_use]
pub fn category_keyboard(session: &Session) -> InlineKeyboardMarkup {
    let window = PageWindow::new(session.categories.len(), session.category_page, PAGE_SIZE);
    let mut rows: Vec<Vec<InlineKeyboardButton>> = session.categories[window.start..window.end]
        .iter()
        .enumerate()
        .map(|(offset, category)| {
            vec![button(
                button_label(category),
                CallbackAction::Category {
                    rev: session.menu_rev,
                    page: window.page,
                    index: window.start + offset,
                },
            )]
        })
        .collect();
    rows.push(nav_row(window, CallbackAction::CategoryPage));
    InlineKeyboardMarkup::new(rows)
}

/// Paginated filter menu of a session, with a way back to the categories
#[must_use]
pub fn filter_keyboard(session: &Session) -> InlineKeyboardMarkup {
    let window = PageWindow::new(session.filters.len(), session.filter_page, PAGE_SIZE);
    let mut rows: Vec<Vec<InlineKeyboardButton>> = session.filters[window.start..window.end]
        .iter()
        .enumerate()
        .map(|(offset, preset)| {
            vec![button(
                button_label(display_name(preset)),
                CallbackAction::Filter {
                    rev: session.menu_rev,
                    page: window.page,
                    index: window.start + offset,
                },
            )]
        })
        .collect();
    rows.push(nav_row(window, CallbackAction::FilterPage));
    rows.push(vec![button(
        "⬅ Categories",
        CallbackAction::Categories(session.category_page),
    )]);
    InlineKeyboardMarkup::new(rows)
}

/// One row with every intensity for the selection at `rev`
#[must_use]
pub fn intensity_keyboard(rev: u32) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![Intensity::ALL
        .iter()
        .map(|&intensity| {
            button(
                intensity.to_string(),
                CallbackAction::Intensity { rev, intensity },
            )
        })
        .collect::<Vec<_>>()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use teloxide::types::InlineKeyboardButtonKind;

    fn payloads(markup: &InlineKeyboardMarkup) -> Vec<Vec<String>> {
        markup
            .inline_keyboard
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| match &b.kind {
                        InlineKeyboardButtonKind::CallbackData(data) => data.clone(),
                        other => format!("{other:?}"),
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn long_labels_keep_their_tail() {
        let long = "x".repeat(10) + &"y".repeat(43);
        let label = button_label(&long);
        assert_eq!(label.chars().count(), 44);
        assert_eq!(label, format!("…{}", "y".repeat(43)));
        assert_eq!(button_label("short"), "short");
    }

    #[test]
    fn category_keyboard_paginates_with_absolute_indices() {
        let categories: Vec<String> = (0..14).map(|i| format!("cat{i:02}")).collect();
        let mut session = Session::for_input(PathBuf::from("in.jpg"), categories, vec![]);
        session.category_page = 1;
        session.menu_rev = 4;

        let rows = payloads(&category_keyboard(&session));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], ["cat|4|1|12"]);
        assert_eq!(rows[1], ["cat|4|1|13"]);
        assert_eq!(rows[2], ["catpage|0", "noop"]);
    }

    #[test]
    fn filter_keyboard_links_back_to_category_page() {
        let mut session = Session::for_input(
            PathBuf::from("in.jpg"),
            vec!["All".into()],
            vec!["A/film1.cube".into()],
        );
        session.category_page = 0;
        session.menu_rev = 9;

        let markup = filter_keyboard(&session);
        assert_eq!(markup.inline_keyboard[0][0].text, "A/film1");
        let rows = payloads(&markup);
        assert_eq!(rows, [vec!["lut|9|0|0"], vec!["noop"], vec!["cats|0"]]);
    }

    #[test]
    fn intensity_row_covers_all_values() {
        let rows = payloads(&intensity_keyboard(2));
        assert_eq!(
            rows,
            [["int|2|0.25", "int|2|0.50", "int|2|0.75", "int|2|1.00"]]
        );
    }

    #[test]
    fn premium_text_shows_expiry_date() {
        let until = DateTime::from_timestamp(1_900_000_000, 0).expect("valid timestamp");
        assert_eq!(premium_active_text(until), "Premium active until 2030-03-17 ✅");
    }

    #[test]
    fn usage_text_distinguishes_premium() {
        let free = UsageReport {
            premium: false,
            used: 2,
            limit: 5,
        };
        assert_eq!(usage_text(&free), "Free exports today: 2/5\nUpgrade: /premium");
        let premium = UsageReport {
            premium: true,
            ..free
        };
        assert!(usage_text(&premium).starts_with("⭐ Premium"));
    }
}
