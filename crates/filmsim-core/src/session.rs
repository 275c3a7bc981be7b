//! Per-user selection state
//!
//! Sessions are in-memory only and live until cleared or the process exits.

use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::catalog::CATEGORY_ALL;
use crate::UserId;

/// Where a user is in the photo → category → filter → intensity wizard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// No uploaded photo
    NoInput,
    /// Browsing categories or a category's filters
    CategoryChosen,
    /// A filter is selected; an intensity pick submits a job
    FilterChosen,
}

/// Wizard state of one user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Most recently uploaded photo
    pub input_path: Option<PathBuf>,
    /// Categories shown in the category menu
    pub categories: Vec<String>,
    /// Currently selected category
    pub category: String,
    /// Current category menu page
    pub category_page: usize,
    /// Presets of the selected category
    pub filters: Vec<String>,
    /// Current filter menu page
    pub filter_page: usize,
    /// Selected preset, always a member of `filters`
    pub selected_filter: Option<String>,
    /// Revision of the category and filter lists. Menu buttons carry it so
    /// a tap on an outdated menu can be told apart from a current one.
    pub menu_rev: u32,
    /// Revision of `selected_filter`, carried by intensity buttons
    pub selection_rev: u32,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            input_path: None,
            categories: Vec::new(),
            category: CATEGORY_ALL.to_string(),
            category_page: 0,
            filters: Vec::new(),
            filter_page: 0,
            selected_filter: None,
            menu_rev: 0,
            selection_rev: 0,
        }
    }
}

impl Session {
    /// Fresh session for a newly uploaded photo
    #[must_use]
    pub fn for_input(input_path: PathBuf, categories: Vec<String>, presets: Vec<String>) -> Self {
        Self {
            input_path: Some(input_path),
            categories,
            filters: presets,
            ..Self::default()
        }
    }

    /// Current wizard stage
    #[must_use]
    pub fn stage(&self) -> SessionStage {
        if self.input_path.is_none() {
            SessionStage::NoInput
        } else if self.selected_filter.is_some() {
            SessionStage::FilterChosen
        } else {
            SessionStage::CategoryChosen
        }
    }

    /// Selected preset, provided it is still part of the filter list
    #[must_use]
    pub fn current_filter(&self) -> Option<&str> {
        self.selected_filter
            .as_deref()
            .filter(|selected| self.filters.iter().any(|f| f == selected))
    }
}

/// Visible slice of a paginated list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    /// Page after clamping into range
    pub page: usize,
    /// Total number of pages, at least one
    pub pages: usize,
    /// First visible index
    pub start: usize,
    /// One past the last visible index
    pub end: usize,
}

impl PageWindow {
    /// Compute the window for `page` over `total` items
    #[must_use]
    pub fn new(total: usize, page: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let pages = total.div_ceil(page_size).max(1);
        let page = page.min(pages - 1);
        let start = page * page_size;
        let end = total.min(start + page_size);
        Self {
            page,
            pages,
            start,
            end,
        }
    }

    /// Whether a previous page exists
    #[must_use]
    pub const fn has_prev(&self) -> bool {
        self.page > 0
    }

    /// Whether a next page exists
    #[must_use]
    pub const fn has_next(&self) -> bool {
        self.page + 1 < self.pages
    }
}

/// Sessions keyed by user id
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, Session>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a user's session
    pub async fn get(&self, user_id: UserId) -> Option<Session> {
        self.sessions.read().await.get(&user_id).cloned()
    }

    /// Replace a user's session
    pub async fn insert(&self, user_id: UserId, session: Session) {
        self.sessions.write().await.insert(user_id, session);
    }

    /// Mutate an existing session; `None` if the user has none
    pub async fn update<R>(&self, user_id: UserId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.write().await.get_mut(&user_id).map(f)
    }

    /// Mutate the session, creating an empty one first if needed
    pub async fn upsert<R>(&self, user_id: UserId, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut sessions = self.sessions.write().await;
        f(sessions.entry(user_id).or_default())
    }

    /// Drop a user's session
    pub async fn remove(&self, user_id: UserId) -> Option<Session> {
        self.sessions.write().await.remove(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_window_clamps_out_of_range_pages() {
        let window = PageWindow::new(25, 9, 12);
        assert_eq!(window.page, 2);
        assert_eq!(window.pages, 3);
        assert_eq!((window.start, window.end), (24, 25));
        assert!(window.has_prev());
        assert!(!window.has_next());
    }

    #[test]
    fn page_window_of_empty_list_has_one_page() {
        let window = PageWindow::new(0, 3, 12);
        assert_eq!(window.pages, 1);
        assert_eq!(window.page, 0);
        assert_eq!((window.start, window.end), (0, 0));
        assert!(!window.has_prev() && !window.has_next());
    }

    #[test]
    fn stage_follows_input_and_selection() {
        let mut session = Session::default();
        assert_eq!(session.stage(), SessionStage::NoInput);

        session = Session::for_input(PathBuf::from("in.jpg"), vec![], vec!["a.cube".into()]);
        assert_eq!(session.stage(), SessionStage::CategoryChosen);

        session.selected_filter = Some("a.cube".into());
        assert_eq!(session.stage(), SessionStage::FilterChosen);
        assert_eq!(session.current_filter(), Some("a.cube"));

        session.filters.clear();
        assert_eq!(session.current_filter(), None);
    }

    #[tokio::test]
    async fn update_only_touches_existing_sessions() {
        let store = SessionStore::new();
        assert!(store.update(1, |s| s.filter_page = 2).await.is_none());

        store.upsert(1, |s| s.filter_page = 2).await;
        assert_eq!(store.get(1).await.map(|s| s.filter_page), Some(2));

        assert!(store.remove(1).await.is_some());
        assert!(store.get(1).await.is_none());
    }
}
