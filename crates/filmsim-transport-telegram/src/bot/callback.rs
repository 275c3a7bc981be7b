//! Inline button payload codec
//!
//! Payloads are `|`-separated and stay well below Telegram's 64 byte limit:
//! list entries are referenced by their index in the user's session instead
//! of by name. Picks carry the revision of the list they were rendered from,
//! so a button of an outdated menu is refused instead of picking whatever now
//! sits at that index.

use filmsim_core::jobs::Intensity;
use std::fmt;

/// Decoded inline button payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Page indicator, does nothing
    Noop,
    /// `catpage|n`: show category page `n`
    CategoryPage(usize),
    /// `cat|rev|page|index`: pick a category
    Category {
        /// Menu revision the button was rendered with
        rev: u32,
        /// Category page the button was on
        page: usize,
        /// Index into the session's category list
        index: usize,
    },
    /// `page|n`: show filter page `n`
    FilterPage(usize),
    /// `lut|rev|page|index`: pick a filter
    Filter {
        /// Menu revision the button was rendered with
        rev: u32,
        /// Filter page the button was on
        page: usize,
        /// Index into the session's filter list
        index: usize,
    },
    /// `cats|page`: back to the category menu
    Categories(usize),
    /// `int|rev|0.75`: run the selected filter at this intensity
    Intensity {
        /// Selection revision the button was rendered with
        rev: u32,
        /// Chosen intensity
        intensity: Intensity,
    },
}

impl CallbackAction {
    /// Decode a payload; `None` for anything unrecognised
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        if data == "noop" {
            return Some(Self::Noop);
        }
        let (tag, rest) = data.split_once('|')?;
        match tag {
            "catpage" => rest.parse().ok().map(Self::CategoryPage),
            "page" => rest.parse().ok().map(Self::FilterPage),
            "cats" => rest.parse().ok().map(Self::Categories),
            "cat" => parse_pick(rest).map(|(rev, page, index)| Self::Category { rev, page, index }),
            "lut" => parse_pick(rest).map(|(rev, page, index)| Self::Filter { rev, page, index }),
            "int" => {
                let (rev, intensity) = rest.split_once('|')?;
                Some(Self::Intensity {
                    rev: rev.parse().ok()?,
                    intensity: intensity.parse().ok()?,
                })
            }
            _ => None,
        }
    }
}

fn parse_pick(rest: &str) -> Option<(u32, usize, usize)> {
    let mut parts = rest.split('|');
    let pick = (
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
        parts.next()?.parse().ok()?,
    );
    parts.next().is_none().then_some(pick)
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noop => f.write_str("noop"),
            Self::CategoryPage(page) => write!(f, "catpage|{page}"),
            Self::Category { rev, page, index } => write!(f, "cat|{rev}|{page}|{index}"),
            Self::FilterPage(page) => write!(f, "page|{page}"),
            Self::Filter { rev, page, index } => write!(f, "lut|{rev}|{page}|{index}"),
            Self::Categories(page) => write!(f, "cats|{page}"),
            Self::Intensity { rev, intensity } => write!(f, "int|{rev}|{intensity}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_payloads() {
        assert_eq!(CallbackAction::parse("noop"), Some(CallbackAction::Noop));
        assert_eq!(
            CallbackAction::parse("cat|7|1|14"),
            Some(CallbackAction::Category {
                rev: 7,
                page: 1,
                index: 14
            })
        );
        assert_eq!(
            CallbackAction::parse("cats|2"),
            Some(CallbackAction::Categories(2))
        );
        assert_eq!(
            CallbackAction::parse("int|3|0.75").map(|a| a.to_string()),
            Some("int|3|0.75".to_string())
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        for data in [
            "",
            "noop|1",
            "page|",
            "page|-1",
            "lut|1",
            "lut|1|2",
            "lut|a|b|c",
            "lut|1|2|3|4",
            "int|0.75",
            "int|2|0.3",
            "zoom|1",
        ] {
            assert_eq!(CallbackAction::parse(data), None, "{data}");
        }
    }
}
