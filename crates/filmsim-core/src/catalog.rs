//! Preset (LUT) catalog
//!
//! Presets are `.cube` files below a configured root. A preset is identified
//! by its root-relative, `/`-separated path; the first path segment is its
//! category. Identifiers coming back from chat callbacks are untrusted and are
//! only turned into filesystem paths through [`PresetCatalog::resolve`].

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Pseudo-category listing every preset
pub const CATEGORY_ALL: &str = "All";
/// Pseudo-category for presets placed directly in the root
pub const CATEGORY_UNCATEGORIZED: &str = "Uncategorized";
/// File extension of preset files (compared case-insensitively)
pub const PRESET_EXTENSION: &str = "cube";

/// Errors that can occur while browsing or resolving presets
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The preset does not exist
    #[error("Preset not found: {0}")]
    NotFound(String),
    /// The reference points outside the presets root
    #[error("Invalid preset path: {0}")]
    OutsideRoot(String),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// Whether the error means "this preset cannot be used" rather than an I/O fault
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::OutsideRoot(_))
    }
}

/// Filesystem-backed preset catalog
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    root: PathBuf,
}

impl PresetCatalog {
    /// Create a catalog rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Presets root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every preset identifier, sorted.
    ///
    /// A missing root yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory below the root cannot be read.
    pub async fn list_presets(&self) -> Result<Vec<String>, CatalogError> {
        let mut presets = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound && dir == self.root => {
                    warn!(root = %self.root.display(), "Presets root does not exist");
                    return Ok(presets);
                }
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if has_preset_extension(&path) {
                    if let Some(id) = self.relative_id(&path) {
                        presets.push(id);
                    }
                }
            }
        }

        presets.sort();
        debug!(count = presets.len(), "Presets listed");
        Ok(presets)
    }

    /// List categories: "All" first, then the sorted category names.
    ///
    /// # Errors
    ///
    /// Returns an error if the presets cannot be listed.
    pub async fn list_categories(&self) -> Result<Vec<String>, CatalogError> {
        Ok(categories_of(&self.list_presets().await?))
    }

    /// List the presets of one category.
    ///
    /// # Errors
    ///
    /// Returns an error if the presets cannot be listed.
    pub async fn list_by_category(&self, category: &str) -> Result<Vec<String>, CatalogError> {
        Ok(filter_by_category(&self.list_presets().await?, category))
    }

    /// Resolve a preset identifier to an absolute path inside the root.
    ///
    /// Rejects absolute references, references whose `..` segments climb above
    /// the root, and references that only escape through symlinks.
    ///
    /// # Errors
    ///
    /// Returns `OutsideRoot` for escaping references and `NotFound` when the
    /// preset file does not exist.
    pub async fn resolve(&self, preset_id: &str) -> Result<PathBuf, CatalogError> {
        let rel = preset_id.replace('\\', "/");
        if rel.is_empty() {
            return Err(CatalogError::NotFound(preset_id.to_string()));
        }
        if escapes_lexically(Path::new(&rel)) {
            return Err(CatalogError::OutsideRoot(preset_id.to_string()));
        }

        let root = canonicalize_or_not_found(&self.root, preset_id).await?;
        let resolved = canonicalize_or_not_found(&root.join(&rel), preset_id).await?;

        if resolved == root || !resolved.starts_with(&root) {
            return Err(CatalogError::OutsideRoot(preset_id.to_string()));
        }
        if !tokio::fs::metadata(&resolved).await?.is_file() {
            return Err(CatalogError::NotFound(preset_id.to_string()));
        }
        Ok(resolved)
    }

    fn relative_id(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

async fn canonicalize_or_not_found(path: &Path, preset_id: &str) -> Result<PathBuf, CatalogError> {
    match tokio::fs::canonicalize(path).await {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(CatalogError::NotFound(preset_id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

fn has_preset_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(PRESET_EXTENSION))
}

fn escapes_lexically(rel: &Path) -> bool {
    let mut depth: usize = 0;
    for component in rel.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return true;
                }
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return true,
        }
    }
    false
}

/// Derive the category list from preset identifiers.
#[must_use]
pub fn categories_of(presets: &[String]) -> Vec<String> {
    let mut categories: Vec<String> = presets
        .iter()
        .map(|id| match id.split_once('/') {
            Some((category, _)) => category.to_string(),
            None => CATEGORY_UNCATEGORIZED.to_string(),
        })
        .collect();
    categories.sort();
    categories.dedup();

    let mut out = Vec::with_capacity(categories.len() + 1);
    out.push(CATEGORY_ALL.to_string());
    out.extend(categories);
    out
}

/// Filter preset identifiers down to one category.
#[must_use]
pub fn filter_by_category(presets: &[String], category: &str) -> Vec<String> {
    match category {
        CATEGORY_ALL => presets.to_vec(),
        CATEGORY_UNCATEGORIZED => presets
            .iter()
            .filter(|id| !id.contains('/'))
            .cloned()
            .collect(),
        _ => {
            let prefix = format!("{}/", category.trim_end_matches('/'));
            presets
                .iter()
                .filter(|id| id.starts_with(&prefix))
                .cloned()
                .collect()
        }
    }
}

/// Preset name without the `.cube` suffix
#[must_use]
pub fn display_name(preset_id: &str) -> &str {
    let suffix_len = PRESET_EXTENSION.len() + 1;
    if preset_id.len() > suffix_len && preset_id.is_char_boundary(preset_id.len() - suffix_len) {
        let (stem, ext) = preset_id.split_at(preset_id.len() - suffix_len);
        if ext.eq_ignore_ascii_case(".cube") {
            return stem;
        }
    }
    preset_id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn categories_put_all_first_and_add_uncategorized() {
        let presets = ids(&["b/x.cube", "a/y.cube", "root.cube", "a/z.cube"]);
        assert_eq!(
            categories_of(&presets),
            ids(&["All", "Uncategorized", "a", "b"])
        );
    }

    #[test]
    fn categories_of_empty_catalog_is_only_all() {
        assert_eq!(categories_of(&[]), ids(&["All"]));
    }

    #[test]
    fn filter_by_category_matches_prefix_only() {
        let presets = ids(&["a/x.cube", "ab/y.cube", "root.cube"]);
        assert_eq!(filter_by_category(&presets, "a"), ids(&["a/x.cube"]));
        assert_eq!(
            filter_by_category(&presets, CATEGORY_UNCATEGORIZED),
            ids(&["root.cube"])
        );
        assert_eq!(filter_by_category(&presets, CATEGORY_ALL), presets);
    }

    #[test]
    fn display_name_strips_extension_case_insensitively() {
        assert_eq!(display_name("A/film1.cube"), "A/film1");
        assert_eq!(display_name("A/film1.CUBE"), "A/film1");
        assert_eq!(display_name("notes.txt"), "notes.txt");
        assert_eq!(display_name(".cube"), ".cube");
    }

    #[test]
    fn lexical_escape_detection() {
        assert!(escapes_lexically(Path::new("../secret.cube")));
        assert!(escapes_lexically(Path::new("A/../../secret.cube")));
        assert!(escapes_lexically(Path::new("/etc/passwd")));
        assert!(!escapes_lexically(Path::new("A/../A/film1.cube")));
        assert!(!escapes_lexically(Path::new("./A/film1.cube")));
    }
}
