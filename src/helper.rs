//! Housekeeping for notebooks: metadata reset and publish-status listing.

use crate::error::EsaPubError;
use crate::notebook::Notebook;
use crate::remote::PostId;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Remove the `esapub` metadata namespace from a notebook.
///
/// Returns `false` (and leaves the file untouched) when there was nothing
/// to remove.
pub fn reset_notebook(path: &Path) -> Result<bool, EsaPubError> {
    let mut notebook = Notebook::load(path)?;
    if !notebook.reset_esa_metadata() {
        info!("No esapub metadata in {}", path.display());
        return Ok(false);
    }
    notebook.save(path)?;
    info!("Metadata reset: {}", path.display());
    Ok(true)
}

/// One row of [`list_notebooks`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotebookStatus {
    pub name: String,
    pub path: PathBuf,
    /// `None` when never published (or unreadable metadata).
    pub number: Option<PostId>,
}

/// Every `.ipynb` directly inside `dir`, sorted by file name.
///
/// Notebooks that fail to parse are listed as unpublished with a warning.
pub fn list_notebooks(dir: &Path) -> Result<Vec<NotebookStatus>, EsaPubError> {
    if !dir.is_dir() {
        return Err(EsaPubError::FileNotFound {
            path: dir.to_path_buf(),
        });
    }
    let entries = std::fs::read_dir(dir).map_err(|e| EsaPubError::io(dir, e))?;

    let mut rows = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EsaPubError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("ipynb") {
            continue;
        }
        let number = match Notebook::load(&path) {
            Ok(nb) => nb.esa_metadata().ok().and_then(|m| m.post_info.number),
            Err(e) => {
                warn!("Skipping metadata of {}: {}", path.display(), e);
                None
            }
        };
        debug!("{} → {:?}", path.display(), number);
        rows.push(NotebookStatus {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path,
            number,
        });
    }
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(rows)
}

/// Plain-text table of post numbers and file names.
pub fn format_listing(rows: &[NotebookStatus]) -> String {
    let width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(0);
    let mut out = String::from(" post_number | filename \n");
    out.push_str(&format!("-------------|-{}\n", "-".repeat(width)));
    for row in rows {
        let number = row
            .number
            .as_ref()
            .map(|n| n.to_string())
            .unwrap_or_default();
        out.push_str(&format!("{number:>12} | {}\n", row.name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLISHED: &str = r#"{
 "cells": [],
 "metadata": {"esapub": {"post_info": {"number": 42, "name": "Done"}, "hashdict": {}}},
 "nbformat": 4,
 "nbformat_minor": 5
}
"#;

    const FRESH: &str = r#"{"cells": [], "metadata": {}, "nbformat": 4, "nbformat_minor": 5}"#;

    #[test]
    fn reset_removes_namespace_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.ipynb");
        std::fs::write(&path, PUBLISHED).unwrap();

        assert!(reset_notebook(&path).unwrap());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("esapub"));
        assert!(!reset_notebook(&path).unwrap());
    }

    #[test]
    fn listing_is_sorted_and_formatted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.ipynb"), PUBLISHED).unwrap();
        std::fs::write(dir.path().join("a.ipynb"), FRESH).unwrap();
        std::fs::write(dir.path().join("notes.md"), "# x").unwrap();

        let rows = list_notebooks(dir.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "a.ipynb");
        assert_eq!(rows[0].number, None);
        assert_eq!(rows[1].number, Some(PostId::Number(42)));

        let table = format_listing(&rows);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], " post_number | filename ");
        assert_eq!(lines[1], "-------------|--------");
        assert_eq!(lines[2], "             | a.ipynb");
        assert_eq!(lines[3], "          42 | b.ipynb");
    }

    #[test]
    fn listing_a_missing_dir_fails() {
        assert!(matches!(
            list_notebooks(Path::new("/definitely/not/here")),
            Err(EsaPubError::FileNotFound { .. })
        ));
    }
}
