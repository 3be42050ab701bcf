//! Document loading: walks a content tree and produces source documents.
//!
//! One physical markdown file may bundle several logically distinct
//! documents behind an explicit separator line; the loader splits those
//! into separate [`SourceDocument`]s. A file that cannot be decoded is
//! skipped and reported, never aborting the run.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::document::SourceDocument;
use crate::error::{Result, RetrievalError};
use crate::structure;

/// The delimiter line separating related documents bundled in one file.
/// An HTML comment, so it renders invisibly in markdown viewers.
pub const RELATED_DOC_SEPARATOR: &str = "<!-- related -->";

/// Optional YAML front matter carried by content files.
#[derive(Debug, Default, Deserialize)]
struct FrontMatter {
    category: Option<String>,
    source: Option<String>,
    last_updated: Option<NaiveDate>,
}

/// What a load pass produced.
#[derive(Debug, Default)]
pub struct LoadOutput {
    /// The documents, in path order. Downstream stages must not depend
    /// on this order.
    pub documents: Vec<SourceDocument>,
    /// Files that could not be loaded, with the reason each was skipped.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Loads source documents from a content root directory.
///
/// Re-runnable from scratch: each run rebuilds every document from the
/// files currently on disk.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    root: PathBuf,
}

impl DocumentLoader {
    /// Create a loader over `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Load every markdown document under the root.
    ///
    /// Files that cannot be decoded are skipped and reported in the
    /// output; only a missing or unreadable root is an error.
    pub fn load(&self) -> Result<LoadOutput> {
        if !self.root.is_dir() {
            return Err(RetrievalError::Load {
                path: self.root.clone(),
                message: "content root is not a directory".to_string(),
            });
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "md"))
            .map(|entry| entry.into_path())
            .collect();
        files.sort();

        let mut output = LoadOutput::default();
        for path in files {
            match self.load_file(&path) {
                Ok(documents) => output.documents.extend(documents),
                Err(RetrievalError::Load { path, message }) => {
                    warn!(path = %path.display(), %message, "skipping file");
                    output.skipped.push((path, message));
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping file");
                    output.skipped.push((path, e.to_string()));
                }
            }
        }
        info!(
            documents = output.documents.len(),
            skipped = output.skipped.len(),
            root = %self.root.display(),
            "content load complete"
        );
        Ok(output)
    }

    /// Load one file, splitting bundled related documents apart.
    fn load_file(&self, path: &Path) -> Result<Vec<SourceDocument>> {
        let bytes = std::fs::read(path).map_err(|e| RetrievalError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let text = String::from_utf8(bytes).map_err(|_| RetrievalError::Load {
            path: path.to_path_buf(),
            message: "file is not valid UTF-8".to_string(),
        })?;

        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let base_id = relative.to_string_lossy().replace('\\', "/");

        let (front, body) = split_front_matter(&text);
        let front = match front {
            Some(raw) => serde_yaml::from_str::<FrontMatter>(raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring malformed front matter");
                FrontMatter::default()
            }),
            None => FrontMatter::default(),
        };

        let category = front
            .category
            .unwrap_or_else(|| category_from_path(relative));
        let source = front.source.unwrap_or_default();

        let parts: Vec<&str> = body.split(RELATED_DOC_SEPARATOR).collect();
        let multiple = parts.len() > 1;
        // Positions are assigned before empty segments are dropped, so a
        // blank section never shifts the ids of the documents after it.
        let documents = parts
            .into_iter()
            .enumerate()
            .filter(|(_, part)| !part.trim().is_empty())
            .map(|(i, part)| SourceDocument {
                id: if multiple { format!("{base_id}#{i}") } else { base_id.clone() },
                text: part.trim_matches('\n').to_string(),
                language: structure::detect_language(part),
                category: category.clone(),
                source: source.clone(),
                last_updated: front.last_updated,
                path: path.to_path_buf(),
            })
            .collect();
        Ok(documents)
    }
}

/// Split optional `---`-delimited YAML front matter from the body.
fn split_front_matter(text: &str) -> (Option<&str>, &str) {
    let rest = match text.strip_prefix("---\n") {
        Some(rest) => rest,
        None => return (None, text),
    };
    match rest.split_once("\n---\n") {
        Some((front, body)) => (Some(front), body),
        None => match rest.strip_suffix("\n---") {
            Some(front) => (Some(front), ""),
            None => (None, text),
        },
    }
}

/// Derive a category from the first directory component under the root.
fn category_from_path(relative: &Path) -> String {
    let mut components = relative.components();
    let first = components.next();
    if components.next().is_some() {
        if let Some(std::path::Component::Normal(dir)) = first {
            return dir.to_string_lossy().to_string();
        }
    }
    "general".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::document::Language;

    #[test]
    fn loads_documents_with_category_from_directory() {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir_all(temp.path().join("preoperative")).unwrap();
        fs::write(
            temp.path().join("preoperative/fasting.md"),
            "# Fasting\nNo food after midnight.",
        )
        .unwrap();

        let output = DocumentLoader::new(temp.path()).load().unwrap();
        assert_eq!(output.documents.len(), 1);
        let doc = &output.documents[0];
        assert_eq!(doc.id, "preoperative/fasting.md");
        assert_eq!(doc.category, "preoperative");
        assert_eq!(doc.language, Language::En);
        assert!(output.skipped.is_empty());
    }

    #[test]
    fn front_matter_overrides_category_and_sets_provenance() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("note.md"),
            "---\ncategory: postoperative\nsource: SickKids IGT\nlast_updated: 2024-03-01\n---\n\
             Keep the dressing dry.",
        )
        .unwrap();

        let output = DocumentLoader::new(temp.path()).load().unwrap();
        let doc = &output.documents[0];
        assert_eq!(doc.category, "postoperative");
        assert_eq!(doc.source, "SickKids IGT");
        assert_eq!(doc.last_updated, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert!(!doc.text.contains("---"));
    }

    #[test]
    fn splits_bundled_related_documents() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("bundle.md"),
            format!("# First\nBody one.\n{RELATED_DOC_SEPARATOR}\n# Second\nBody two."),
        )
        .unwrap();

        let output = DocumentLoader::new(temp.path()).load().unwrap();
        assert_eq!(output.documents.len(), 2);
        assert_eq!(output.documents[0].id, "bundle.md#0");
        assert_eq!(output.documents[1].id, "bundle.md#1");
        assert!(output.documents[1].text.contains("Body two"));
        assert!(!output.documents[0].text.contains("Second"));
    }

    #[test]
    fn blank_bundle_section_does_not_shift_following_ids() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(
            temp.path().join("bundle.md"),
            format!(
                "# First\nBody one.\n{RELATED_DOC_SEPARATOR}\n\n{RELATED_DOC_SEPARATOR}\n\
                 # Third\nBody three."
            ),
        )
        .unwrap();

        let output = DocumentLoader::new(temp.path()).load().unwrap();
        assert_eq!(output.documents.len(), 2);
        assert_eq!(output.documents[0].id, "bundle.md#0");
        assert_eq!(output.documents[1].id, "bundle.md#2");
    }

    #[test]
    fn undecodable_file_is_skipped_not_fatal() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("good.md"), "# Fine\nText.").unwrap();
        fs::write(temp.path().join("broken.md"), [0xffu8, 0xfe, 0x00, 0x80]).unwrap();

        let output = DocumentLoader::new(temp.path()).load().unwrap();
        assert_eq!(output.documents.len(), 1);
        assert_eq!(output.skipped.len(), 1);
        assert!(output.skipped[0].0.ends_with("broken.md"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = DocumentLoader::new("/nonexistent/content").load().unwrap_err();
        assert!(matches!(err, RetrievalError::Load { .. }));
    }

    #[test]
    fn non_markdown_files_are_ignored() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("notes.txt"), "ignore me").unwrap();
        let output = DocumentLoader::new(temp.path()).load().unwrap();
        assert!(output.documents.is_empty());
        assert!(output.skipped.is_empty());
    }
}
