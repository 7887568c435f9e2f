use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_RETRIEVE_LIMIT: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode note front matter: {0}")]
    FrontMatter(#[from] serde_yaml::Error),
    #[error("failed to encode memory index: {0}")]
    Index(#[from] serde_json::Error),
}

/// One retrievable summary of a finished run: what the task was, how it
/// ended, what it touched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonNote {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
    pub outcome: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct NoteMeta {
    #[serde(rename = "type")]
    kind: String,
    tags: Vec<String>,
    outcome: String,
    created: String,
}

/// Retrieval capability the orchestrator depends on. The keyword index is
/// one implementation; the core never assumes a particular ranking scheme.
pub trait MemoryRecall {
    fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, MemoryError>;
    fn store(&self, note: &LessonNote) -> Result<PathBuf, MemoryError>;
}

/// File-backed note store with a token index. Notes are markdown files with
/// YAML front matter under `lessons/`; `index.json` maps lowercase
/// alphanumeric tokens to the note files containing them. Append-only.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    base_dir: PathBuf,
}

type TokenIndex = BTreeMap<String, Vec<String>>;

impl MemoryStore {
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let base_dir = base_dir.into();
        let lessons = base_dir.join("lessons");
        fs::create_dir_all(&lessons).map_err(|e| io_error(&lessons, e))?;
        Ok(Self { base_dir })
    }

    fn index_path(&self) -> PathBuf {
        self.base_dir.join("index.json")
    }

    fn load_index(&self) -> TokenIndex {
        // A missing or corrupt index only degrades retrieval; it never
        // fails a run.
        fs::read_to_string(self.index_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_index(&self, index: &TokenIndex) -> Result<(), MemoryError> {
        let path = self.index_path();
        let body = serde_json::to_vec_pretty(index)?;
        fs::write(&path, body).map_err(|e| io_error(&path, e))
    }

    fn index_note(&self, rel_path: &str, content: &str) -> Result<(), MemoryError> {
        let mut index = self.load_index();
        for token in tokenize(content) {
            let entries = index.entry(token).or_default();
            if !entries.iter().any(|existing| existing == rel_path) {
                entries.push(rel_path.to_string());
            }
        }
        self.save_index(&index)
    }
}

impl MemoryRecall for MemoryStore {
    fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, MemoryError> {
        let index = self.load_index();
        let mut scores: BTreeMap<String, usize> = BTreeMap::new();
        for token in tokenize(query) {
            if let Some(paths) = index.get(&token) {
                for path in paths {
                    *scores.entry(path.clone()).or_default() += 1;
                }
            }
        }
        let mut ranked: Vec<(String, usize)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut notes = Vec::new();
        for (rel_path, _score) in ranked.into_iter().take(limit) {
            let path = self.base_dir.join(&rel_path);
            if let Ok(content) = fs::read_to_string(&path) {
                notes.push(content);
            }
        }
        Ok(notes)
    }

    fn store(&self, note: &LessonNote) -> Result<PathBuf, MemoryError> {
        let meta = NoteMeta {
            kind: "lesson".to_string(),
            tags: vec!["wisp".to_string(), "task".to_string()],
            outcome: note.outcome.clone(),
            created: note.timestamp.to_rfc3339(),
        };
        let front_matter = serde_yaml::to_string(&meta)?;
        let body = format!("---\n{front_matter}---\n\n{}\n", note.summary.trim());

        let rel_path = format!("lessons/{}.md", note.task_id);
        let path = self.base_dir.join(&rel_path);
        fs::write(&path, &body).map_err(|e| io_error(&path, e))?;
        self.index_note(&rel_path, &body)?;
        Ok(path)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            current.push(ch.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn io_error(path: &Path, source: std::io::Error) -> MemoryError {
    MemoryError::Io {
        path: path.display().to_string(),
        source,
    }
}
