use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const MAX_CHANGES_PER_POLL: usize = 25;

/// Polling snapshot watcher. Each `poll` diffs mtimes against the previous
/// snapshot and reports a deduplicated, capped batch of changed paths; the
/// orchestrator only ever consumes that finite batch, never the polling
/// mechanism.
#[derive(Debug)]
pub struct FileWatcher {
    root: PathBuf,
    ignore_dirs: BTreeSet<String>,
    snapshot: BTreeMap<String, SystemTime>,
}

impl FileWatcher {
    pub fn new(root: &Path, ignore_dirs: impl IntoIterator<Item = String>) -> Self {
        let mut watcher = Self {
            root: root.to_path_buf(),
            ignore_dirs: ignore_dirs.into_iter().collect(),
            snapshot: BTreeMap::new(),
        };
        watcher.snapshot = watcher.scan();
        watcher
    }

    pub fn poll(&mut self) -> Vec<String> {
        let current = self.scan();
        let mut changes = Vec::new();

        for (path, mtime) in &current {
            match self.snapshot.get(path) {
                None => changes.push(format!("added: {path}")),
                Some(previous) if mtime > previous => changes.push(format!("modified: {path}")),
                Some(_) => {}
            }
        }
        for path in self.snapshot.keys() {
            if !current.contains_key(path) {
                changes.push(format!("deleted: {path}"));
            }
        }

        self.snapshot = current;
        changes.truncate(MAX_CHANGES_PER_POLL);
        changes
    }

    fn scan(&self) -> BTreeMap<String, SystemTime> {
        let mut snapshot = BTreeMap::new();
        self.scan_dir(&self.root, &mut snapshot);
        snapshot
    }

    fn scan_dir(&self, dir: &Path, snapshot: &mut BTreeMap<String, SystemTime>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if path.is_dir() {
                if name.starts_with('.') || self.ignore_dirs.contains(&name) {
                    continue;
                }
                self.scan_dir(&path, snapshot);
            } else if path.is_file() {
                let Ok(metadata) = entry.metadata() else {
                    continue;
                };
                let Ok(mtime) = metadata.modified() else {
                    continue;
                };
                let rel = path
                    .strip_prefix(&self.root)
                    .unwrap_or(&path)
                    .display()
                    .to_string();
                snapshot.insert(rel, mtime);
            }
        }
    }
}
