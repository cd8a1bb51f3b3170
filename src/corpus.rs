//! Corpus builder: note directories → chunks.
//!
//! Walks one directory per kind, keeps Markdown/plain-text files up to 1 MiB,
//! and chunks each with [`chunk_text`]. Results are memoized against the
//! modification times of the configured directories. A directory's mtime only
//! moves when entries are added, removed or renamed directly inside it, so an
//! in-place edit of an existing file is picked up on the next such change.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::chunk::chunk_text;
use crate::models::Chunk;

/// Files larger than this are skipped.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// Accepted file extensions (compared case-insensitively).
pub const TEXT_EXTENSIONS: &[&str] = &["md", "mdx", "markdown", "txt"];

/// A built corpus. Shared so that memoized builds hand back the same list.
pub type Corpus = Arc<Vec<Chunk>>;

struct CorpusMemo {
    key: String,
    dir_mtimes: BTreeMap<String, Option<SystemTime>>,
    chunks: Corpus,
}

/// Builds corpora and remembers the last one.
pub struct CorpusBuilder {
    max_chunk_chars: usize,
    memo: Mutex<Option<CorpusMemo>>,
    scans: AtomicUsize,
}

impl CorpusBuilder {
    pub fn new(max_chunk_chars: usize) -> Self {
        Self {
            max_chunk_chars,
            memo: Mutex::new(None),
            scans: AtomicUsize::new(0),
        }
    }

    /// Number of full filesystem scans performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// Build the corpus for `dirs_by_kind`, reusing the previous result when
    /// the directory set and every directory mtime are unchanged.
    ///
    /// Any mtime change rebuilds the whole set, since kinds can interleave
    /// across calls. Missing directories contribute no chunks.
    pub async fn build(&self, dirs_by_kind: &BTreeMap<String, PathBuf>) -> Result<Corpus> {
        let key = memo_key(dirs_by_kind, self.max_chunk_chars);
        let dir_mtimes = dir_mtimes(dirs_by_kind);

        if let Some(chunks) = self.lookup(&key, &dir_mtimes) {
            debug!(chunks = chunks.len(), "corpus memo hit");
            return Ok(chunks);
        }

        let dirs = dirs_by_kind.clone();
        let max_chars = self.max_chunk_chars;
        let chunks = tokio::task::spawn_blocking(move || build_chunks(&dirs, max_chars)).await?;
        let chunks: Corpus = Arc::new(chunks);
        self.scans.fetch_add(1, Ordering::Relaxed);

        debug!(chunks = chunks.len(), kinds = dirs_by_kind.len(), "corpus rebuilt");

        if let Ok(mut memo) = self.memo.lock() {
            *memo = Some(CorpusMemo {
                key,
                dir_mtimes,
                chunks: Arc::clone(&chunks),
            });
        }
        Ok(chunks)
    }

    /// Forget the memoized corpus.
    pub fn invalidate(&self) {
        if let Ok(mut memo) = self.memo.lock() {
            *memo = None;
        }
    }

    fn lookup(&self, key: &str, mtimes: &BTreeMap<String, Option<SystemTime>>) -> Option<Corpus> {
        let memo = self.memo.lock().ok()?;
        let memo = memo.as_ref()?;
        if memo.key == key && &memo.dir_mtimes == mtimes {
            Some(Arc::clone(&memo.chunks))
        } else {
            None
        }
    }
}

fn memo_key(dirs_by_kind: &BTreeMap<String, PathBuf>, max_chunk_chars: usize) -> String {
    let pairs: Vec<String> = dirs_by_kind
        .iter()
        .map(|(kind, dir)| format!("{}={}", kind, dir.display()))
        .collect();
    format!("{}|max={}", pairs.join("\n"), max_chunk_chars)
}

fn dir_mtimes(dirs_by_kind: &BTreeMap<String, PathBuf>) -> BTreeMap<String, Option<SystemTime>> {
    dirs_by_kind
        .iter()
        .map(|(kind, dir)| {
            let mtime = std::fs::metadata(dir).and_then(|m| m.modified()).ok();
            (kind.clone(), mtime)
        })
        .collect()
}

/// Scan every directory in kind order and chunk every accepted file.
pub fn build_chunks(dirs_by_kind: &BTreeMap<String, PathBuf>, max_chunk_chars: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for (kind, dir) in dirs_by_kind {
        chunks.extend(scan_dir(kind, dir, max_chunk_chars));
    }
    chunks
}

/// Chunk all accepted files under `dir`, in sorted path order.
pub fn scan_dir(kind: &str, dir: &Path, max_chunk_chars: usize) -> Vec<Chunk> {
    let root = match std::fs::canonicalize(dir) {
        Ok(root) if root.is_dir() => root,
        _ => {
            debug!(kind, dir = %dir.display(), "directory missing; contributing no chunks");
            return Vec::new();
        }
    };

    let mut chunks = Vec::new();
    let walker = WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(kind, error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_text_extension(entry.path()) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX);
        if size > MAX_FILE_BYTES {
            debug!(path = %entry.path().display(), size, "skipping oversized file");
            continue;
        }

        let body = match std::fs::read_to_string(entry.path()) {
            Ok(body) => body,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        for text in chunk_text(&body, max_chunk_chars) {
            chunks.push(Chunk::new(kind, entry.path(), text));
        }
    }
    chunks
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn has_text_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            TEXT_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}
