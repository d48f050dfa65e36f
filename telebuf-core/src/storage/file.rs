//! Rotating on-disk envelope storage
//!
//! Each generation of unsynced envelopes lives in one file named
//! `zg<millis>` inside the storage directory, one envelope per line and at
//! most [`MAX_LINES_PER_FILE`] lines per file.
//!
//! A delivery cycle consumes exactly one file: `load` reads the oldest
//! file into the working set, `sync` writes whatever was not delivered into
//! fresh files and only then deletes the consumed one. A crash anywhere in
//! between leaves the consumed file in place, so envelopes may be sent twice
//! but are never dropped.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::{retained_after_eviction, DataStorage};
use crate::error::{Error, Result};

/// File name prefix for storage files
pub const FILE_PREFIX: &str = "zg";

/// Maximum envelopes written to one storage file
pub const MAX_LINES_PER_FILE: usize = 1000;

/// A storage file at rest, ordered by its timestamp token
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct DataFile {
    token: i64,
    path: PathBuf,
}

/// Envelope storage backed by a directory of rotating files
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    capacity: usize,
    /// Working set: envelopes saved this cycle plus the consumed file's lines
    buffer: VecDeque<String>,
    /// File read by the current cycle, deleted once the remainder is persisted
    consumed: Option<PathBuf>,
    /// Lines read from `consumed`; they lead the working set until synced
    consumed_lines: Vec<String>,
    /// Whether `load` already ran this cycle
    loaded: bool,
    /// Highest token handed out, so new names never collide
    last_token: i64,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory
    pub fn open(dir: impl AsRef<Path>, capacity: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| {
            Error::Storage(format!(
                "failed to create storage dir {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut storage = Self {
            dir,
            capacity: capacity.max(1),
            buffer: VecDeque::new(),
            consumed: None,
            consumed_lines: Vec::new(),
            loaded: false,
            last_token: 0,
        };
        storage.last_token = storage
            .list_files()?
            .last()
            .map(|f| f.token)
            .unwrap_or(0);

        Ok(storage)
    }

    /// Storage files at rest, oldest first
    fn list_files(&self) -> Result<Vec<DataFile>> {
        let pattern = format!(
            "{}/{}*",
            glob::Pattern::escape(&self.dir.to_string_lossy()),
            FILE_PREFIX
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Storage(format!("invalid storage pattern: {}", e)))?;

        let mut files: Vec<DataFile> = entries
            .flatten()
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let token = parse_token(path.file_name()?.to_str()?)?;
                Some(DataFile { token, path })
            })
            .collect();
        files.sort();
        Ok(files)
    }

    /// Files at rest other than the one consumed this cycle, with line counts
    fn files_at_rest(&self) -> Vec<(DataFile, usize)> {
        let files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list storage files");
                return Vec::new();
            }
        };

        files
            .into_iter()
            .filter(|f| self.consumed.as_deref() != Some(f.path.as_path()))
            .filter_map(|f| match read_lines(&f.path) {
                Ok(lines) => Some((f, lines.len())),
                Err(e) => {
                    tracing::warn!(file = %f.path.display(), error = %e, "Failed to read storage file");
                    None
                }
            })
            .collect()
    }

    /// Fresh, strictly increasing file token
    fn next_token(&mut self) -> i64 {
        let token = Utc::now().timestamp_millis().max(self.last_token + 1);
        self.last_token = token;
        token
    }

    fn next_path(&mut self) -> PathBuf {
        let token = self.next_token();
        self.dir.join(format!("{}{}", FILE_PREFIX, token))
    }

    /// Working-set entries that still come from the consumed file.
    ///
    /// Delivery only removes entries, so the survivors are the longest
    /// prefix of the working set that is a subsequence of the file's lines.
    fn consumed_in_buffer(&self) -> usize {
        let mut lines = self.consumed_lines.iter();
        self.buffer
            .iter()
            .take_while(|entry| lines.any(|line| line == *entry))
            .count()
    }

    /// Drop the oldest envelopes once everything held reaches capacity.
    ///
    /// Age order is the consumed file's lines, then files at rest oldest
    /// first (a partial file when only some of it must go), then whatever
    /// was saved since the last sync.
    fn enforce_capacity(&mut self) {
        let at_rest = self.files_at_rest();
        let total = at_rest.iter().map(|(_, n)| n).sum::<usize>() + self.buffer.len();
        if total < self.capacity {
            return;
        }

        let keep = retained_after_eviction(self.capacity);
        let mut excess = total - keep;
        let removed = excess;

        let oldest = self.consumed_in_buffer().min(excess);
        self.buffer.drain(..oldest);
        excess -= oldest;

        for (file, count) in at_rest {
            if excess == 0 {
                break;
            }
            if count <= excess {
                match fs::remove_file(&file.path) {
                    Ok(()) => excess -= count,
                    Err(e) => {
                        tracing::warn!(file = %file.path.display(), error = %e, "Failed to evict storage file");
                    }
                }
            } else {
                let trimmed = read_lines(&file.path).and_then(|lines| {
                    let kept: Vec<&str> = lines[excess..].iter().map(String::as_str).collect();
                    write_lines(&file.path, &kept)
                });
                match trimmed {
                    Ok(()) => excess = 0,
                    Err(e) => {
                        tracing::warn!(file = %file.path.display(), error = %e, "Failed to trim storage file");
                    }
                }
            }
        }

        if excess > 0 {
            let n = excess.min(self.buffer.len());
            self.buffer.drain(..n);
            excess -= n;
        }

        tracing::warn!(
            removed = removed - excess,
            kept = keep,
            capacity = self.capacity,
            "Storage full, evicted oldest envelopes"
        );
    }
}

impl DataStorage for FileStorage {
    fn save(&mut self, envelope: String) {
        self.buffer.push_back(envelope);
    }

    fn load(&mut self) -> &mut VecDeque<String> {
        if self.loaded {
            return &mut self.buffer;
        }
        self.loaded = true;

        let files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list storage files");
                return &mut self.buffer;
            }
        };

        if files.is_empty() {
            tracing::trace!(dir = %self.dir.display(), "No storage files to load");
        }

        for file in files {
            match read_lines(&file.path) {
                Ok(lines) => {
                    tracing::debug!(
                        file = %file.path.display(),
                        envelopes = lines.len(),
                        "Loaded storage file"
                    );
                    // Older than anything saved this cycle
                    for line in lines.iter().rev() {
                        self.buffer.push_front(line.clone());
                    }
                    self.consumed = Some(file.path);
                    self.consumed_lines = lines;
                    break;
                }
                Err(e) => {
                    tracing::warn!(file = %file.path.display(), error = %e, "Failed to read storage file");
                }
            }
        }

        &mut self.buffer
    }

    fn sync(&mut self) -> Result<()> {
        self.enforce_capacity();

        while !self.buffer.is_empty() {
            let take = self.buffer.len().min(MAX_LINES_PER_FILE);
            let path = self.next_path();
            let chunk: Vec<&str> = self.buffer.iter().take(take).map(String::as_str).collect();
            match write_lines(&path, &chunk) {
                Ok(()) => {
                    tracing::debug!(file = %path.display(), envelopes = take, "Wrote storage file");
                    self.buffer.drain(..take);
                }
                Err(e) => {
                    // Keep the consumed file and the unwritten remainder for the next sync
                    return Err(Error::Storage(format!(
                        "failed to write storage file in {}: {}",
                        self.dir.display(),
                        e
                    )));
                }
            }
        }

        self.consumed_lines.clear();
        if let Some(path) = self.consumed.take() {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!(file = %path.display(), "Deleted consumed storage file"),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Failed to delete consumed storage file");
                }
            }
        }
        self.loaded = false;

        Ok(())
    }

    fn pending_count(&self) -> usize {
        let at_rest: usize = self.files_at_rest().iter().map(|(_, n)| n).sum();
        at_rest + self.buffer.len()
    }
}

fn parse_token(file_name: &str) -> Option<i64> {
    let digits = file_name.strip_prefix(FILE_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn write_lines(path: &Path, lines: &[&str]) -> io::Result<()> {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path, content)
}

fn read_lines(path: &Path) -> io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}
