use crate::error::StoreError;
use crate::types::{dedup_key, WebhookEvent};
use chrono::{SubsecRound, Utc};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const EVENTS_FILE: &str = "events.jsonl";
pub const INDEX_FILE: &str = "events_index.json";

type DuplicateIndex = HashMap<String, bool>;

/// Append-only log of accepted webhook deliveries plus a duplicate index.
///
/// The log is the source of truth. The index snapshot is rebuilt from it on
/// open and rewritten in full whenever an event is accepted.
pub struct EventStore {
    events_path: PathBuf,
    index_path: PathBuf,
    index: Mutex<DuplicateIndex>,
}

impl EventStore {
    pub fn open(
        events_path: impl Into<PathBuf>,
        index_path: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let events_path = events_path.into();
        let index_path = index_path.into();
        ensure_parent(&events_path)?;
        ensure_parent(&index_path)?;

        let index: DuplicateIndex = read_log(&events_path)?
            .iter()
            .map(|event| (event.dedup_key(), true))
            .collect();

        if load_snapshot(&index_path).as_ref() != Some(&index) {
            info!(
                path = %index_path.display(),
                keys = index.len(),
                "rebuilding duplicate index from event log"
            );
            write_snapshot(&index_path, &index)?;
        }

        Ok(Self {
            events_path,
            index_path,
            index: Mutex::new(index),
        })
    }

    /// Open `events.jsonl` / `events_index.json` inside `data_dir`.
    pub fn in_dir(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = data_dir.as_ref();
        Self::open(dir.join(EVENTS_FILE), dir.join(INDEX_FILE))
    }

    /// Record a delivery unless its (delivery id, action) pair was seen before.
    /// Returns whether the event was accepted.
    pub fn store_event(
        &self,
        delivery_id: &str,
        event_type: &str,
        action: &str,
        issue_number: Option<u64>,
    ) -> Result<bool, StoreError> {
        let key = dedup_key(delivery_id, action);
        let mut index = self.lock();
        if index.contains_key(&key) {
            debug!(delivery_id, action, "duplicate delivery ignored");
            return Ok(false);
        }

        let event = WebhookEvent {
            delivery_id: delivery_id.to_string(),
            event_type: event_type.to_string(),
            action: action.to_string(),
            issue_number,
            timestamp: Utc::now().trunc_subsecs(0),
        };
        self.append(&event)?;

        // The record is durable; from here on the key must read as seen even
        // if the snapshot write fails. Open reconciles the snapshot.
        index.insert(key, true);
        write_snapshot(&self.index_path, &index)?;

        info!(delivery_id, event = event_type, action, "webhook event stored");
        Ok(true)
    }

    /// Most recent events first, at most `limit` of them.
    pub fn read_events(&self, limit: usize) -> Result<Vec<WebhookEvent>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // Hold the lock so a concurrent append is never read half-written.
        let _index = self.lock();
        let mut events = read_log(&self.events_path)?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&self, event: &WebhookEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let write_err = |source| StoreError::Write {
            path: self.events_path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.events_path)
            .map_err(write_err)?;
        let len = file.metadata().map_err(write_err)?.len();

        // A torn record from an earlier failed write must not swallow this one.
        if !ends_with_newline(&mut file, len).map_err(write_err)? {
            warn!(path = %self.events_path.display(), "event log ends mid-record; terminating it");
            line.insert(0, b'\n');
        }

        if let Err(source) = file.write_all(&line).and_then(|()| file.sync_data()) {
            // Drop whatever part of the record made it to disk.
            if let Err(e) = file.set_len(len) {
                warn!(path = %self.events_path.display(), error = %e, "failed to roll back partial append");
            }
            return Err(write_err(source));
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, DuplicateIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|source| StoreError::Write {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

fn ends_with_newline(file: &mut fs::File, len: u64) -> std::io::Result<bool> {
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Every well-formed record in append order. Torn or garbled lines are
/// logged and skipped.
fn read_log(path: &Path) -> Result<Vec<WebhookEvent>, StoreError> {
    let read_err = |source| StoreError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_err(e)),
    };

    let mut events = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(read_err)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WebhookEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(
                path = %path.display(),
                line = lineno + 1,
                error = %e,
                "skipping malformed event record"
            ),
        }
    }
    Ok(events)
}

fn load_snapshot(path: &Path) -> Option<DuplicateIndex> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(index) => Some(index),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "duplicate index snapshot is corrupt");
            None
        }
    }
}

/// Rewrite the whole snapshot via a temp file and rename.
fn write_snapshot(path: &Path, index: &DuplicateIndex) -> Result<(), StoreError> {
    let content = serde_json::to_vec(index)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|source| StoreError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}
