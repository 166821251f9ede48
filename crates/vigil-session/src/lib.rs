// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only JSONL persistence for agent conversation sessions.
//!
//! Layout under the store's base directory:
//!
//! ```text
//! base_dir/
//!     _sessions.jsonl     index: one JSON line per session header (no turns)
//!     {session_id}.jsonl  per-session file: header line, then one line per turn
//! ```
//!
//! Writers to a given path are serialized by a registry of per-path mutexes;
//! operations touching more than one path (e.g. `close`) lock all of them in
//! sorted order to avoid deadlocking against a concurrent multi-path writer.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const INDEX_FILE: &str = "_sessions.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("session lock poisoned")]
    LockPoisoned,
}

/// A single conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

fn default_metadata() -> Value {
    Value::Object(Default::default())
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: default_metadata(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// An agent conversation session. `turns` is populated only by `load`; the
/// index and on-disk header never carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "new_session_id")]
    pub id: String,
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default = "Utc::now")]
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub ended: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub turns: Vec<Turn>,
    #[serde(default = "default_metadata")]
    pub metadata: Value,
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl Default for Session {
    fn default() -> Self {
        Self {
            id: new_session_id(),
            agent_name: String::new(),
            channel: String::new(),
            started: Utc::now(),
            ended: None,
            turns: Vec::new(),
            metadata: default_metadata(),
        }
    }
}

impl Session {
    pub fn new(agent_name: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            channel: channel.into(),
            ..Default::default()
        }
    }
}

/// Filters applied by [`SessionStore::list`]. Operates over the index file
/// only — turns are never loaded for a listing.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub agent_name: Option<String>,
    pub channel: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

const DEFAULT_LIST_LIMIT: usize = 50;

/// Storage backend for agent sessions.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: &Session) -> Result<(), SessionError>;
    fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<(), SessionError>;
    fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError>;
    fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, SessionError>;
    fn close(&self, session_id: &str) -> Result<(), SessionError>;
}

/// Append-only JSONL file store.
pub struct JsonlSessionStore {
    base: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonlSessionStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let base = base_dir.into();
        fs::create_dir_all(&base)?;
        Ok(Self { base, locks: Mutex::new(HashMap::new()) })
    }

    fn index_path(&self) -> PathBuf {
        self.base.join(INDEX_FILE)
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.base.join(format!("{session_id}.jsonl"))
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = path.to_string_lossy().into_owned();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquire locks for every distinct path (sorted to avoid deadlock
    /// against a concurrent operation locking the same set), then run `f`.
    fn with_locks<F, R>(&self, paths: &[PathBuf], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let mut unique: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        unique.sort();
        unique.dedup();
        let arcs: Vec<Arc<Mutex<()>>> = unique.iter().map(|p| self.path_lock(Path::new(p))).collect();
        let _guards: Vec<_> = arcs.iter().map(|a| a.lock().unwrap_or_else(|e| e.into_inner())).collect();
        f()
    }

    fn append_unlocked(path: &Path, value: &impl Serialize) -> Result<(), SessionError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(value).map_err(|e| SessionError::Io(e.into()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn read_lines_unlocked(path: &Path) -> Result<Vec<Value>, SessionError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(v) => out.push(v),
                Err(e) => tracing::warn!(line = n + 1, path = %path.display(), error = %e, "skipping corrupted jsonl line"),
            }
        }
        Ok(out)
    }

    fn write_lines_unlocked(path: &Path, lines: &[Value]) -> Result<(), SessionError> {
        let mut file = File::create(path)?;
        for line in lines {
            writeln!(file, "{}", serde_json::to_string(line).map_err(|e| SessionError::Io(e.into()))?)?;
        }
        Ok(())
    }

    fn header_value(session: &Session) -> Value {
        serde_json::to_value(session).unwrap_or(Value::Null)
    }
}

impl SessionStore for JsonlSessionStore {
    fn create(&self, session: &Session) -> Result<(), SessionError> {
        let header = Self::header_value(session);
        let session_path = self.session_path(&session.id);
        let index_path = self.index_path();
        self.with_locks(&[index_path.clone(), session_path.clone()], || {
            Self::append_unlocked(&index_path, &header)?;
            Self::append_unlocked(&session_path, &header)
        })
    }

    fn append_turn(&self, session_id: &str, turn: &Turn) -> Result<(), SessionError> {
        let path = self.session_path(session_id);
        self.with_locks(&[path.clone()], || Self::append_unlocked(&path, turn))
    }

    fn load(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let path = self.session_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let lines = self.with_locks(&[path.clone()], || Self::read_lines_unlocked(&path))?;
        let Some((header, turn_lines)) = lines.split_first() else {
            return Ok(None);
        };
        let mut turns = Vec::with_capacity(turn_lines.len());
        for (i, line) in turn_lines.iter().enumerate() {
            match serde_json::from_value::<Turn>(line.clone()) {
                Ok(t) => turns.push(t),
                Err(e) => tracing::warn!(line = i + 2, session_id, error = %e, "skipping malformed turn"),
            }
        }
        match serde_json::from_value::<Session>(header.clone()) {
            Ok(mut session) => {
                session.turns = turns;
                Ok(Some(session))
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "corrupted session header");
                Ok(None)
            }
        }
    }

    fn list(&self, filter: SessionFilter) -> Result<Vec<Session>, SessionError> {
        let index_path = self.index_path();
        if !index_path.exists() {
            return Ok(Vec::new());
        }
        let entries = self.with_locks(&[index_path.clone()], || Self::read_lines_unlocked(&index_path))?;
        let mut sessions: Vec<Session> = Vec::new();
        for entry in entries {
            if let Some(name) = &filter.agent_name {
                if entry.get("agent_name").and_then(Value::as_str) != Some(name.as_str()) {
                    continue;
                }
            }
            if let Some(channel) = &filter.channel {
                if entry.get("channel").and_then(Value::as_str) != Some(channel.as_str()) {
                    continue;
                }
            }
            if let Some(since) = filter.since {
                let started = entry
                    .get("started")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc));
                if started.map(|s| s < since).unwrap_or(true) {
                    continue;
                }
            }
            if let Ok(session) = serde_json::from_value::<Session>(entry) {
                sessions.push(session);
            }
        }
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if sessions.len() > limit {
            let start = sessions.len() - limit;
            sessions.drain(..start);
        }
        Ok(sessions)
    }

    fn close(&self, session_id: &str) -> Result<(), SessionError> {
        let path = self.session_path(session_id);
        let index_path = self.index_path();
        self.with_locks(&[path.clone(), index_path.clone()], || {
            if !path.exists() {
                return Ok(());
            }
            let mut lines = Self::read_lines_unlocked(&path)?;
            if lines.is_empty() {
                return Ok(());
            }
            let ended = serde_json::to_value(Utc::now()).unwrap();
            if let Some(header) = lines.first_mut().and_then(Value::as_object_mut) {
                header.insert("ended".to_string(), ended.clone());
            }
            Self::write_lines_unlocked(&path, &lines)?;

            if index_path.exists() {
                let mut idx_lines = Self::read_lines_unlocked(&index_path)?;
                for entry in idx_lines.iter_mut() {
                    if entry.get("id").and_then(Value::as_str) == Some(session_id) {
                        if let Some(obj) = entry.as_object_mut() {
                            obj.insert("ended".to_string(), ended.clone());
                        }
                        break;
                    }
                }
                Self::write_lines_unlocked(&index_path, &idx_lines)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;

    fn store(dir: &tempfile::TempDir) -> JsonlSessionStore {
        JsonlSessionStore::new(dir.path().join("sessions")).unwrap()
    }

    #[test]
    fn turn_defaults_populate_timestamp_and_metadata() {
        let t = Turn::new("user", "hello");
        assert_eq!(t.role, "user");
        assert_eq!(t.content, "hello");
        assert_eq!(t.metadata, Value::Object(Default::default()));
    }

    #[test]
    fn session_defaults_populate_id_and_started() {
        let s = Session::default();
        assert_eq!(s.id.len(), 8);
        assert!(s.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(s.ended.is_none());
        assert!(s.turns.is_empty());
    }

    #[test]
    fn create_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let session = Session::new("test-agent", "cli");
        store.create(&session).unwrap();
        store.append_turn(&session.id, &Turn::new("user", "hello")).unwrap();
        store
            .append_turn(
                &session.id,
                &Turn::new("assistant", "hi there").with_metadata(serde_json::json!({"model": "gpt-4"})),
            )
            .unwrap();

        let loaded = store.load(&session.id).unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.agent_name, "test-agent");
        assert_eq!(loaded.channel, "cli");
        assert_eq!(loaded.turns.len(), 2);
        assert_eq!(loaded.turns[0].role, "user");
        assert_eq!(loaded.turns[0].content, "hello");
        assert_eq!(loaded.turns[1].role, "assistant");
        assert_eq!(loaded.turns[1].metadata["model"], "gpt-4");
    }

    #[test]
    fn list_filters_by_agent_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create(&Session::new("alice", "telegram")).unwrap();
        store.create(&Session::new("bob", "telegram")).unwrap();
        store.create(&Session::new("alice", "cli")).unwrap();

        let alice = store
            .list(SessionFilter { agent_name: Some("alice".into()), ..Default::default() })
            .unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|s| s.agent_name == "alice"));

        let bob = store
            .list(SessionFilter { agent_name: Some("bob".into()), ..Default::default() })
            .unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].agent_name, "bob");
    }

    #[test]
    fn list_filters_by_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.create(&Session::new("a", "telegram")).unwrap();
        store.create(&Session::new("b", "cli")).unwrap();

        let tg = store
            .list(SessionFilter { channel: Some("telegram".into()), ..Default::default() })
            .unwrap();
        assert_eq!(tg.len(), 1);
        assert_eq!(tg[0].channel, "telegram");
    }

    #[test]
    fn list_filters_by_since() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let mut s1 = Session::new("a", "x");
        s1.started = DateTime::parse_from_rfc3339("2024-01-01T00:00:00+00:00").unwrap().with_timezone(&Utc);
        let mut s2 = Session::new("b", "x");
        s2.started = DateTime::parse_from_rfc3339("2024-06-01T00:00:00+00:00").unwrap().with_timezone(&Utc);
        let mut s3 = Session::new("c", "x");
        s3.started = DateTime::parse_from_rfc3339("2025-01-01T00:00:00+00:00").unwrap().with_timezone(&Utc);
        store.create(&s1).unwrap();
        store.create(&s2).unwrap();
        store.create(&s3).unwrap();

        let since = DateTime::parse_from_rfc3339("2024-06-01T00:00:00+00:00").unwrap().with_timezone(&Utc);
        let recent = store.list(SessionFilter { since: Some(since), ..Default::default() }).unwrap();
        assert_eq!(recent.len(), 2);
        let names: std::collections::HashSet<_> = recent.iter().map(|s| s.agent_name.clone()).collect();
        assert_eq!(names, ["b".to_string(), "c".to_string()].into_iter().collect());
    }

    #[test]
    fn close_sets_ended_and_survives_turns() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        let session = Session::new("closer", "cli");
        store.create(&session).unwrap();
        store.append_turn(&session.id, &Turn::new("user", "bye")).unwrap();

        assert!(store.load(&session.id).unwrap().unwrap().ended.is_none());
        store.close(&session.id).unwrap();

        let reloaded = store.load(&session.id).unwrap().unwrap();
        assert!(reloaded.ended.is_some());
        assert_eq!(reloaded.turns.len(), 1);

        let listed = store.list(SessionFilter { agent_name: Some("closer".into()), ..Default::default() }).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].ended.is_some());
    }

    #[test]
    fn load_missing_session_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        assert!(store.load("nonexistent").unwrap().is_none());
    }

    #[test]
    fn concurrent_writes_do_not_lose_turns() {
        let dir = tempfile::tempdir().unwrap();
        let store = StdArc::new(store(&dir));
        let session = Session::new("concurrent", "cli");
        store.create(&session).unwrap();

        let num_turns = 20;
        let handles: Vec<_> = (0..num_turns)
            .map(|i| {
                let store = StdArc::clone(&store);
                let id = session.id.clone();
                thread::spawn(move || store.append_turn(&id, &Turn::new("user", format!("msg-{i}"))).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let loaded = store.load(&session.id).unwrap().unwrap();
        assert_eq!(loaded.turns.len(), num_turns);
        let contents: std::collections::HashSet<_> = loaded.turns.iter().map(|t| t.content.clone()).collect();
        let expected: std::collections::HashSet<_> = (0..num_turns).map(|i| format!("msg-{i}")).collect();
        assert_eq!(contents, expected);
    }

    #[test]
    fn concurrent_close_does_not_corrupt_in_flight_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = StdArc::new(store(&dir));
        let session = Session::new("close-race", "cli");
        store.create(&session).unwrap();

        let writes = 50;
        let id = session.id.clone();
        let writer_store = StdArc::clone(&store);
        let writer = thread::spawn(move || {
            for i in 0..writes {
                writer_store.append_turn(&id, &Turn::new("user", format!("turn-{i}"))).unwrap();
                thread::sleep(std::time::Duration::from_millis(1));
            }
        });
        thread::sleep(std::time::Duration::from_millis(10));
        store.close(&session.id).unwrap();
        writer.join().unwrap();

        let loaded = store.load(&session.id).unwrap().unwrap();
        assert!(loaded.ended.is_some());
        assert_eq!(loaded.turns.len(), writes);
    }
}
