//! Virtual project filesystem
//!
//! Backs every other component: projects own a flat set of file entries
//! keyed by absolute POSIX path. Writes are serialized through a single
//! `RwLock`; bulk inserts commit under one lock acquisition and emit their
//! change events only after the commit. Listeners are invoked outside the
//! lock.

pub mod path;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rustc_hash::FxHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Entry kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Folder,
}

/// A project: a namespace for one virtual file tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single file or folder entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: String,
    pub project_id: String,
    /// Absolute POSIX path, no trailing slash
    pub path: String,
    pub name: String,
    pub parent_path: String,
    pub kind: FileKind,
    /// Text content; empty when `is_binary`
    pub content: String,
    pub is_binary: bool,
    /// Opaque bytes, present iff `is_binary`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_content: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileEntry {
    /// Whether this entry holds loadable module text
    pub fn is_text_file(&self) -> bool {
        self.kind == FileKind::File && !self.is_binary
    }
}

/// Input row for `create_files_bulk`
#[derive(Debug, Clone)]
pub struct NewFile {
    pub path: String,
    pub content: String,
    pub kind: FileKind,
    pub is_binary: bool,
    pub binary_content: Option<Vec<u8>>,
}

impl NewFile {
    /// A plain text file row
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            kind: FileKind::File,
            is_binary: false,
            binary_content: None,
        }
    }

    /// An opaque binary file row
    pub fn binary(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            kind: FileKind::File,
            is_binary: true,
            binary_content: Some(bytes),
        }
    }

    /// A folder row
    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: String::new(),
            kind: FileKind::Folder,
            is_binary: false,
            binary_content: None,
        }
    }
}

/// What happened to an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Notification delivered to change listeners
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub project_id: String,
    pub path: String,
}

type Listener = Box<dyn Fn(&ChangeEvent) + Send + Sync>;
type ListenerTable = Arc<Mutex<Vec<(u64, Listener)>>>;

/// Handle returned from `add_change_listener`; detaches on drop
pub struct Subscription {
    id: u64,
    listeners: ListenerTable,
}

impl Subscription {
    /// Detach the listener now
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut table) = self.listeners.lock() {
            table.retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Default)]
struct StoreInner {
    initialized: bool,
    projects: HashMap<String, Project>,
    files: HashMap<String, FileEntry>,
    /// (project_id, path) → file id
    paths: HashMap<(String, String), String>,
}

/// The virtual filesystem store
pub struct FileStore {
    inner: Arc<RwLock<StoreInner>>,
    listeners: ListenerTable,
    next_listener_id: AtomicU64,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Prepare the backing store. Safe to call more than once.
    pub fn init(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.initialized = true;
        Ok(())
    }

    // ── projects ────────────────────────────────────────────────────

    /// Create a project. Duplicate names fail with `AlreadyExists`.
    pub fn create_project(&self, name: &str, description: Option<&str>) -> Result<Project> {
        let mut inner = self.write()?;
        if inner.projects.values().any(|p| p.name == name) {
            return Err(Error::already_exists(format!("project '{}'", name)));
        }
        let now = Utc::now();
        let project = Project {
            id: generate_id(),
            name: name.to_string(),
            description: description.map(String::from),
            created_at: now,
            updated_at: now,
        };
        inner.projects.insert(project.id.clone(), project.clone());
        Ok(project)
    }

    /// Create a project seeded with a minimal root manifest.
    pub fn create_empty_project(&self, name: &str) -> Result<Project> {
        let project = self.create_project(name, None)?;
        let manifest = format!(
            "{{\n  \"name\": \"{}\",\n  \"version\": \"1.0.0\",\n  \"dependencies\": {{}}\n}}\n",
            name
        );
        self.create_file(&project.id, "/package.json", &manifest, FileKind::File)?;
        Ok(project)
    }

    pub fn get_projects(&self) -> Result<Vec<Project>> {
        let inner = self.read()?;
        let mut projects: Vec<Project> = inner.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(projects)
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        let inner = self.read()?;
        inner
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("project '{}'", id)))
    }

    /// Patch name and/or description.
    pub fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project> {
        let mut inner = self.write()?;
        let project = inner
            .projects
            .get_mut(id)
            .ok_or_else(|| Error::not_found(format!("project '{}'", id)))?;
        if let Some(name) = name {
            project.name = name.to_string();
        }
        if let Some(description) = description {
            project.description = Some(description.to_string());
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }

    /// Delete a project and every file it owns.
    pub fn delete_project(&self, id: &str) -> Result<()> {
        let events = {
            let mut inner = self.write()?;
            if inner.projects.remove(id).is_none() {
                return Err(Error::not_found(format!("project '{}'", id)));
            }
            let doomed: Vec<String> = inner
                .files
                .values()
                .filter(|f| f.project_id == id)
                .map(|f| f.id.clone())
                .collect();
            let mut events = Vec::with_capacity(doomed.len());
            for file_id in doomed {
                if let Some(entry) = inner.files.remove(&file_id) {
                    inner
                        .paths
                        .remove(&(entry.project_id.clone(), entry.path.clone()));
                    events.push(ChangeEvent {
                        kind: ChangeKind::Deleted,
                        project_id: entry.project_id,
                        path: entry.path,
                    });
                }
            }
            events
        };
        self.notify_all(&events);
        Ok(())
    }

    // ── files ───────────────────────────────────────────────────────

    /// Create or update the entry at `path` (upsert by path).
    pub fn create_file(
        &self,
        project_id: &str,
        file_path: &str,
        content: &str,
        kind: FileKind,
    ) -> Result<FileEntry> {
        self.create_file_full(
            project_id,
            NewFile {
                path: file_path.to_string(),
                content: content.to_string(),
                kind,
                is_binary: false,
                binary_content: None,
            },
        )
    }

    /// Create or update a binary entry at `path`.
    pub fn create_binary_file(
        &self,
        project_id: &str,
        file_path: &str,
        bytes: Vec<u8>,
    ) -> Result<FileEntry> {
        self.create_file_full(project_id, NewFile::binary(file_path, bytes))
    }

    /// Upsert a fully specified entry.
    pub fn create_file_full(&self, project_id: &str, row: NewFile) -> Result<FileEntry> {
        let (entry, event) = {
            let mut inner = self.write()?;
            Self::upsert_locked(&mut inner, project_id, row)?
        };
        self.notify_all(&[event]);
        Ok(entry)
    }

    /// Insert many entries under a single commit.
    ///
    /// Semantically equivalent to serial `create_file` calls; events fire
    /// after every row is in place. The first invalid row aborts the whole
    /// batch with nothing committed.
    pub fn create_files_bulk(&self, project_id: &str, rows: Vec<NewFile>) -> Result<usize> {
        let events = {
            let mut inner = self.write()?;
            if !inner.projects.contains_key(project_id) {
                return Err(Error::not_found(format!("project '{}'", project_id)));
            }
            for row in &rows {
                if !path::is_absolute(&row.path) {
                    return Err(Error::invalid_manifest(format!(
                        "file path must be absolute: '{}'",
                        row.path
                    )));
                }
            }
            let mut events = Vec::with_capacity(rows.len());
            for row in rows {
                let (_, event) = Self::upsert_locked(&mut inner, project_id, row)?;
                events.push(event);
            }
            events
        };
        let count = events.len();
        self.notify_all(&events);
        Ok(count)
    }

    pub fn get_file_by_path(&self, project_id: &str, file_path: &str) -> Result<Option<FileEntry>> {
        let inner = self.read()?;
        let key = (project_id.to_string(), file_path.to_string());
        Ok(inner
            .paths
            .get(&key)
            .and_then(|id| inner.files.get(id))
            .cloned())
    }

    /// Every entry whose path starts with `prefix`. Ordering unspecified.
    pub fn get_files_by_prefix(&self, project_id: &str, prefix: &str) -> Result<Vec<FileEntry>> {
        let inner = self.read()?;
        Ok(inner
            .files
            .values()
            .filter(|f| f.project_id == project_id && f.path.starts_with(prefix))
            .cloned()
            .collect())
    }

    /// Whether a file (not folder) exists at `path`.
    pub fn file_exists(&self, project_id: &str, file_path: &str) -> Result<bool> {
        Ok(self
            .get_file_by_path(project_id, file_path)?
            .map(|f| f.kind == FileKind::File)
            .unwrap_or(false))
    }

    /// Text content of the file at `path`, or `NotFound`.
    pub fn read_text(&self, project_id: &str, file_path: &str) -> Result<String> {
        let entry = self
            .get_file_by_path(project_id, file_path)?
            .ok_or_else(|| Error::not_found(format!("file '{}'", file_path)))?;
        Ok(entry.content)
    }

    pub fn update_file_content(&self, file_id: &str, content: &str) -> Result<FileEntry> {
        let (entry, event) = {
            let mut inner = self.write()?;
            let entry = inner
                .files
                .get_mut(file_id)
                .ok_or_else(|| Error::not_found(format!("file id '{}'", file_id)))?;
            entry.content = content.to_string();
            entry.is_binary = false;
            entry.binary_content = None;
            entry.updated_at = Utc::now();
            let event = ChangeEvent {
                kind: ChangeKind::Updated,
                project_id: entry.project_id.clone(),
                path: entry.path.clone(),
            };
            (entry.clone(), event)
        };
        self.notify_all(&[event]);
        Ok(entry)
    }

    /// Persist a mutated entry back by id.
    pub fn save_file(&self, entry: &FileEntry) -> Result<()> {
        let event = {
            let mut inner = self.write()?;
            let existing = inner
                .files
                .get_mut(&entry.id)
                .ok_or_else(|| Error::not_found(format!("file id '{}'", entry.id)))?;
            let mut updated = entry.clone();
            updated.updated_at = Utc::now();
            if updated.is_binary {
                updated.content = String::new();
            } else {
                updated.binary_content = None;
            }
            let event = ChangeEvent {
                kind: ChangeKind::Updated,
                project_id: updated.project_id.clone(),
                path: updated.path.clone(),
            };
            *existing = updated;
            event
        };
        self.notify_all(&[event]);
        Ok(())
    }

    pub fn delete_file(&self, file_id: &str) -> Result<()> {
        let event = {
            let mut inner = self.write()?;
            let entry = inner
                .files
                .remove(file_id)
                .ok_or_else(|| Error::not_found(format!("file id '{}'", file_id)))?;
            inner
                .paths
                .remove(&(entry.project_id.clone(), entry.path.clone()));
            ChangeEvent {
                kind: ChangeKind::Deleted,
                project_id: entry.project_id,
                path: entry.path,
            }
        };
        self.notify_all(&[event]);
        Ok(())
    }

    // ── listeners ───────────────────────────────────────────────────

    /// Register a change listener; the returned subscription detaches it.
    pub fn add_change_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .expect("listener table poisoned")
            .push((id, Box::new(callback)));
        Subscription {
            id,
            listeners: Arc::clone(&self.listeners),
        }
    }

    // ── helpers ─────────────────────────────────────────────────────

    fn upsert_locked(
        inner: &mut StoreInner,
        project_id: &str,
        row: NewFile,
    ) -> Result<(FileEntry, ChangeEvent)> {
        if !inner.projects.contains_key(project_id) {
            return Err(Error::not_found(format!("project '{}'", project_id)));
        }
        if !path::is_absolute(&row.path) {
            return Err(Error::invalid_manifest(format!(
                "file path must be absolute: '{}'",
                row.path
            )));
        }
        let normalized = path::normalize(&row.path);
        let now = Utc::now();
        let key = (project_id.to_string(), normalized.clone());

        if let Some(existing_id) = inner.paths.get(&key).cloned() {
            let entry = inner
                .files
                .get_mut(&existing_id)
                .ok_or_else(|| Error::internal("path index out of sync"))?;
            entry.kind = row.kind;
            entry.is_binary = row.is_binary;
            entry.content = if row.is_binary { String::new() } else { row.content };
            entry.binary_content = if row.is_binary { row.binary_content } else { None };
            entry.updated_at = now;
            let event = ChangeEvent {
                kind: ChangeKind::Updated,
                project_id: project_id.to_string(),
                path: normalized,
            };
            return Ok((entry.clone(), event));
        }

        let entry = FileEntry {
            id: generate_id(),
            project_id: project_id.to_string(),
            name: path::basename(&normalized),
            parent_path: path::dirname(&normalized),
            path: normalized.clone(),
            kind: row.kind,
            content: if row.is_binary { String::new() } else { row.content },
            is_binary: row.is_binary,
            binary_content: if row.is_binary { row.binary_content } else { None },
            created_at: now,
            updated_at: now,
        };
        inner.paths.insert(key, entry.id.clone());
        inner.files.insert(entry.id.clone(), entry.clone());
        let event = ChangeEvent {
            kind: ChangeKind::Created,
            project_id: project_id.to_string(),
            path: normalized,
        };
        Ok((entry, event))
    }

    fn notify_all(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let table = self.listeners.lock().expect("listener table poisoned");
        for event in events {
            for (_, listener) in table.iter() {
                listener(event);
            }
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| Error::internal("file store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| Error::internal("file store lock poisoned"))
    }
}

/// Random 16-hex-char entry id
fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| format!("{:x}", rng.gen_range(0..16)))
        .collect()
}
