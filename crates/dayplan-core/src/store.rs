use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, anyhow};
use chrono::NaiveDate;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::task::Task;
use crate::time::format_date;

pub const DEFAULT_PREFIX: &str = "tasks";

/// Key/value persistence underneath every task partition. Methods take `&self`
/// so one backend can be shared by the active store, the date window and the
/// repeat generator at the same time.
pub trait StorageBackend {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
    fn keys(&self) -> anyhow::Result<Vec<String>>;
}

pub type SharedBackend = Rc<dyn StorageBackend>;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBackend {
        Rc::new(Self::new())
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

/// One `<key>.json` file per key inside `dir`, written atomically.
#[derive(Debug)]
pub struct FileBackend {
    pub dir: PathBuf,
}

impl FileBackend {
    #[tracing::instrument(skip(dir))]
    pub fn open(dir: &Path) -> anyhow::Result<Self> {
        let dir = dir.to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;

        info!(dir = %dir.display(), "opened file backend");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        if key.is_empty()
            || key.starts_with('.')
            || key.contains(['/', '\\'])
        {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), bytes = value.len(), "writing key atomically");

        let mut temp = NamedTempFile::new_in(&self.dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed listing {}", self.dir.display()))?;
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(key) = name.strip_suffix(".json")
                && !key.starts_with('.')
            {
                out.push(key.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}

/// Storage key of the partition holding `date`'s tasks.
pub fn partition_key(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}-{}", format_date(date))
}

pub fn partition_exists(backend: &dyn StorageBackend, key: &str) -> bool {
    match backend.get(key) {
        Ok(value) => value.is_some(),
        Err(err) => {
            error!(key, error = %err, "failed probing partition");
            false
        }
    }
}

/// Reads a partition without opening a store. Unreadable or corrupt data
/// yields an empty list.
#[tracing::instrument(skip(backend))]
pub fn load_partition(backend: &dyn StorageBackend, key: &str) -> Vec<Task> {
    let raw = match backend.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return vec![],
        Err(err) => {
            error!(key, error = %err, "failed to load tasks from storage");
            return vec![];
        }
    };

    match serde_json::from_str::<Vec<Task>>(&raw) {
        Ok(tasks) => {
            debug!(key, count = tasks.len(), "loaded partition");
            tasks
        }
        Err(err) => {
            error!(key, error = %err, "failed to parse stored tasks");
            vec![]
        }
    }
}

/// Removes the implicit `<prefix>` partition and every `<prefix>-*` one.
#[tracing::instrument(skip(backend))]
pub fn clear_all_partitions(backend: &dyn StorageBackend, prefix: &str) -> usize {
    let keys = match backend.keys() {
        Ok(keys) => keys,
        Err(err) => {
            error!(error = %err, "failed listing storage keys");
            return 0;
        }
    };

    let dated = format!("{prefix}-");
    let mut removed = 0;
    for key in keys
        .into_iter()
        .filter(|k| k == prefix || k.starts_with(&dated))
    {
        match backend.remove(&key) {
            Ok(()) => removed += 1,
            Err(err) => error!(key, error = %err, "failed removing partition"),
        }
    }
    info!(removed, "cleared task partitions");
    removed
}

/// Task repository over one date partition. Mutations update the in-memory
/// cache and then write the whole partition back.
pub struct TaskStore {
    key: String,
    backend: SharedBackend,
    cache: Vec<Task>,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("key", &self.key)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl TaskStore {
    pub fn open(backend: SharedBackend, key: impl Into<String>) -> Self {
        let key = key.into();
        let cache = load_partition(backend.as_ref(), &key);
        Self { key, backend, cache }
    }

    /// The undated `<prefix>` partition.
    pub fn current(backend: SharedBackend, prefix: &str) -> Self {
        Self::open(backend, prefix)
    }

    pub fn for_date(backend: SharedBackend, prefix: &str, date: NaiveDate) -> Self {
        Self::open(backend, partition_key(prefix, date))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Upserts by id: an existing record is replaced in place, a new one is
    /// appended. A task without an id is logged and ignored.
    #[tracing::instrument(skip(self, task), fields(key = %self.key, id = %task.id))]
    pub fn save(&mut self, task: Task) -> bool {
        if task.id.is_empty() {
            error!(title = %task.title, "cannot save task without an id");
            return false;
        }

        match self.cache.iter().position(|t| t.id == task.id) {
            Some(idx) => self.cache[idx] = task,
            None => self.cache.push(task),
        }
        self.commit();
        true
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Task> {
        self.cache.iter().find(|t| t.id == id)
    }

    /// Reloads from the backend so writes made through another store on the
    /// same partition are visible, then hands out a copy.
    pub fn find_all(&mut self) -> Vec<Task> {
        self.cache = load_partition(self.backend.as_ref(), &self.key);
        self.cache.clone()
    }

    #[tracing::instrument(skip(self), fields(key = %self.key))]
    pub fn delete(&mut self, id: &str) -> bool {
        let Some(idx) = self.cache.iter().position(|t| t.id == id) else {
            debug!("no task to delete");
            return false;
        };
        self.cache.remove(idx);
        self.commit();
        true
    }

    /// Removes completed tasks and returns them; the backend is untouched when
    /// nothing was completed.
    #[tracing::instrument(skip(self), fields(key = %self.key))]
    pub fn clear_completed(&mut self) -> Vec<Task> {
        if !self.cache.iter().any(|t| t.completed) {
            return vec![];
        }

        let (removed, kept): (Vec<Task>, Vec<Task>) =
            std::mem::take(&mut self.cache)
                .into_iter()
                .partition(|t| t.completed);
        self.cache = kept;
        self.commit();
        info!(removed = removed.len(), "cleared completed tasks");
        removed
    }

    pub fn export_as_json(&mut self) -> String {
        let tasks = self.find_all();
        match serde_json::to_string(&tasks) {
            Ok(json) => json,
            Err(err) => {
                warn!(key = %self.key, error = %err, "export failed");
                "[]".to_string()
            }
        }
    }

    /// Replaces the whole partition. Accepted only when the text is an array
    /// whose every element has string `id` and `title` and deserializes as a
    /// task; otherwise nothing changes.
    #[tracing::instrument(skip(self, json), fields(key = %self.key))]
    pub fn import_from_json(&mut self, json: &str) -> bool {
        let value: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "import is not valid json");
                return false;
            }
        };

        let Some(items) = value.as_array() else {
            warn!("import must be a json array");
            return false;
        };
        let well_formed = items
            .iter()
            .all(|item| item.get("id").is_some_and(Value::is_string)
                && item.get("title").is_some_and(Value::is_string));
        if !well_formed {
            warn!("import rejected: every task needs a string id and title");
            return false;
        }

        let tasks: Vec<Task> = match serde_json::from_value(value) {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(error = %err, "import rejected: malformed task record");
                return false;
            }
        };
        if let Some(bad) = tasks.iter().find(|t| !t.has_valid_times()) {
            warn!(id = %bad.id, "import rejected: invalid HH:MM time");
            return false;
        }

        info!(count = tasks.len(), "imported tasks");
        self.cache = tasks;
        self.commit();
        true
    }

    fn commit(&self) {
        let json = match serde_json::to_string(&self.cache) {
            Ok(json) => json,
            Err(err) => {
                error!(key = %self.key, error = %err, "failed to serialize tasks");
                return;
            }
        };
        if let Err(err) = self.backend.set(&self.key, &json) {
            error!(key = %self.key, error = %err, "failed to save tasks to storage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, title: &str) -> Task {
        Task::with_id(id, title, "09:00", "10:00", None)
    }

    struct BrokenBackend;

    impl StorageBackend for BrokenBackend {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow!("storage unavailable"))
        }
        fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            Err(anyhow!("quota exceeded"))
        }
        fn remove(&self, _key: &str) -> anyhow::Result<()> {
            Err(anyhow!("storage unavailable"))
        }
        fn keys(&self) -> anyhow::Result<Vec<String>> {
            Err(anyhow!("storage unavailable"))
        }
    }

    #[test]
    fn save_upserts_and_keeps_order() {
        let mut store = TaskStore::current(MemoryBackend::shared(), DEFAULT_PREFIX);
        assert!(store.save(task("a", "A")));
        assert!(store.save(task("b", "B")));
        assert!(store.save(task("a", "A2")));

        let all = store.find_all();
        let titles: Vec<&str> = all.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["A2", "B"]);
    }

    #[test]
    fn save_without_id_is_a_no_op() {
        let backend = MemoryBackend::shared();
        let mut store = TaskStore::current(backend.clone(), DEFAULT_PREFIX);
        assert!(!store.save(task("", "nameless")));
        assert!(store.find_all().is_empty());
        assert!(!partition_exists(backend.as_ref(), DEFAULT_PREFIX));
    }

    #[test]
    fn find_all_sees_writes_from_other_instances() {
        let backend = MemoryBackend::shared();
        let mut first = TaskStore::current(backend.clone(), DEFAULT_PREFIX);
        let mut second = TaskStore::current(backend, DEFAULT_PREFIX);

        first.save(task("a", "A"));
        assert_eq!(second.find_all().len(), 1);

        let mut copy = second.find_all();
        copy.clear();
        assert_eq!(second.find_all().len(), 1);
    }

    #[test]
    fn delete_reports_whether_anything_was_removed() {
        let mut store = TaskStore::current(MemoryBackend::shared(), DEFAULT_PREFIX);
        store.save(task("a", "A"));
        assert!(store.delete("a"));
        assert!(!store.delete("a"));
        assert!(store.find_by_id("a").is_none());
    }

    #[test]
    fn clear_completed_returns_removed_tasks() {
        let backend = MemoryBackend::shared();
        let mut store = TaskStore::current(backend.clone(), DEFAULT_PREFIX);
        assert!(store.clear_completed().is_empty());
        assert!(!partition_exists(backend.as_ref(), DEFAULT_PREFIX));

        let mut done = task("a", "A");
        done.completed = true;
        store.save(done.clone());
        store.save(task("b", "B"));

        assert_eq!(store.clear_completed(), vec![done]);
        let left = store.find_all();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "b");
    }

    #[test]
    fn import_rejects_malformed_payloads_without_touching_store() {
        let mut store = TaskStore::current(MemoryBackend::shared(), DEFAULT_PREFIX);
        store.save(task("keep", "Keep"));

        assert!(!store.import_from_json("not json"));
        assert!(!store.import_from_json(r#"{"id":"a","title":"A"}"#));
        assert!(!store.import_from_json(r#"[{"id":1,"title":"A"}]"#));
        assert!(!store.import_from_json(r#"[{"id":"a"}]"#));
        assert!(!store.import_from_json(
            r#"[{"id":"a","title":"A","startTime":"9am","endTime":"10:00"}]"#
        ));

        let all = store.find_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "keep");
    }

    #[test]
    fn export_then_import_restores_the_partition() {
        let mut source = TaskStore::current(MemoryBackend::shared(), DEFAULT_PREFIX);
        let mut late = task("b", "Late shift");
        late.start_time = "22:00".to_string();
        late.end_time = "02:00".to_string();
        late.completed = true;
        source.save(task("a", "A"));
        source.save(late);
        let exported = source.export_as_json();

        let mut target = TaskStore::current(MemoryBackend::shared(), DEFAULT_PREFIX);
        target.save(task("old", "Replaced"));
        assert!(target.import_from_json(&exported));
        assert_eq!(target.find_all(), source.find_all());
    }

    #[test]
    fn broken_backend_degrades_to_empty_memory_store() {
        let mut store = TaskStore::current(Rc::new(BrokenBackend), DEFAULT_PREFIX);
        assert!(store.find_all().is_empty());
        assert!(store.save(task("a", "A")));
        assert!(store.find_by_id("a").is_some());
        assert_eq!(store.export_as_json(), "[]");
        assert_eq!(clear_all_partitions(&BrokenBackend, DEFAULT_PREFIX), 0);
    }

    #[test]
    fn corrupt_partition_loads_as_empty() {
        let backend = MemoryBackend::shared();
        backend.set("tasks-2025-01-01", "{oops").expect("set");
        let date = NaiveDate::from_ymd_opt(2025, 1, 1).expect("date");
        let mut store = TaskStore::for_date(backend, DEFAULT_PREFIX, date);
        assert_eq!(store.key(), "tasks-2025-01-01");
        assert!(store.find_all().is_empty());
    }

    #[test]
    fn clear_all_only_touches_task_partitions() {
        let backend = MemoryBackend::shared();
        for key in ["tasks", "tasks-2025-01-01", "tasks-2025-01-02", "history", "tasksx"] {
            backend.set(key, "[]").expect("set");
        }
        assert_eq!(clear_all_partitions(backend.as_ref(), DEFAULT_PREFIX), 3);
        assert_eq!(
            backend.keys().expect("keys"),
            vec!["history".to_string(), "tasksx".to_string()]
        );
    }
}
