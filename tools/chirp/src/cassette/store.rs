use crate::cassette::recording::Cassette;
use crate::errors::ChirpError;
use crate::logging::append_run_log;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

const CASSETTE_EXTENSION: &str = "jsonl";

/// Cassettes by name: JSONL files under one directory, plus cassettes
/// inserted in memory (which shadow files of the same name).
pub struct CassetteStore {
    dir: PathBuf,
    memory: Mutex<HashMap<String, Cassette>>,
}

impl CassetteStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            memory: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf, ChirpError> {
        validate_cassette_name(name)?;
        Ok(self.dir.join(format!("{name}.{CASSETTE_EXTENSION}")))
    }

    pub fn insert(&self, cassette: Cassette) -> Result<(), ChirpError> {
        validate_cassette_name(cassette.name())?;
        self.memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cassette.name().to_string(), cassette);
        Ok(())
    }

    /// `Ok(None)` when no recording exists under `name`.
    pub fn load(&self, name: &str) -> Result<Option<Cassette>, ChirpError> {
        let path = self.path_for(name)?;
        if let Some(cassette) = self
            .memory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Some(cassette.clone()));
        }
        if !path.is_file() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path).map_err(|e| ChirpError::Io(e.to_string()))?;
        let cassette = Cassette::parse(name, &raw)?;
        append_run_log(
            "debug",
            "cassette.store.loaded",
            json!({
                "name": name,
                "path": path.display().to_string(),
                "interactions": cassette.interactions.len(),
            }),
        );
        Ok(Some(cassette))
    }

    /// Write `cassette` to disk, replacing any previous recording atomically.
    pub fn save(&self, cassette: &Cassette) -> Result<PathBuf, ChirpError> {
        let path = self.path_for(cassette.name())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ChirpError::Io(e.to_string()))?;
        }
        let tmp = path.with_extension(format!("{CASSETTE_EXTENSION}.tmp"));
        fs::write(&tmp, cassette.to_jsonl()?).map_err(|e| ChirpError::Io(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| ChirpError::Io(e.to_string()))?;
        append_run_log(
            "info",
            "cassette.store.saved",
            json!({
                "name": cassette.name(),
                "path": path.display().to_string(),
                "interactions": cassette.interactions.len(),
            }),
        );
        Ok(path)
    }

    /// Every cassette name known to the store, sorted.
    pub fn list(&self) -> Result<Vec<String>, ChirpError> {
        let mut names = BTreeSet::new();
        if self.dir.is_dir() {
            collect_names(&self.dir, &self.dir, &mut names)?;
        }
        names.extend(
            self.memory
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned(),
        );
        Ok(names.into_iter().collect())
    }
}

fn collect_names(root: &Path, dir: &Path, names: &mut BTreeSet<String>) -> Result<(), ChirpError> {
    for entry in fs::read_dir(dir).map_err(|e| ChirpError::Io(e.to_string()))? {
        let path = entry.map_err(|e| ChirpError::Io(e.to_string()))?.path();
        if path.is_dir() {
            collect_names(root, &path, names)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(CASSETTE_EXTENSION) {
            continue;
        }
        let Ok(relative) = path.with_extension("").strip_prefix(root).map(Path::to_path_buf)
        else {
            continue;
        };
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if validate_cassette_name(&name).is_ok() {
            names.insert(name);
        }
    }
    Ok(())
}

/// Names are `/`-separated segments of ASCII letters, digits, `_` and `-`.
pub fn validate_cassette_name(name: &str) -> Result<(), ChirpError> {
    let valid = !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
    if valid {
        Ok(())
    } else {
        Err(ChirpError::InvalidCassetteName(name.to_string()))
    }
}
