use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use crate::error::ListingError;
use crate::types::{Detections, ProjectListing};

const ARTIFACT_EXT: &str = "json";
const OVERLAY_EXT: &str = "geojson";

/// Read-only view over `<root>/<project_id>/` artifact directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    base_url: String,
}

struct Entry {
    path: PathBuf,
    name: String,
    stem: String,
    ext: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps `project_id` to a directory that must stay inside the root.
    /// No filesystem read happens on the project itself when this fails.
    pub fn resolve_project_dir(&self, project_id: &str) -> Result<PathBuf, ListingError> {
        let root = resolve_path(&self.root)?;
        let candidate = resolve_path(&root.join(project_id))?;

        // component-wise, so `public_evil` is not inside `public`
        if !candidate.starts_with(&root) {
            return Err(ListingError::AccessDenied);
        }
        Ok(candidate)
    }

    pub fn list_project(&self, project_id: &str) -> Result<ProjectListing, ListingError> {
        let dir = self.resolve_project_dir(project_id)?;
        if !dir.is_dir() {
            return Err(ListingError::NotFound);
        }

        let entries = read_entries(&dir)?;

        let mut artifacts: Vec<(&Entry, SystemTime)> = Vec::new();
        for entry in entries.iter().filter(|e| e.ext == ARTIFACT_EXT) {
            let modified = fs::metadata(&entry.path)?.modified()?;
            artifacts.push((entry, modified));
        }
        // newest first; name breaks ties
        artifacts.sort_by(|(a, a_time), (b, b_time)| {
            b_time.cmp(a_time).then_with(|| a.name.cmp(&b.name))
        });

        let mut detection = Detections::new();
        for (artifact, _) in artifacts {
            if !artifact.path.is_file() {
                continue;
            }
            let base_name = artifact.stem.as_str();
            let geojson_files = self.overlay_urls(project_id, base_name, &entries);

            let group = detection.entry(base_name);
            group.geojson_files = geojson_files;

            let parsed = read_artifact(&artifact.path)?;
            group.apply_artifact(&parsed);
        }

        tracing::debug!(
            project_id,
            artifacts = detection.len(),
            dir = %dir.display(),
            "listed project artifacts"
        );

        Ok(ProjectListing {
            project_id: if project_id.is_empty() {
                "/".to_string()
            } else {
                project_id.to_string()
            },
            detection,
        })
    }

    fn overlay_urls(&self, project_id: &str, base_name: &str, entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .filter(|e| e.ext == OVERLAY_EXT && e.stem.contains(base_name))
            .map(|e| format!("{}/files/{}/{}", self.base_url, project_id, e.name))
            .collect()
    }
}

/// Direct children of `dir`, sorted by name. Names that are not UTF-8 are skipped.
fn read_entries(dir: &Path) -> io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for item in fs::read_dir(dir)? {
        let item = item?;
        let path = item.path();
        let (Some(name), Some(stem), Some(ext)) = (
            path.file_name().and_then(|s| s.to_str()),
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        entries.push(Entry {
            name: name.to_string(),
            stem: stem.to_string(),
            ext: ext.to_string(),
            path,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn read_artifact(path: &Path) -> Result<serde_json::Map<String, Value>, ListingError> {
    let text = fs::read_to_string(path).map_err(|e| ListingError::artifact_read(path, e))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ListingError::artifact_read(
            path,
            "top-level value is not a JSON object",
        )),
        Err(e) => Err(ListingError::artifact_read(path, e)),
    }
}

/// Absolute, `.`/`..`-free form of `path`, with symlinks resolved on the
/// longest prefix that exists. The path itself need not exist.
pub fn resolve_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    let mut existing = normalized.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(mut real) = fs::canonicalize(existing) {
            for part in missing.iter().rev() {
                real.push(part);
            }
            return Ok(real);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(normalized),
        }
    }
}
