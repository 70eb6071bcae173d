//! Artifact IO
//!
//! JSONL and single-document JSON helpers shared by every stage, plus the
//! `ArtifactStore` a stage writes through. Writes are atomic (temp file in
//! the target directory, then persist) so a killed run never leaves a
//! half-written artifact. Artifacts named `gamebook.json` or
//! `validation_report.json` are routed to the run's `output/` directory;
//! everything else lands in the stage's own subdirectory.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;

use super::stamp::Stamp;

/// Artifact names routed to `<run>/output/` regardless of producing stage.
pub const FINAL_OUTPUT_NAMES: &[&str] = &["gamebook.json", "validation_report.json"];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path} line {line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("artifact {0} already written this execution; appending requires --force")]
    AppendRefused(PathBuf),

    #[error("missing input artifact: {0}")]
    MissingInput(PathBuf),
}

pub type Result<T> = std::result::Result<T, ArtifactError>;

fn io_err(path: &Path, source: std::io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ============================================================================
// Free Read/Write Helpers
// ============================================================================

/// Read a JSONL file into typed records. Blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(ArtifactError::MissingInput(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| io_err(path, e))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| ArtifactError::Json {
            path: path.to_path_buf(),
            line: idx + 1,
            source: e,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Read a single JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(ArtifactError::MissingInput(path.to_path_buf()));
    }
    let contents = fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|e| ArtifactError::Json {
        path: path.to_path_buf(),
        line: 0,
        source: e,
    })
}

/// Atomically replace `path` with the serialized JSONL of `records`.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    atomic_write(path, |out| {
        for record in records {
            let line = serde_json::to_string(record).map_err(|e| ArtifactError::Json {
                path: path.to_path_buf(),
                line: 0,
                source: e,
            })?;
            writeln!(out, "{line}").map_err(|e| io_err(path, e))?;
        }
        Ok(())
    })
}

/// Atomically replace `path` with a pretty-printed JSON document.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    atomic_write(path, |out| {
        let text = serde_json::to_string_pretty(value).map_err(|e| ArtifactError::Json {
            path: path.to_path_buf(),
            line: 0,
            source: e,
        })?;
        out.write_all(text.as_bytes()).map_err(|e| io_err(path, e))?;
        writeln!(out).map_err(|e| io_err(path, e))
    })
}

fn atomic_write(
    path: &Path,
    write_fn: impl FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| io_err(dir, e))?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write_fn(&mut out)?;
        out.flush().map_err(|e| io_err(path, e))?;
    }
    tmp.persist(path)
        .map_err(|e| io_err(path, e.error))?;
    Ok(())
}

/// Rewrite an artifact in place, stamping every record.
///
/// JSONL files get the stamp on every line-object; single JSON documents on
/// the root object. Already-stamped records are re-stamped (replace, not
/// append, per the lifecycle contract).
pub fn stamp_artifact(path: &Path, stamp: &Stamp) -> Result<()> {
    let is_jsonl = path.extension().map_or(false, |e| e == "jsonl");
    if is_jsonl {
        let mut records: Vec<Value> = read_jsonl(path)?;
        for record in &mut records {
            stamp.apply(record);
        }
        write_jsonl(path, &records)
    } else {
        let mut doc: Value = read_json(path)?;
        stamp.apply(&mut doc);
        write_json(path, &doc)
    }
}

// ============================================================================
// ArtifactStore
// ============================================================================

/// The write surface a stage sees: routes final-output names, records what
/// was written (for post-stage stamping), and refuses double writes unless
/// the run was forced.
#[derive(Debug)]
pub struct ArtifactStore {
    stage_dir: PathBuf,
    output_dir: PathBuf,
    force: bool,
    written: Mutex<Vec<PathBuf>>,
}

impl ArtifactStore {
    pub fn new(stage_dir: PathBuf, output_dir: PathBuf, force: bool) -> Self {
        Self {
            stage_dir,
            output_dir,
            force,
            written: Mutex::new(Vec::new()),
        }
    }

    /// Where an artifact with this name belongs.
    pub fn path_for(&self, name: &str) -> PathBuf {
        if FINAL_OUTPUT_NAMES.contains(&name) {
            self.output_dir.join(name)
        } else {
            self.stage_dir.join(name)
        }
    }

    pub fn stage_dir(&self) -> &Path {
        &self.stage_dir
    }

    /// Write a JSONL artifact, recording it for stamping.
    pub fn write_jsonl<T: Serialize>(&self, name: &str, records: &[T]) -> Result<PathBuf> {
        let path = self.path_for(name);
        self.guard(&path)?;
        write_jsonl(&path, records)?;
        Ok(path)
    }

    /// Write a single-document JSON artifact, recording it for stamping.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.path_for(name);
        self.guard(&path)?;
        write_json(&path, value)?;
        Ok(path)
    }

    /// Paths written during this stage execution, in write order.
    pub fn written(&self) -> Vec<PathBuf> {
        self.written.lock().expect("artifact store lock").clone()
    }

    fn guard(&self, path: &Path) -> Result<()> {
        let mut written = self.written.lock().expect("artifact store lock");
        if written.iter().any(|p| p == path) && !self.force {
            return Err(ArtifactError::AppendRefused(path.to_path_buf()));
        }
        written.push(path.to_path_buf());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_jsonl_roundtrip_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        fs::write(&path, "{\"a\":1}\n\n{\"a\":2}\n").unwrap();
        let rows: Vec<Value> = read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_write_is_atomic_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json(&path, &json!({"v": 1})).unwrap();
        write_json(&path, &json!({"v": 2})).unwrap();
        let doc: Value = read_json(&path).unwrap();
        assert_eq!(doc["v"], 2);
    }

    #[test]
    fn test_missing_input_is_specific_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Value>(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ArtifactError::MissingInput(_)));
    }

    #[test]
    fn test_stamp_artifact_jsonl_stamps_every_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        write_jsonl(&path, &[json!({"seq": 0}), json!({"seq": 1})]).unwrap();
        let stamp = Stamp::new("1.0.0", "reduce_elements", "r1");
        stamp_artifact(&path, &stamp).unwrap();
        let rows: Vec<Value> = read_jsonl(&path).unwrap();
        assert!(rows.iter().all(|r| r["module_id"] == "reduce_elements"));
    }

    #[test]
    fn test_store_routes_final_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let stage_dir = dir.path().join("08_build_gamebook");
        let output_dir = dir.path().join("output");
        let store = ArtifactStore::new(stage_dir.clone(), output_dir.clone(), false);
        assert_eq!(store.path_for("gamebook.json"), output_dir.join("gamebook.json"));
        assert_eq!(
            store.path_for("portions_enriched.jsonl"),
            stage_dir.join("portions_enriched.jsonl")
        );
    }

    #[test]
    fn test_store_refuses_double_write_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("s"), dir.path().join("o"), false);
        store.write_json("a.json", &json!({})).unwrap();
        let err = store.write_json("a.json", &json!({})).unwrap_err();
        assert!(matches!(err, ArtifactError::AppendRefused(_)));
    }

    #[test]
    fn test_store_allows_double_write_with_force() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("s"), dir.path().join("o"), true);
        store.write_json("a.json", &json!({"v": 1})).unwrap();
        store.write_json("a.json", &json!({"v": 2})).unwrap();
        assert_eq!(store.written().len(), 2);
    }
}
