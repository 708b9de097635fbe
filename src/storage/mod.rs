//! File-backed storage primitives
//!
//! Everything the watchdog persists is plain files under the data directory:
//! - Atomic JSON documents (status snapshot, heartbeats, notification drops)
//! - Append-only JSON lines (incident log, event log), fsynced per record
//! - Single-instance lock files holding the owner's pid

pub mod lockfile;

pub use lockfile::ProcessLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization error on {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Write a JSON document by writing a sibling temp file and renaming it over
/// the target, so readers never observe a torn write.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }

    let json = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp_path = path.with_file_name(tmp_name);

    {
        let mut file = File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
        file.write_all(&json).map_err(|e| StorageError::io(&tmp_path, e))?;
        file.sync_all().map_err(|e| StorageError::io(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StorageError::io(path, e)
    })
}

/// Read a JSON document. A missing file yields `Ok(None)`.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Serialization { path: path.to_path_buf(), source })
}

// ============================================================================
// JSON Lines
// ============================================================================

/// Open (creating if needed) a file for appending JSON lines
pub fn open_append(path: &Path) -> Result<File, StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StorageError::io(path, e))?;
    terminate_torn_line(&mut file).map_err(|e| StorageError::io(path, e))?;
    Ok(file)
}

/// A crash mid-append can leave the last line without its newline; end it so
/// the next record starts on a line of its own.
fn terminate_torn_line(file: &mut File) -> io::Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
        file.sync_data()?;
    }
    Ok(())
}

/// Append one record as a single line and flush it to stable storage
pub fn append_json_line<T: Serialize>(file: &mut File, path: &Path, value: &T) -> Result<(), StorageError> {
    let mut line = serde_json::to_vec(value).map_err(|source| StorageError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    line.push(b'\n');
    file.write_all(&line).map_err(|e| StorageError::io(path, e))?;
    file.sync_data().map_err(|e| StorageError::io(path, e))
}

/// Read every decodable record of a JSON-lines file, in order.
///
/// Lines that fail to decode (typically a torn final write) are skipped and
/// reported by line number. A missing file is empty.
pub fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<(Vec<T>, Vec<usize>), StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), Vec::new())),
        Err(e) => return Err(StorageError::io(path, e)),
    };

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StorageError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(record) => records.push(record),
            Err(_) => skipped.push(idx + 1),
        }
    }
    Ok((records, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        n: u32,
    }

    #[test]
    fn test_atomic_write_replaces_and_leaves_no_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        write_json_atomic(&path, &Row { n: 1 }).unwrap();
        write_json_atomic(&path, &Row { n: 2 }).unwrap();

        let row: Row = read_json(&path).unwrap().unwrap();
        assert_eq!(row, Row { n: 2 });
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp file should have been renamed away");
    }

    #[test]
    fn test_read_missing_json_is_none() {
        let dir = tempdir().unwrap();
        let row: Option<Row> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn test_json_lines_skip_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut file = open_append(&path).unwrap();
        append_json_line(&mut file, &path, &Row { n: 1 }).unwrap();
        append_json_line(&mut file, &path, &Row { n: 2 }).unwrap();
        file.write_all(b"{\"n\": 3").unwrap();

        let (rows, skipped): (Vec<Row>, _) = read_json_lines(&path).unwrap();
        assert_eq!(rows, vec![Row { n: 1 }, Row { n: 2 }]);
        assert_eq!(skipped, vec![3]);
    }
}
