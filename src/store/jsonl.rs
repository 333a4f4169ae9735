//! Directory-backed store: one `<collection>.jsonl` file per collection
//!
//! Each non-blank line holds one extended-JSON document. Lines are parsed
//! with simd-json, falling back to serde_json for inputs simd-json rejects.

use super::{DocumentIter, DocumentStore};
use crate::error::{Error, Result};
use crate::value::{document_from_json, document_id, Document};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const EXTENSION: &str = "jsonl";

/// Store reading newline-delimited JSON exports from a directory
#[derive(Debug, Clone)]
pub struct JsonlStore {
    root: PathBuf,
}

impl JsonlStore {
    /// Open a store rooted at `root`; the directory must exist
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::connectivity(
                root.display().to_string(),
                "data directory does not exist",
            ));
        }
        Ok(JsonlStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open_collection(&self, collection: &str) -> Result<BufReader<File>> {
        let path = self.root.join(format!("{}.{}", collection, EXTENSION));
        match File::open(&path) {
            Ok(file) => Ok(BufReader::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::CollectionNotFound(collection.to_string()))
            }
            Err(err) => Err(Error::connectivity(collection, err.to_string())),
        }
    }
}

/// Parse one line, simd-json first
fn parse_line(line: &str) -> std::result::Result<Value, String> {
    let mut bytes = line.as_bytes().to_vec();
    match simd_json::serde::from_slice::<Value>(&mut bytes) {
        Ok(value) => Ok(value),
        Err(_) => serde_json::from_str(line).map_err(|err| err.to_string()),
    }
}

fn decode_line(collection: &str, line_number: usize, line: &str) -> Result<Document> {
    let value = parse_line(line).map_err(|message| Error::MalformedDocument {
        collection: collection.to_string(),
        message: format!("line {}: {}", line_number, message),
    })?;
    document_from_json(&value).ok_or_else(|| Error::MalformedDocument {
        collection: collection.to_string(),
        message: format!("line {}: not a JSON object", line_number),
    })
}

impl DocumentStore for JsonlStore {
    fn list_collections(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|err| Error::connectivity(self.root.display().to_string(), err.to_string()))?;

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn estimated_count(&self, collection: &str) -> Result<u64> {
        let reader = self.open_collection(collection)?;
        let mut count = 0u64;
        for line in reader.lines() {
            let line = line.map_err(|err| Error::connectivity(collection, err.to_string()))?;
            if !line.trim().is_empty() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn scan(&self, collection: &str, skip: u64, limit: Option<u64>) -> Result<DocumentIter<'_>> {
        let reader = self.open_collection(collection)?;
        let name = collection.to_string();

        let iter = reader
            .lines()
            .enumerate()
            .filter(|(_, line)| line.as_ref().map_or(true, |line| !line.trim().is_empty()))
            .skip(skip as usize)
            .take(limit.map_or(usize::MAX, |limit| limit as usize))
            .map(move |(index, line)| {
                let line = line.map_err(|err| Error::connectivity(&name, err.to_string()))?;
                decode_line(&name, index + 1, &line)
            });
        Ok(Box::new(iter))
    }

    fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        for doc in self.scan(collection, 0, None)? {
            let doc = doc?;
            if document_id(&doc).as_deref() == Some(id) {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    fn write_collection(dir: &Path, name: &str, lines: &[&str]) {
        std::fs::write(dir.join(format!("{}.jsonl", name)), lines.join("\n")).unwrap();
    }

    #[test]
    fn test_reads_extended_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_collection(
            dir.path(),
            "agents",
            &[
                r#"{"_id": {"$oid": "5f1d7c2e9b1e8a3d4c5b6a79"}, "name": "Ada"}"#,
                "",
                r#"{"_id": {"$oid": "5f1d7c2e9b1e8a3d4c5b6a7a"}, "name": "Grace"}"#,
            ],
        );
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.list_collections().unwrap(), vec!["agents"]);
        assert_eq!(store.estimated_count("agents").unwrap(), 2);

        let found = store
            .find_by_id("agents", "5f1d7c2e9b1e8a3d4c5b6a7a")
            .unwrap()
            .unwrap();
        assert_eq!(found["name"], FieldValue::String("Grace".to_string()));

        let skipped: Vec<_> = store.scan("agents", 1, None).unwrap().collect();
        assert_eq!(skipped.len(), 1);
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_collection(dir.path(), "broken", &[r#"{"_id": 1}"#, "{not json"]);

        let store = JsonlStore::open(dir.path()).unwrap();
        let results: Vec<_> = store.scan("broken", 0, None).unwrap().collect();
        assert!(results[0].is_ok());
        match &results[1] {
            Err(Error::MalformedDocument { message, .. }) => assert!(message.starts_with("line 2")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_missing_collection() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.estimated_count("absent"),
            Err(Error::CollectionNotFound(_))
        ));
        assert!(JsonlStore::open(dir.path().join("nope")).is_err());
    }
}
