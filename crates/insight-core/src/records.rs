//! Chunk records as deposited by the ingestion collaborator.
//!
//! The collaborator (PDF parsing and chunking) writes JSON Lines files, one
//! record per line. Records may carry a precomputed embedding; the rest are
//! embedded at ingest time.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::{ChunkMetadata, Meta};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub page_ref: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub extra: Meta,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl ChunkRecord {
    /// The collaborator's id, or a stable id derived from the text.
    pub fn stable_id(&self) -> String {
        match &self.id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => content_id(&self.text),
        }
    }

    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            section: non_blank(self.section.as_deref()),
            page_ref: non_blank(self.page_ref.as_deref()),
            category: non_blank(self.category.as_deref()),
            extra: self.extra.clone(),
        }
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// First 16 hex chars of the blake3 hash of the trimmed text.
pub fn content_id(text: &str) -> String {
    let hash = blake3::hash(text.trim().as_bytes());
    format!("c-{}", &hash.to_hex()[..16])
}

#[derive(Default)]
pub struct RecordLoader;

impl RecordLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a single `.jsonl` file. Blank lines are skipped; records with
    /// blank text are dropped with a warning.
    pub fn load_file(&self, path: &Path) -> Result<Vec<ChunkRecord>> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("cannot read {}: {e}", path.display())))?;
        let mut records = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: ChunkRecord = serde_json::from_str(line).map_err(|e| {
                Error::invalid_chunk(format!("{}:{}", path.display(), line_no + 1), e.to_string())
            })?;
            if record.text.trim().is_empty() {
                warn!(file = %path.display(), line = line_no + 1, "skipping record with blank text");
                continue;
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Load a `.jsonl` file, or every `.jsonl` file under a directory in
    /// sorted path order.
    pub fn load(&self, path: &Path) -> Result<Vec<ChunkRecord>> {
        if path.is_file() {
            return self.load_file(path);
        }
        let files = self.list_jsonl_files(path);
        if files.is_empty() {
            info!("No .jsonl files found under {}", path.display());
            return Ok(vec![]);
        }
        let mut all = Vec::new();
        for (i, file) in files.iter().enumerate() {
            info!("Loading file {}/{}: {}", i + 1, files.len(), file.display());
            all.extend(self.load_file(file)?);
        }
        info!("Loaded {} records from {} files", all.len(), files.len());
        Ok(all)
    }

    fn list_jsonl_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.path().to_path_buf())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("jsonl"))
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_id_prefers_collaborator_id() {
        let mut r: ChunkRecord = serde_json::from_str(r#"{"id":" 42 ","text":"Love is devotion"}"#).expect("parse");
        assert_eq!(r.stable_id(), "42");
        r.id = None;
        assert_eq!(r.stable_id(), content_id("Love is devotion"));
        assert_eq!(content_id("  Love is devotion "), content_id("Love is devotion"));
    }

    #[test]
    fn metadata_drops_blank_fields() {
        let r: ChunkRecord =
            serde_json::from_str(r#"{"text":"t","section":"Japji","page_ref":"  ","category":"Raag Asa"}"#)
                .expect("parse");
        let m = r.metadata();
        assert_eq!(m.section.as_deref(), Some("Japji"));
        assert_eq!(m.page_ref, None);
        assert_eq!(m.category.as_deref(), Some("Raag Asa"));
    }
}
