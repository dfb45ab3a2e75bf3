//! Knowledge-base loader.
//!
//! Reads every file in the data directory whose name matches
//! `sources.include_globs`, expecting each to hold a JSON array of
//! `{title, url, content}` records. Bad files and bad records are skipped
//! and reported in [`LoadReport::rejections`]; only a directory with no
//! usable files at all is fatal.
//!
//! Documents come back in file-name order, then in-file order, so the IDs
//! assigned by the builder are stable across runs.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use pathwise_core::models::SourceDocument;

use crate::builder::BuildError;

/// A file or record that was skipped during loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub file: String,
    /// Index of the record within the file; `None` when the whole file was
    /// skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub documents: Vec<SourceDocument>,
    pub rejections: Vec<Rejection>,
    pub files_scanned: usize,
}

impl LoadReport {
    fn reject(&mut self, file: &str, position: Option<usize>, reason: impl Into<String>) {
        let reason = reason.into();
        match position {
            Some(pos) => warn!(file, position = pos, %reason, "skipping record"),
            None => warn!(file, %reason, "skipping file"),
        }
        self.rejections.push(Rejection {
            file: file.to_string(),
            position,
            reason,
        });
    }
}

/// Load and validate every record under `dir`.
///
/// Fails with [`BuildError::NoInputData`] if `dir` is missing, is not a
/// directory, or holds no file matching `include_globs`. An empty
/// document list is returned as-is; deciding that it is fatal is the
/// builder's job.
pub fn load_documents(dir: &Path, include_globs: &[String]) -> Result<LoadReport, BuildError> {
    if !dir.is_dir() {
        return Err(BuildError::NoInputData(format!(
            "data directory does not exist: {}",
            dir.display()
        )));
    }

    let include_set = build_globset(include_globs)
        .map_err(|e| BuildError::NoInputData(format!("invalid include glob: {}", e)))?;

    let files = discover_files(dir, &include_set)?;
    if files.is_empty() {
        return Err(BuildError::NoInputData(format!(
            "no source files matching {:?} in {}",
            include_globs,
            dir.display()
        )));
    }

    let mut report = LoadReport::default();
    for path in &files {
        report.files_scanned += 1;
        load_file(path, &mut report);
    }

    info!(
        files = report.files_scanned,
        documents = report.documents.len(),
        rejected = report.rejections.len(),
        "loaded knowledge base"
    );
    Ok(report)
}

fn discover_files(dir: &Path, include_set: &GlobSet) -> Result<Vec<PathBuf>, BuildError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| BuildError::NoInputData(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if include_set.is_match(name.as_ref()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn load_file(path: &Path, report: &mut LoadReport) {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => return report.reject(&file_name, None, format!("unreadable: {}", e)),
    };

    let records = match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Array(records)) => records,
        Ok(_) => return report.reject(&file_name, None, "top-level value is not a list"),
        Err(e) => return report.reject(&file_name, None, format!("invalid JSON: {}", e)),
    };

    debug!(file = %file_name, records = records.len(), "parsing source file");

    for (position, record) in records.into_iter().enumerate() {
        match parse_record(record, &file_name) {
            Ok(doc) => report.documents.push(doc),
            Err(reason) => report.reject(&file_name, Some(position), reason),
        }
    }
}

fn parse_record(record: Value, file_name: &str) -> Result<SourceDocument, String> {
    let Value::Object(mut fields) = record else {
        return Err("record is not an object".to_string());
    };
    fields.insert(
        "source_file".to_string(),
        Value::String(file_name.to_string()),
    );
    let doc: SourceDocument =
        serde_json::from_value(Value::Object(fields)).map_err(|e| e.to_string())?;
    doc.validate()?;
    Ok(doc)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
