//! Line-delimited JSON datasets.
//!
//! A dataset is an ordered sequence of JSON objects, one per line. Records
//! are never rewritten after a task is created; annotations point at them by
//! zero-based position.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::models::{FieldConfig, Record};

/// Extensions treated as file references before field types are declared.
const FILE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".pdf"];

/// Parses JSONL content. Whitespace-only lines are skipped.
///
/// Fails on the first line that is not a JSON object; nothing parsed before
/// it is returned.
pub fn load(content: &str) -> AppResult<Vec<Record>> {
    let mut records = Vec::new();
    for (i, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).map_err(|e| AppError::Parse {
            line: i + 1,
            message: e.to_string(),
        })?;
        match value {
            Value::Object(map) => records.push(map),
            other => {
                return Err(AppError::Parse {
                    line: i + 1,
                    message: format!("expected a JSON object, got {}", type_name(&other)),
                })
            }
        }
    }
    Ok(records)
}

pub fn load_file(path: &Path) -> AppResult<Vec<Record>> {
    let content = std::fs::read_to_string(path).map_err(|e| AppError::io(path, e))?;
    load(&content)
}

/// Writes one compact JSON object per line, overwriting `path`.
pub fn save(records: &[Record], path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
        }
    }
    let file = std::fs::File::create(path).map_err(|e| AppError::io(path, e))?;
    let mut out = std::io::BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n").map_err(|e| AppError::io(path, e))?;
    }
    out.flush().map_err(|e| AppError::io(path, e))?;
    Ok(())
}

/// Field names of the first record, in file order.
pub fn field_names(records: &[Record]) -> Vec<String> {
    records
        .first()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default()
}

/// Resolves a file reference against a base path. An empty base leaves the
/// value as given.
pub fn resolve_path(base_path: &str, value: &str) -> PathBuf {
    if base_path.is_empty() {
        PathBuf::from(value)
    } else {
        Path::new(base_path).join(value)
    }
}

/// Result of [`validate_paths`]. Entries read `record {n} field {name}: {value}`
/// with `n` 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathReport {
    pub missing: Vec<String>,
    pub invalid: Vec<String>,
}

impl PathReport {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.invalid.is_empty()
    }
}

/// Checks that every image/PDF reference exists under `base_path`.
///
/// With `field_configs`, only fields declared `image` or `pdf` are checked.
/// Without, any string value ending in a known file extension is. A missing
/// file goes to `missing`; a non-string or empty value, or a path that is a
/// directory, goes to `invalid`. Never fails.
pub fn validate_paths(
    records: &[Record],
    base_path: &str,
    field_configs: Option<&BTreeMap<String, FieldConfig>>,
) -> PathReport {
    let mut report = PathReport::default();

    for (i, record) in records.iter().enumerate() {
        for (key, value) in record {
            let declared = match field_configs {
                Some(configs) => match configs.get(key) {
                    Some(cfg) if cfg.kind.is_file_reference() => true,
                    _ => continue,
                },
                None => false,
            };

            let path_str = match value.as_str() {
                Some(s) if !s.trim().is_empty() => s,
                _ => {
                    if declared {
                        report
                            .invalid
                            .push(format!("record {} field {}: {}", i + 1, key, value));
                    }
                    continue;
                }
            };

            if !declared && !looks_like_file(path_str) {
                continue;
            }

            let full = resolve_path(base_path, path_str);
            if !full.exists() {
                report
                    .missing
                    .push(format!("record {} field {}: {}", i + 1, key, path_str));
            } else if full.is_dir() {
                report
                    .invalid
                    .push(format!("record {} field {}: {} is a directory", i + 1, key, path_str));
            }
        }
    }

    if !report.is_clean() {
        tracing::warn!(
            missing = report.missing.len(),
            invalid = report.invalid.len(),
            "dataset references files that cannot be rendered"
        );
    }
    report
}

fn looks_like_file(value: &str) -> bool {
    let lower = value.to_lowercase();
    FILE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldType;
    use tempfile::TempDir;

    #[test]
    fn load_skips_blank_lines() {
        let records = load("{\"a\": 1}\n\n   \n{\"a\": 2}\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["a"], 2);
    }

    #[test]
    fn load_keeps_field_order() {
        let records = load("{\"zeta\": 1, \"alpha\": 2, \"mid\": 3}").unwrap();
        assert_eq!(field_names(&records), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn load_reports_line_of_bad_json() {
        let err = load("{\"a\": 1}\n{\"a\": 2}\n{\"a\": \n{\"a\": 4}").unwrap_err();
        match err {
            AppError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn load_counts_blank_lines_in_line_number() {
        let err = load("{\"a\": 1}\n\nnot json").unwrap_err();
        assert!(matches!(err, AppError::Parse { line: 3, .. }));
    }

    #[test]
    fn load_rejects_non_object_line() {
        let err = load("{\"a\": 1}\n[1, 2]").unwrap_err();
        match err {
            AppError::Parse { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("an array"));
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/out.jsonl");
        let content = "{\"q\": \"SELECT 1\", \"n\": 1.5, \"tags\": [\"x\"], \"meta\": {\"k\": null}}\n{\"q\": \"中文\", \"n\": -3}\n";
        let records = load(content).unwrap();
        save(&records, &path).unwrap();
        let again = load_file(&path).unwrap();
        assert_eq!(records, again);
        assert_eq!(field_names(&again), vec!["q", "n", "tags", "meta"]);
    }

    #[test]
    fn save_overwrites() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.jsonl");
        save(&load("{\"a\":1}\n{\"a\":2}").unwrap(), &path).unwrap();
        save(&load("{\"b\":1}").unwrap(), &path).unwrap();
        assert_eq!(load_file(&path).unwrap().len(), 1);
    }

    #[test]
    fn validate_reports_missing_image_once() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("ok.png"), b"png").unwrap();
        let records = load("{\"img\": \"ok.png\"}\n{\"img\": \"gone.png\"}").unwrap();
        let mut configs = BTreeMap::new();
        configs.insert("img".to_string(), FieldConfig::new(FieldType::Image));

        let report = validate_paths(&records, &tmp.path().to_string_lossy(), Some(&configs));
        assert_eq!(report.missing, vec!["record 2 field img: gone.png"]);
        assert!(report.invalid.is_empty());
    }

    #[test]
    fn validate_ignores_text_fields_when_declared() {
        let records = load("{\"caption\": \"see figure.png\"}").unwrap();
        let mut configs = BTreeMap::new();
        configs.insert("caption".to_string(), FieldConfig::new(FieldType::Text));
        let report = validate_paths(&records, "/nowhere", Some(&configs));
        assert!(report.is_clean());
    }

    #[test]
    fn validate_sniffs_extensions_without_configs() {
        let records = load("{\"doc\": \"paper.PDF\", \"title\": \"hello\"}").unwrap();
        let report = validate_paths(&records, "/nowhere", None);
        assert_eq!(report.missing, vec!["record 1 field doc: paper.PDF"]);
    }

    #[test]
    fn validate_flags_non_string_and_directory_as_invalid() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("dir.pdf")).unwrap();
        let records = load("{\"doc\": 42}\n{\"doc\": \"dir.pdf\"}").unwrap();
        let mut configs = BTreeMap::new();
        configs.insert("doc".to_string(), FieldConfig::new(FieldType::Pdf));
        let report = validate_paths(&records, &tmp.path().to_string_lossy(), Some(&configs));
        assert!(report.missing.is_empty());
        assert_eq!(report.invalid.len(), 2);
        assert!(report.invalid[0].starts_with("record 1 field doc"));
    }
}
