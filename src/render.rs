//! Field rendering.
//!
//! Turns one record field into a [`RenderedField`] view model according to
//! its declared [`FieldType`]. Rendering never fails: a missing file or an
//! unknown type yields a view with a `warning`, so one bad field does not
//! block annotating the rest of the record.

use base64::Engine;
use pulldown_cmark::{html, Options, Parser};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

use crate::error::{AppError, AppResult};
use crate::jsonl::resolve_path;
use crate::models::{FieldConfig, FieldType, Record, TaskConfig};

pub const DEFAULT_CODE_LANGUAGE: &str = "sql";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedField {
    pub name: String,
    #[serde(flatten)]
    pub view: FieldView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldView {
    Text {
        body: String,
    },
    Code {
        language: String,
        body: String,
    },
    Image {
        path: String,
        mime: String,
        data_base64: String,
    },
    /// PDFs are offered for download rather than inlined.
    Pdf {
        path: String,
        file_name: String,
        size_bytes: u64,
    },
    Markdown {
        source: String,
        html: String,
    },
    /// A referenced image or PDF that is not on disk.
    Missing {
        path: String,
    },
}

/// A file read wholesale for download or inline display.
#[derive(Debug, Clone)]
pub struct Asset {
    pub path: PathBuf,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Renders one field. `base_path` resolves image and PDF references.
pub fn render_field(name: &str, config: &FieldConfig, value: &Value, base_path: &str) -> RenderedField {
    let text = value_text(value);
    let (view, warning) = match &config.kind {
        FieldType::Text => (FieldView::Text { body: text }, None),
        FieldType::Code => (
            FieldView::Code {
                language: config
                    .language
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CODE_LANGUAGE.to_string()),
                body: text,
            },
            None,
        ),
        FieldType::Markdown => (
            FieldView::Markdown {
                html: markdown_to_html(&text),
                source: text,
            },
            None,
        ),
        FieldType::Image => match read_asset(base_path, &text) {
            Ok(asset) => (
                FieldView::Image {
                    path: text,
                    mime: asset.mime,
                    data_base64: base64::engine::general_purpose::STANDARD.encode(&asset.bytes),
                },
                None,
            ),
            Err(e) => missing(text, e),
        },
        FieldType::Pdf => {
            let full = resolve_path(base_path, &text);
            match std::fs::metadata(&full) {
                Ok(meta) if meta.is_file() => (
                    FieldView::Pdf {
                        file_name: file_name_of(&full),
                        size_bytes: meta.len(),
                        path: text,
                    },
                    None,
                ),
                _ => missing(text, AppError::MissingResource { path: full }),
            }
        }
        FieldType::Other(kind) => (
            FieldView::Text { body: text },
            Some(format!("unsupported field type '{}', shown as text", kind)),
        ),
    };

    RenderedField {
        name: name.to_string(),
        view,
        warning,
    }
}

/// Renders the task's selected fields of one record, in configured order.
/// Fields the record lacks are skipped.
pub fn render_record(record: &Record, config: &TaskConfig) -> Vec<RenderedField> {
    let fallback = FieldConfig::new(FieldType::Text);
    config
        .selected_fields
        .iter()
        .filter_map(|name| {
            let value = record.get(name)?;
            let rendered = match config.field_configs.get(name) {
                Some(cfg) => render_field(name, cfg, value, &config.base_path),
                None => {
                    let mut r = render_field(name, &fallback, value, &config.base_path);
                    r.warning = Some("no field type configured, shown as text".to_string());
                    r
                }
            };
            if let Some(w) = &rendered.warning {
                tracing::warn!(field = %name, warning = %w, "field rendered with warning");
            }
            Some(rendered)
        })
        .collect()
}

/// Reads a referenced file for display or download.
pub fn read_asset(base_path: &str, value: &str) -> AppResult<Asset> {
    let path = resolve_path(base_path, value);
    if value.trim().is_empty() || !path.is_file() {
        return Err(AppError::MissingResource { path });
    }
    let bytes = std::fs::read(&path).map_err(|e| AppError::io(&path, e))?;
    Ok(Asset {
        file_name: file_name_of(&path),
        mime: mime_guess::from_path(&path)
            .first_or_octet_stream()
            .to_string(),
        bytes,
        path,
    })
}

pub fn markdown_to_html(source: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(source, options);
    let mut out = String::with_capacity(source.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Strings verbatim; anything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn missing(path: String, err: AppError) -> (FieldView, Option<String>) {
    (FieldView::Missing { path }, Some(err.to_string()))
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

impl fmt::Display for RenderedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.view {
            FieldView::Text { body } => write!(f, "[{}]\n{}", self.name, body)?,
            FieldView::Code { language, body } => {
                write!(f, "[{}] ({})\n{}", self.name, language, body)?
            }
            FieldView::Markdown { source, .. } => write!(f, "[{}] (markdown)\n{}", self.name, source)?,
            FieldView::Image {
                path,
                mime,
                data_base64,
            } => write!(
                f,
                "[{}] image {} ({}, {} base64 chars)",
                self.name,
                path,
                mime,
                data_base64.len()
            )?,
            FieldView::Pdf {
                path, size_bytes, ..
            } => write!(f, "[{}] pdf {} ({} bytes)", self.name, path, size_bytes)?,
            FieldView::Missing { path } => write!(f, "[{}] missing file {}", self.name, path)?,
        }
        if let Some(w) = &self.warning {
            write!(f, "\n  warning: {}", w)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnnotationConfig;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn text_is_verbatim() {
        let r = render_field("q", &FieldConfig::new(FieldType::Text), &json!("  hi\n"), "");
        assert_eq!(
            r.view,
            FieldView::Text {
                body: "  hi\n".to_string()
            }
        );
        assert!(r.warning.is_none());
    }

    #[test]
    fn non_string_values_render_as_json() {
        let r = render_field("n", &FieldConfig::new(FieldType::Text), &json!([1, 2]), "");
        assert_eq!(
            r.view,
            FieldView::Text {
                body: "[1,2]".to_string()
            }
        );
    }

    #[test]
    fn code_defaults_to_sql() {
        let r = render_field("c", &FieldConfig::new(FieldType::Code), &json!("SELECT 1"), "");
        assert_eq!(
            r.view,
            FieldView::Code {
                language: "sql".to_string(),
                body: "SELECT 1".to_string()
            }
        );
        let r = render_field("c", &FieldConfig::code("python"), &json!("pass"), "");
        assert!(matches!(r.view, FieldView::Code { ref language, .. } if language == "python"));
    }

    #[test]
    fn markdown_renders_html() {
        let r = render_field(
            "m",
            &FieldConfig::new(FieldType::Markdown),
            &json!("# Title\n\n**bold**"),
            "",
        );
        match r.view {
            FieldView::Markdown { html, source } => {
                assert!(html.contains("<h1>Title</h1>"));
                assert!(html.contains("<strong>bold</strong>"));
                assert!(source.starts_with("# Title"));
            }
            other => panic!("unexpected view {:?}", other),
        }
    }

    #[test]
    fn image_is_inlined_with_mime() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("cat.png"), [1u8, 2, 3]).unwrap();
        let base = tmp.path().to_string_lossy().to_string();
        let r = render_field("img", &FieldConfig::new(FieldType::Image), &json!("cat.png"), &base);
        assert_eq!(
            r.view,
            FieldView::Image {
                path: "cat.png".to_string(),
                mime: "image/png".to_string(),
                data_base64: "AQID".to_string()
            }
        );
    }

    #[test]
    fn missing_image_is_a_warning_not_an_error() {
        let r = render_field(
            "img",
            &FieldConfig::new(FieldType::Image),
            &json!("nope.png"),
            "/definitely/not/here",
        );
        assert_eq!(
            r.view,
            FieldView::Missing {
                path: "nope.png".to_string()
            }
        );
        assert!(r.warning.unwrap().contains("file not found"));
    }

    #[test]
    fn pdf_offers_download() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("paper.pdf"), b"%PDF-1.4").unwrap();
        let base = tmp.path().to_string_lossy().to_string();
        let r = render_field("doc", &FieldConfig::new(FieldType::Pdf), &json!("paper.pdf"), &base);
        assert_eq!(
            r.view,
            FieldView::Pdf {
                path: "paper.pdf".to_string(),
                file_name: "paper.pdf".to_string(),
                size_bytes: 8
            }
        );

        let asset = read_asset(&base, "paper.pdf").unwrap();
        assert_eq!(asset.mime, "application/pdf");
        assert_eq!(asset.bytes, b"%PDF-1.4");
    }

    #[test]
    fn unknown_type_falls_back_to_text_with_warning() {
        let cfg = FieldConfig::new(FieldType::Other("audio".to_string()));
        let r = render_field("a", &cfg, &json!("clip.wav"), "");
        assert!(matches!(r.view, FieldView::Text { .. }));
        assert!(r.warning.unwrap().contains("audio"));
    }

    #[test]
    fn record_renders_selected_fields_in_order() {
        let record = crate::jsonl::load("{\"a\": \"1\", \"b\": \"2\", \"c\": \"3\"}")
            .unwrap()
            .remove(0);
        let mut field_configs = BTreeMap::new();
        field_configs.insert("a".to_string(), FieldConfig::new(FieldType::Text));
        field_configs.insert("c".to_string(), FieldConfig::code("json"));
        let config = TaskConfig {
            field_configs,
            selected_fields: vec!["c".to_string(), "missing".to_string(), "a".to_string()],
            annotation_config: AnnotationConfig::TextInput {
                placeholder: String::new(),
                instruction: String::new(),
            },
            base_path: String::new(),
            total_items: 1,
        };
        let names: Vec<String> = render_record(&record, &config)
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["c", "a"]);
    }

    #[test]
    fn serialized_view_is_flat() {
        let r = render_field("q", &FieldConfig::new(FieldType::Text), &json!("x"), "");
        assert_eq!(
            serde_json::to_value(&r).unwrap(),
            json!({"name": "q", "kind": "text", "body": "x"})
        );
    }
}
