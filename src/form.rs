//! Annotation form generation.
//!
//! Maps a task's [`AnnotationConfig`] to a [`FormControl`] describing the
//! input widget and its current value, and turns a submitted value back into
//! a typed [`AnnotationResult`].

use serde::Serialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::{AnnotationConfig, AnnotationResult};

/// Identifier of the control for one record of one task. Unique per
/// (task, index) so state of one record's control never leaks into another.
pub fn control_key(task_id: &str, data_index: u64) -> String {
    format!("annotation_{}_{}", task_id, data_index)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "control", rename_all = "snake_case")]
pub enum FormControl {
    SingleChoice {
        key: String,
        options: Vec<String>,
        selected: Option<String>,
    },
    MultipleChoice {
        key: String,
        options: Vec<String>,
        selected: Vec<String>,
    },
    Rating {
        key: String,
        min: i64,
        max: i64,
        value: i64,
    },
    TextInput {
        key: String,
        placeholder: String,
        value: String,
    },
}

impl FormControl {
    pub fn key(&self) -> &str {
        match self {
            FormControl::SingleChoice { key, .. }
            | FormControl::MultipleChoice { key, .. }
            | FormControl::Rating { key, .. }
            | FormControl::TextInput { key, .. } => key,
        }
    }

    /// The value the control currently holds, as an annotation result.
    /// A single choice with nothing selected has no value.
    pub fn current(&self) -> Option<AnnotationResult> {
        match self {
            FormControl::SingleChoice { selected, .. } => {
                selected.clone().map(AnnotationResult::Choice)
            }
            FormControl::MultipleChoice { selected, .. } => {
                Some(AnnotationResult::MultiChoice(selected.clone()))
            }
            FormControl::Rating { value, .. } => Some(AnnotationResult::Rating(*value)),
            FormControl::TextInput { value, .. } => Some(AnnotationResult::Text(value.clone())),
        }
    }
}

/// Builds the control for `config`, pre-filled from a prior result.
///
/// Priors of the wrong shape are ignored; a prior choice that is no longer
/// among the options is dropped and a prior rating is clamped into range.
pub fn build_control(
    key: impl Into<String>,
    config: &AnnotationConfig,
    prior: Option<&AnnotationResult>,
) -> FormControl {
    let key = key.into();
    match config {
        AnnotationConfig::SingleChoice { options, .. } => {
            let selected = match prior {
                Some(AnnotationResult::Choice(c)) if options.contains(c) => Some(c.clone()),
                _ => None,
            };
            FormControl::SingleChoice {
                key,
                options: options.clone(),
                selected,
            }
        }
        AnnotationConfig::MultipleChoice { options, .. } => {
            let selected = match prior {
                Some(AnnotationResult::MultiChoice(chosen)) => in_option_order(options, chosen),
                _ => Vec::new(),
            };
            FormControl::MultipleChoice {
                key,
                options: options.clone(),
                selected,
            }
        }
        AnnotationConfig::Rating {
            min_value,
            max_value,
            ..
        } => {
            let value = match prior {
                Some(AnnotationResult::Rating(v)) => (*v).min(*max_value).max(*min_value),
                _ => *min_value,
            };
            FormControl::Rating {
                key,
                min: *min_value,
                max: *max_value,
                value,
            }
        }
        AnnotationConfig::TextInput { placeholder, .. } => {
            let value = match prior {
                Some(AnnotationResult::Text(t)) => t.clone(),
                _ => String::new(),
            };
            FormControl::TextInput {
                key,
                placeholder: placeholder.clone(),
                value,
            }
        }
    }
}

/// Parses a submitted value for `config` into a validated result.
///
/// Multiple-choice selections are normalised to presentation order.
pub fn parse_input(config: &AnnotationConfig, value: &Value) -> AppResult<AnnotationResult> {
    let result = match config {
        AnnotationConfig::SingleChoice { .. } => match value {
            Value::String(s) => AnnotationResult::Choice(s.clone()),
            Value::Null => return Err(AppError::validation("select one option")),
            other => return Err(shape_error("a single option", other)),
        },
        AnnotationConfig::MultipleChoice { options, .. } => match value {
            Value::Array(items) => {
                let chosen = items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(s.clone()),
                        other => Err(shape_error("a list of options", other)),
                    })
                    .collect::<AppResult<Vec<_>>>()?;
                check_options(options, &chosen)?;
                AnnotationResult::MultiChoice(in_option_order(options, &chosen))
            }
            Value::Null => AnnotationResult::MultiChoice(Vec::new()),
            other => return Err(shape_error("a list of options", other)),
        },
        AnnotationConfig::Rating { .. } => match value {
            Value::Number(n) => match n.as_i64() {
                Some(v) => AnnotationResult::Rating(v),
                None => return Err(shape_error("a whole number", value)),
            },
            // CLI and form posts arrive as strings
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(AnnotationResult::Rating)
                .map_err(|_| shape_error("a whole number", value))?,
            other => return Err(shape_error("a whole number", other)),
        },
        AnnotationConfig::TextInput { .. } => match value {
            Value::String(s) => AnnotationResult::Text(s.clone()),
            Value::Null => AnnotationResult::Text(String::new()),
            other => return Err(shape_error("text", other)),
        },
    };
    validate_result(config, &result)?;
    Ok(result)
}

/// Checks that `result` has the shape `config` asks for: matching type,
/// options drawn from the configured list, rating within bounds.
pub fn validate_result(config: &AnnotationConfig, result: &AnnotationResult) -> AppResult<()> {
    if config.kind() != result.kind() {
        return Err(AppError::validation(format!(
            "task expects a {} result, got {}",
            config.kind().as_str(),
            result.kind().as_str()
        )));
    }

    match (config, result) {
        (AnnotationConfig::SingleChoice { options, .. }, AnnotationResult::Choice(c)) => {
            check_options(options, std::slice::from_ref(c))
        }
        (AnnotationConfig::MultipleChoice { options, .. }, AnnotationResult::MultiChoice(cs)) => {
            check_options(options, cs)
        }
        (
            AnnotationConfig::Rating {
                min_value,
                max_value,
                ..
            },
            AnnotationResult::Rating(v),
        ) => {
            if v < min_value || v > max_value {
                return Err(AppError::validation(format!(
                    "rating {} is outside {}..={}",
                    v, min_value, max_value
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_options(options: &[String], chosen: &[String]) -> AppResult<()> {
    for c in chosen {
        if !options.contains(c) {
            return Err(AppError::validation(format!(
                "'{}' is not one of the options: {}",
                c,
                options.join(", ")
            )));
        }
    }
    Ok(())
}

fn in_option_order(options: &[String], chosen: &[String]) -> Vec<String> {
    options
        .iter()
        .filter(|o| chosen.contains(o))
        .cloned()
        .collect()
}

fn shape_error(expected: &str, got: &Value) -> AppError {
    AppError::validation(format!("expected {}, got {}", expected, got))
}
