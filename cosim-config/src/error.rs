//! Errors raised while loading a link configuration

use std::path::PathBuf;
use thiserror::Error;
use validator::{ValidationErrors, ValidationErrorsKind};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Link configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// One or more fields failed validation. Nested sections are reported by
    /// their dotted path, e.g. `link.sync_delay`.
    #[error("Rejected link configuration:\n{}", format_validation_errors(.0))]
    Validation(#[source] ValidationErrors),

    /// The slot layout or another constraint spanning several fields.
    #[error("Unusable link configuration: {0}")]
    Invalid(String),

    /// YAML syntax, a malformed duration, or a bad `COSIM_*` override.
    #[error("Could not parse link configuration: {0}")]
    Parsing(#[from] Box<figment::Error>),
}

/// One `path: code` line per failed check, sorted by path.
fn format_validation_errors(errors: &ValidationErrors) -> String {
    let mut lines = Vec::new();
    collect_field_errors("", errors, &mut lines);
    lines.sort();
    lines.join("\n")
}

fn collect_field_errors(prefix: &str, errors: &ValidationErrors, lines: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(failures) => {
                for failure in failures {
                    let reason = failure.message.as_ref().unwrap_or(&failure.code);
                    lines.push(format!("  {path}: {reason}"));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect_field_errors(&path, inner, lines),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_field_errors(&format!("{path}[{index}]"), inner, lines);
                }
            }
        }
    }
}

impl From<ValidationErrors> for ConfigError {
    fn from(errors: ValidationErrors) -> Self {
        ConfigError::Validation(errors)
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Parsing(Box::new(err))
    }
}
