//! First-order `{{.field}}` substitution over a parameter set.

use std::sync::LazyLock;

use glob::Pattern;
use regex::Regex;
use thiserror::Error;

use crate::params::ParameterSet;

// A placeholder is `{{` `.name` `}}` with optional inner whitespace.
static RE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").unwrap()
});

/// Errors raised while resolving a template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Template '{template}' references unbound field '{field}'")]
    UnboundField { field: String, template: String },

    #[error("Template '{template}' has a malformed placeholder at byte {position}")]
    Malformed { template: String, position: usize },

    #[error("Template '{template}' binds field '{field}' to an empty path segment")]
    EmptyField { field: String, template: String },
}

impl TemplateError {
    /// The field name for unbound-field errors.
    pub fn field(&self) -> Option<&str> {
        match self {
            TemplateError::UnboundField { field, .. } | TemplateError::EmptyField { field, .. } => {
                Some(field)
            }
            TemplateError::Malformed { .. } => None,
        }
    }
}

/// Substitutes every placeholder in `template` with its value from `params`.
///
/// Fields that are not referenced are ignored. A referenced field that is
/// absent fails the whole resolution rather than substituting an empty string.
pub fn resolve(template: &str, params: &ParameterSet) -> Result<String, TemplateError> {
    substitute(template, params, |_, value| Ok(value.to_string()))
}

/// Like [`resolve`], for templates that become glob patterns.
///
/// Values are inserted literally: glob metacharacters in a value are escaped,
/// and an empty value fails instead of collapsing its path segment.
pub fn resolve_path(template: &str, params: &ParameterSet) -> Result<String, TemplateError> {
    substitute(template, params, |field, value| {
        if value.trim().is_empty() {
            return Err(TemplateError::EmptyField {
                field: field.to_string(),
                template: template.to_string(),
            });
        }
        Ok(Pattern::escape(value))
    })
}

fn substitute<F>(template: &str, params: &ParameterSet, render: F) -> Result<String, TemplateError>
where
    F: Fn(&str, &str) -> Result<String, TemplateError>,
{
    let mut output = String::with_capacity(template.len());
    let mut cursor = 0;

    for caps in RE_PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        check_literal(template, cursor, whole.start())?;
        output.push_str(&template[cursor..whole.start()]);

        let field = &caps[1];
        match params.get(field) {
            Some(value) => output.push_str(&render(field, value)?),
            None => {
                return Err(TemplateError::UnboundField {
                    field: field.to_string(),
                    template: template.to_string(),
                })
            }
        }
        cursor = whole.end();
    }

    check_literal(template, cursor, template.len())?;
    output.push_str(&template[cursor..]);
    Ok(output)
}

/// Lists the fields referenced by `template`, in order of first appearance.
pub fn referenced_fields(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut fields: Vec<String> = Vec::new();
    let mut cursor = 0;

    for caps in RE_PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        check_literal(template, cursor, whole.start())?;
        let field = caps[1].to_string();
        if !fields.contains(&field) {
            fields.push(field);
        }
        cursor = whole.end();
    }
    check_literal(template, cursor, template.len())?;

    Ok(fields)
}

/// Returns true if the template contains at least one placeholder.
pub fn has_placeholders(template: &str) -> bool {
    RE_PLACEHOLDER.is_match(template)
}

/// Byte offset just past the last placeholder, if any.
pub fn last_placeholder_end(template: &str) -> Option<usize> {
    RE_PLACEHOLDER.find_iter(template).last().map(|m| m.end())
}

// Literal runs between placeholders must not contain a stray `{{`.
fn check_literal(template: &str, start: usize, end: usize) -> Result<(), TemplateError> {
    match template[start..end].find("{{") {
        Some(offset) => Err(TemplateError::Malformed {
            template: template.to_string(),
            position: start + offset,
        }),
        None => Ok(()),
    }
}
