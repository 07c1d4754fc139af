//! Template rendering for values, resource names and return-value formats
//!
//! Templates use Jinja syntax. Undefined variables are errors, never empty
//! strings. On top of the minijinja built-ins the environment provides
//! `to_yaml`, `to_json`, `b64enc`, `b64dec`, `quote`, `trunc`, `trim_prefix`
//! and `trim_suffix` filters plus a `required(value, message)` function.

use crate::core::document::{display_value, from_yaml, Document, DocumentMap};
use base64::Engine as _;
use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};
use thiserror::Error as ThisError;

/// Errors raised while rendering templates
#[derive(Debug, ThisError)]
pub enum TemplateError {
    #[error("failed to render template: {0}")]
    Render(String),

    #[error("values template produced invalid YAML: {0}")]
    Yaml(String),

    #[error("values template must produce a mapping, got: {0}")]
    NotAMapping(String),
}

impl From<Error> for TemplateError {
    fn from(err: Error) -> Self {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        TemplateError::Render(message)
    }
}

/// Renders templates against document contexts
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("to_yaml", to_yaml);
        env.add_filter("to_json", to_json);
        env.add_filter("b64enc", b64enc);
        env.add_filter("b64dec", b64dec);
        env.add_filter("quote", quote);
        env.add_filter("trunc", trunc);
        env.add_filter("trim_prefix", trim_prefix);
        env.add_filter("trim_suffix", trim_suffix);
        env.add_function("required", required);
        Self { env }
    }

    /// Render a template to text
    pub fn render(&self, template: &str, context: &Document) -> Result<String, TemplateError> {
        Ok(self.env.render_str(template, context)?)
    }

    /// Render a values template and parse its output as a YAML mapping.
    /// Blank output is an empty mapping.
    pub fn render_values(&self, template: &str, context: &Document) -> Result<DocumentMap, TemplateError> {
        let rendered = self.render(template, context)?;
        if rendered.trim().is_empty() {
            return Ok(DocumentMap::new());
        }

        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&rendered).map_err(|e| TemplateError::Yaml(e.to_string()))?;
        match from_yaml(yaml).map_err(|e| TemplateError::Yaml(e.to_string()))? {
            Document::Object(map) => Ok(map),
            Document::Null => Ok(DocumentMap::new()),
            other => Err(TemplateError::NotAMapping(display_value(&other))),
        }
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidOperation, message.into())
}

fn to_yaml(value: Value) -> Result<String, Error> {
    serde_yaml::to_string(&value)
        .map(|s| s.trim_end().to_string())
        .map_err(|e| invalid(format!("to_yaml: {}", e)))
}

fn to_json(value: Value) -> Result<String, Error> {
    serde_json::to_string(&value).map_err(|e| invalid(format!("to_json: {}", e)))
}

fn b64enc(value: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.as_bytes())
}

fn b64dec(value: String) -> Result<String, Error> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| invalid(format!("b64dec: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| invalid(format!("b64dec: {}", e)))
}

fn quote(value: Value) -> String {
    format!("\"{}\"", value.to_string().replace('"', "\\\""))
}

fn trunc(value: String, length: usize) -> String {
    value.chars().take(length).collect()
}

fn trim_prefix(value: String, prefix: String) -> String {
    value
        .strip_prefix(prefix.as_str())
        .map(str::to_string)
        .unwrap_or(value)
}

fn trim_suffix(value: String, suffix: String) -> String {
    value
        .strip_suffix(suffix.as_str())
        .map(str::to_string)
        .unwrap_or(value)
}

fn required(value: Value, message: Option<String>) -> Result<Value, Error> {
    let missing = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(|s| s.is_empty());
    if missing {
        return Err(invalid(message.unwrap_or_else(|| "required value is missing".to_string())));
    }
    Ok(value)
}

/// Apply positional verbs (`%s`, `%v`, `%d`) to `args` in order.
///
/// `%%` is a literal percent sign. A verb without a matching argument
/// renders as `%!v(MISSING)`; surplus arguments are ignored.
pub fn format_positional(format: &str, args: &[Document]) -> String {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('s' | 'v' | 'd')) => match args.next() {
                Some(arg) => out.push_str(&display_value(arg)),
                None => {
                    out.push_str("%!");
                    out.push(verb);
                    out.push_str("(MISSING)");
                }
            },
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push_str("%!(NOVERB)"),
        }
    }

    out
}
