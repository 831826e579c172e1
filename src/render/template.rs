//! Template collaborator and the placeholder context handed to it.

use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RenderError;
use crate::records::Record;

/// Placeholders every template can rely on, resolved from same-named record fields.
pub const DEFAULT_FIELDS: [&str; 7] = [
    "name", "location", "county", "admin", "address", "phone", "email",
];

/// Key under which the untouched record is exposed to templates.
pub const RECORD_KEY: &str = "record";

const TEMPLATE_NAME: &str = "message";

/// Renders a rich (HTML) body from a context object.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, context: &Value) -> Result<String, RenderError>;
}

/// File-backed Handlebars template.
///
/// Strict mode is on: referencing a value the context does not hold is a
/// render error, not an empty string. Output is HTML-escaped.
pub struct HandlebarsTemplate {
    registry: Handlebars<'static>,
    path: PathBuf,
}

impl HandlebarsTemplate {
    /// Load and compile a template from disk.
    pub fn from_file(path: &Path) -> Result<Self, RenderError> {
        let source = std::fs::read_to_string(path).map_err(|e| RenderError::TemplateLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_source(path, &source)
    }

    /// Compile a template from an in-memory string. `path` is used for messages only.
    pub fn from_source(path: &Path, source: &str) -> Result<Self, RenderError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        registry
            .register_template_string(TEMPLATE_NAME, source)
            .map_err(|e| RenderError::TemplateLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        debug!(path = %path.display(), "Template compiled");
        Ok(Self {
            registry,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemplateEngine for HandlebarsTemplate {
    fn render(&self, context: &Value) -> Result<String, RenderError> {
        self.registry
            .render(TEMPLATE_NAME, context)
            .map_err(|e| RenderError::Template(e.to_string()))
    }
}

/// One named placeholder with the value used when a record lacks it.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub name: String,
    pub default: Value,
}

impl Placeholder {
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: default.into(),
        }
    }
}

/// The enumerated set of placeholders a template is rendered with.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSchema {
    fields: Vec<Placeholder>,
}

impl Default for ContextSchema {
    fn default() -> Self {
        Self {
            fields: DEFAULT_FIELDS
                .iter()
                .map(|name| Placeholder::new(*name, ""))
                .collect(),
        }
    }
}

impl ContextSchema {
    pub fn new(fields: Vec<Placeholder>) -> Self {
        Self { fields }
    }

    /// Parse a comma-separated field list; every field defaults to `""`.
    pub fn from_field_list(raw: &str) -> Self {
        let mut fields: Vec<Placeholder> = Vec::new();
        for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !fields.iter().any(|f| f.name == name) {
                fields.push(Placeholder::new(name, ""));
            }
        }
        Self { fields }
    }

    /// Replace the default of one field, adding the field if absent.
    pub fn with_default(mut self, name: &str, default: impl Into<Value>) -> Self {
        let default = default.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => field.default = default,
            None => self.fields.push(Placeholder::new(name, default)),
        }
        self
    }

    pub fn fields(&self) -> &[Placeholder] {
        &self.fields
    }

    /// Build the template context for one record.
    ///
    /// Each placeholder takes the record's scalar value for the same key
    /// (exact match first, then case-insensitive), else its default. The whole
    /// record is also available under [`RECORD_KEY`].
    pub fn build(&self, record: &Record) -> Value {
        let mut context = Map::new();
        for field in &self.fields {
            let value = lookup_scalar(record, &field.name).unwrap_or_else(|| field.default.clone());
            context.insert(field.name.clone(), value);
        }
        if !context.contains_key(RECORD_KEY) {
            context.insert(RECORD_KEY.to_string(), Value::Object(record.clone()));
        }
        Value::Object(context)
    }
}

fn lookup_scalar(record: &Record, name: &str) -> Option<Value> {
    let value = record.get(name).or_else(|| {
        record
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })?;
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Some(value.clone()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Synthetic record used for single test messages.
pub fn test_record(recipient: &str) -> Record {
    let mut record = Record::new();
    record.insert("name".into(), "Test Recipient".into());
    for field in ["location", "county", "admin", "address", "phone"] {
        record.insert(field.into(), "N/A".into());
    }
    record.insert("email".into(), recipient.into());
    record
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    // ── ContextSchema ───────────────────────────────────────────────

    #[test]
    fn default_schema_fields() {
        let schema = ContextSchema::default();
        let names: Vec<&str> = schema
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, DEFAULT_FIELDS.to_vec());
    }

    #[test]
    fn missing_fields_get_defaults() {
        let ctx = ContextSchema::default().build(&record(json!({"name": "Ana"})));
        assert_eq!(ctx["name"], "Ana");
        assert_eq!(ctx["phone"], "");
    }

    #[test]
    fn case_insensitive_field_lookup() {
        let ctx = ContextSchema::default().build(&record(json!({"Name": "Ana", "PHONE": 123})));
        assert_eq!(ctx["name"], "Ana");
        assert_eq!(ctx["phone"], 123);
    }

    #[test]
    fn non_scalar_values_fall_back_to_default() {
        let schema = ContextSchema::default().with_default("address", "unknown");
        let ctx = schema.build(&record(json!({"address": {"street": "Main"}, "name": null})));
        assert_eq!(ctx["address"], "unknown");
        assert_eq!(ctx["name"], "");
    }

    #[test]
    fn raw_record_exposed() {
        let ctx = ContextSchema::default().build(&record(json!({"Company": "Acme"})));
        assert_eq!(ctx[RECORD_KEY]["Company"], "Acme");
    }

    #[test]
    fn field_list_parsing_dedups_and_trims() {
        let schema = ContextSchema::from_field_list(" name, city ,,name ");
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["name", "city"]);
    }

    #[test]
    fn with_default_adds_new_field() {
        let schema = ContextSchema::new(vec![]).with_default("count", 0);
        let ctx = schema.build(&Record::new());
        assert_eq!(ctx["count"], 0);
    }

    #[test]
    fn test_record_shape() {
        let rec = test_record("qa@example.com");
        assert_eq!(rec["name"], "Test Recipient");
        assert_eq!(rec["county"], "N/A");
        assert_eq!(rec["email"], "qa@example.com");
    }

    // ── HandlebarsTemplate ──────────────────────────────────────────

    #[test]
    fn renders_placeholders_with_escaping() {
        let tpl = HandlebarsTemplate::from_source(
            Path::new("inline.html"),
            "<p>Hello {{name}}</p>",
        )
        .unwrap();
        let html = tpl.render(&json!({"name": "Tom & Jerry"})).unwrap();
        assert_eq!(html, "<p>Hello Tom &amp; Jerry</p>");
    }

    #[test]
    fn strict_mode_rejects_unknown_placeholder() {
        let tpl =
            HandlebarsTemplate::from_source(Path::new("inline.html"), "{{nickname}}").unwrap();
        let err = tpl.render(&json!({"name": "x"})).unwrap_err();
        assert!(matches!(err, RenderError::Template(_)));
    }

    #[test]
    fn syntax_error_reported_at_load() {
        let err = HandlebarsTemplate::from_source(Path::new("bad.html"), "{{#if name}}open")
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::TemplateLoad { .. }));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.html");
        std::fs::write(&path, "<b>{{email}}</b>").unwrap();
        let tpl = HandlebarsTemplate::from_file(&path).unwrap();
        assert_eq!(tpl.path(), path.as_path());
        assert_eq!(tpl.render(&json!({"email": "a@b.com"})).unwrap(), "<b>a@b.com</b>");
    }

    #[test]
    fn missing_file_is_load_error() {
        let err = HandlebarsTemplate::from_file(Path::new("/no/such/template.html"))
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::TemplateLoad { .. }));
    }
}
