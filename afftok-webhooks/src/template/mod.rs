//! `{{a.b.c}}` template substitution over a structured context (4.J).

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unbalanced template braces")]
    UnbalancedBraces,
    #[error("invalid template key '{0}'")]
    InvalidKey(String),
}

/// Top-level keys are `click`, `conversion`, `user_offer`, `offer`, `user`,
/// `postback`, `custom`, plus scalars `timestamp`, `timestamp_iso`,
/// `correlation_id`, `task_id`.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    root: Value,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self { root: Value::Object(serde_json::Map::new()) }
    }

    pub fn set(&mut self, key: &str, value: Value) -> &mut Self {
        if let Value::Object(map) = &mut self.root {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn scalars(&mut self, timestamp: chrono::DateTime<chrono::Utc>, correlation_id: &str, task_id: &str) -> &mut Self {
        self.set("timestamp", Value::from(timestamp.timestamp()));
        self.set("timestamp_iso", Value::from(timestamp.to_rfc3339()));
        self.set("correlation_id", Value::from(correlation_id));
        self.set("task_id", Value::from(task_id));
        self
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        if let Value::Object(map) = &self.root {
            if let Some(v) = map.get(key) {
                return Some(v);
            }
        }

        let mut cursor = &self.root;
        for part in key.split('.') {
            cursor = cursor.as_object()?.get(part)?;
        }
        Some(cursor)
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Renders every `{{key}}` occurrence in `template` against `ctx`. Missing
/// keys resolve to an empty string; malformed keys or unbalanced braces
/// are rejected up front.
pub fn render(template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
    if template.matches("{{").count() != template.matches("}}").count() {
        return Err(TemplateError::UnbalancedBraces);
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            return Err(TemplateError::UnbalancedBraces);
        };
        let key = after_open[..end].trim();

        if !is_valid_key(key) {
            return Err(TemplateError::InvalidKey(key.to_string()));
        }

        let rendered = ctx.lookup(key).map(format_value).unwrap_or_default();
        out.push_str(&rendered);

        rest = &after_open[end + 2..];
    }
    out.push_str(rest);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_click() -> TemplateContext {
        let mut ctx = TemplateContext::new();
        ctx.set("click", serde_json::json!({"id": "c-1", "ip": "1.2.3.4"}));
        ctx.scalars(chrono::Utc::now(), "corr-1", "task-1");
        ctx
    }

    #[test]
    fn renders_nested_key() {
        let ctx = ctx_with_click();
        let out = render("click id is {{click.id}}", &ctx).unwrap();
        assert_eq!(out, "click id is c-1");
    }

    #[test]
    fn missing_key_renders_empty() {
        let ctx = ctx_with_click();
        let out = render("offer: {{offer.name}}", &ctx).unwrap();
        assert_eq!(out, "offer: ");
    }

    #[test]
    fn rejects_unbalanced_braces() {
        let ctx = ctx_with_click();
        let result = render("oops {{click.id", &ctx);
        assert!(matches!(result, Err(TemplateError::UnbalancedBraces)));
    }

    #[test]
    fn rejects_invalid_key() {
        let ctx = ctx_with_click();
        let result = render("{{9bad}}", &ctx);
        assert!(matches!(result, Err(TemplateError::InvalidKey(_))));
    }
}
