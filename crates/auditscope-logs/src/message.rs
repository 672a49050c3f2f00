use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Upper bound on the length of an extracted message, in characters
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Separator between message fragments
const FRAGMENT_SEPARATOR: &str = " | ";

/// Separator inside the authentication node summary
const NODE_SEPARATOR: &str = " > ";

/// Realm value that denotes the root realm
const ROOT_REALM: &str = "/";

/// Number of changed field names listed before eliding the rest
const MAX_CHANGED_FIELDS: usize = 5;

static DN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:id|uid)=([^,]+),").expect("DN pattern is valid"));

/// Builds a short human-readable summary from an arbitrary log payload
pub struct MessageExtractor;

impl MessageExtractor {
    /// Summarize a payload in at most [`MAX_MESSAGE_CHARS`] characters
    pub fn extract(payload: &Value) -> String {
        match payload {
            Value::String(s) => truncate(s),
            Value::Object(fields) => Self::extract_fields(fields),
            Value::Null => String::new(),
            other => truncate(&other.to_string()),
        }
    }

    fn extract_fields(fields: &Map<String, Value>) -> String {
        let message = text(fields.get("message"));
        let has_entries = fields.get("entries").is_some_and(Value::is_array);
        let has_http = fields.get("http").is_some_and(Value::is_object);

        if let Some(message) = &message {
            if !has_entries && !has_http {
                return truncate(message);
            }
        }

        let fragments = Self::fragments(fields);
        if !fragments.is_empty() {
            return truncate(&fragments.join(FRAGMENT_SEPARATOR));
        }

        message.map(|m| truncate(&m)).unwrap_or_default()
    }

    /// Collect fragments in display priority order
    fn fragments(fields: &Map<String, Value>) -> Vec<String> {
        let mut out = Vec::new();

        out.extend(text(fields.get("eventName")));
        out.extend(text(fields.get("result")));

        let principal = match fields.get("principal") {
            Some(Value::Array(items)) => text(items.first()),
            other => text(other),
        };
        out.extend(principal.map(|p| clean_dn(&p).to_string()));

        out.extend(text(fields.get("component")));
        out.extend(text(fields.get("realm")).filter(|r| r != ROOT_REALM));
        out.extend(auth_node_summary(fields));
        out.extend(http_summary(fields));
        out.extend(text(fields.get("operation")));
        out.extend(text(fields.get("objectId")));
        out.extend(fields.get("status").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string));

        if fields.get("passwordChanged").and_then(Value::as_bool) == Some(true) {
            out.push("password changed".to_string());
        }

        out.extend(changed_fields_summary(fields));
        out
    }
}

/// Reduce `id=<value>,...` or `uid=<value>,...` to `<value>`
pub fn clean_dn(dn: &str) -> &str {
    DN_PATTERN
        .captures(dn)
        .and_then(|caps| caps.get(1))
        .map_or(dn, |m| m.as_str())
}

/// Truncate to [`MAX_MESSAGE_CHARS`] characters on a char boundary
pub fn truncate(s: &str) -> String {
    match s.char_indices().nth(MAX_MESSAGE_CHARS) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Render a scalar field as text; empty strings and containers count as absent
pub(crate) fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// `tree > node -> outcome > level=N` from the first journey entry
fn auth_node_summary(fields: &Map<String, Value>) -> Option<String> {
    let info = fields
        .get("entries")?
        .as_array()?
        .first()?
        .get("info")?
        .as_object()?;

    let mut parts = Vec::new();
    parts.extend(text(info.get("treeName")));
    parts.extend(text(info.get("displayName")).or_else(|| text(info.get("nodeType"))));
    parts.extend(text(info.get("nodeOutcome")).map(|o| format!("-> {}", o)));
    parts.extend(
        text(info.get("authLevel"))
            .filter(|level| level != "0")
            .map(|level| format!("level={}", level)),
    );

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(NODE_SEPARATOR))
    }
}

/// `METHOD path -> status` from access log payloads
fn http_summary(fields: &Map<String, Value>) -> Option<String> {
    let http = fields.get("http").and_then(Value::as_object);
    let request = http.and_then(|h| h.get("request"));

    let mut parts = Vec::new();
    if let Some(request) = request {
        let method = text(request.get("method"));
        let path = text(request.get("path"));
        match (method, path) {
            (Some(m), Some(p)) => parts.push(format!("{} {}", m, p)),
            (Some(m), None) => parts.push(m),
            (None, Some(p)) => parts.push(p),
            (None, None) => {}
        }
    }

    let response = fields
        .get("response")
        .or_else(|| http.and_then(|h| h.get("response")));
    if let Some(response) = response {
        let status = text(response.get("statusCode")).or_else(|| text(response.get("status")));
        parts.extend(status.map(|s| format!("-> {}", s)));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// `[a, b, c, d, e, ...]` for sync and activity payloads
fn changed_fields_summary(fields: &Map<String, Value>) -> Option<String> {
    let changed = fields.get("changedFields")?.as_array()?;
    let names: Vec<String> = changed
        .iter()
        .filter_map(|v| text(Some(v)))
        .collect();
    if names.is_empty() {
        return None;
    }

    let shown = names.iter().take(MAX_CHANGED_FIELDS).cloned().collect::<Vec<_>>().join(", ");
    if names.len() > MAX_CHANGED_FIELDS {
        Some(format!("[{}, ...]", shown))
    } else {
        Some(format!("[{}]", shown))
    }
}
