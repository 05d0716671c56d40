//! Flattening of nested validation errors.
//!
//! Validation produces per-field detail of arbitrary nesting, e.g.
//! `{"fields": {"address": {"zip": ["required"]}}}`. The report keeps the
//! raw structure and carries a flattened readable form next to it:
//! `fields.address.zip: required`.

/// Recursively flatten structured error detail into one readable line.
pub fn flatten_error(detail: &serde_json::Value) -> String {
    let mut parts = Vec::new();
    walk(detail, String::new(), &mut parts);
    parts.join("; ")
}

fn walk(value: &serde_json::Value, path: String, parts: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk(child, child_path, parts);
            }
        }
        serde_json::Value::Array(items) => {
            let messages: Vec<String> = items.iter().map(leaf_text).collect();
            push(parts, &path, messages.join(", "));
        }
        other => push(parts, &path, leaf_text(other)),
    }
}

fn leaf_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push(parts: &mut Vec<String>, path: &str, message: String) {
    if path.is_empty() {
        parts.push(message);
    } else {
        parts.push(format!("{path}: {message}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_field_errors() {
        let detail = json!({
            "fields": {
                "email": ["must be unique"],
                "address": {"zip": ["required", "must be numeric"]}
            }
        });
        assert_eq!(
            flatten_error(&detail),
            "fields.address.zip: required, must be numeric; fields.email: must be unique"
        );
    }

    #[test]
    fn plain_string_detail_passes_through() {
        assert_eq!(flatten_error(&json!("record is locked")), "record is locked");
    }

    #[test]
    fn non_string_leaves_are_rendered() {
        assert_eq!(flatten_error(&json!({"retry_after": 30})), "retry_after: 30");
    }
}
