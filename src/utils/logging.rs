use serde::Serialize;

/// Serializes `value` as pretty JSON and hands it to `log_action`, only when DEBUG is enabled.
pub(crate) fn with_pretty_json_debug<T, F>(value: &T, log_action: F)
where
    T: Serialize,
    F: FnOnce(&str),
{
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }

    let pretty_json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|error| format!("<pretty serialize failed: {error}>"));
    log_action(pretty_json.as_str());
}

const SQL_PREVIEW_LIMIT: usize = 160;

/// Single-line form of a SQL statement for log fields, cut at a fixed width.
pub(crate) fn sql_preview(sql: &str) -> String {
    let mut flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Some((cut, _)) = flat.char_indices().nth(SQL_PREVIEW_LIMIT) {
        flat.truncate(cut);
        flat.push_str("...");
    }
    flat
}
