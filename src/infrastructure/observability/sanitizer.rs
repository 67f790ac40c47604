//! Metric name normalization for the remote-write backend.
//!
//! Output always matches `^[a-z_][a-z0-9_]*$` and the function is idempotent.

/// Normalizes a metric identifier to the backend naming grammar.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);

    for c in name.chars().flat_map(char::to_lowercase) {
        let mapped = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }

    match out.chars().next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => out,
        _ => {
            // Digit-leading or empty; a leading '_' never doubles here
            out.insert(0, '_');
            out
        }
    }
}

/// True when `name` is already in the backend grammar.
pub fn is_sanitized(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => chars
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
        _ => false,
    }
}
