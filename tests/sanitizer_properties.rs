use proptest::prelude::*;
use pulseflow::infrastructure::observability::sanitizer::{is_sanitized, sanitize};

fn matches_grammar(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

proptest! {
    #[test]
    fn sanitized_names_match_grammar(name in any::<String>()) {
        let out = sanitize(&name);
        prop_assert!(matches_grammar(&out), "{:?} -> {:?}", name, out);
        prop_assert!(is_sanitized(&out));
    }

    #[test]
    fn sanitize_is_idempotent(name in any::<String>()) {
        let once = sanitize(&name);
        prop_assert_eq!(sanitize(&once), once);
    }

    #[test]
    fn metric_like_names_keep_their_shape(name in "[a-z][a-z0-9]{0,8}(_[a-z0-9]{1,8}){0,4}") {
        prop_assert_eq!(sanitize(&name), name);
    }
}

#[test]
fn test_dotted_and_dashed_names() {
    assert_eq!(sanitize("http.server-requests"), "http_server_requests");
    assert_eq!(sanitize("9lives"), "_9lives");
    assert_eq!(sanitize(""), "_");
}
