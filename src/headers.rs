//! Header redaction for log output.

use axum::http::HeaderMap;
use serde_json::{Map, Value};

/// Placeholder logged in place of a sensitive header value
pub const REDACTED: &str = "***";

/// Headers that are always redacted, whatever the skip list says
const ALWAYS_REDACTED: [&str; 3] = ["authorization", "cookie", "set-cookie"];

/// Render a header map as a `name -> value` mapping suitable for logging.
///
/// Names are lowercased. A header with a single value is logged as-is, and
/// repeated headers are joined as `[a], [b]`. Credentials (`authorization`,
/// `cookie`, `set-cookie`) and any name in `skip_headers` (compared
/// case-insensitively) are replaced with [`REDACTED`].
pub fn header_log_field(headers: &HeaderMap, skip_headers: &[String]) -> Map<String, Value> {
    let mut field = Map::new();
    for name in headers.keys() {
        let key = name.as_str().to_ascii_lowercase();
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();

        let rendered = match values.as_slice() {
            [] => continue,
            [single] => single.clone(),
            many => format!("[{}]", many.join("], [")),
        };

        let value = if is_redacted(&key, skip_headers) {
            REDACTED.to_string()
        } else {
            rendered
        };
        field.insert(key, Value::String(value));
    }
    field
}

fn is_redacted(key: &str, skip_headers: &[String]) -> bool {
    ALWAYS_REDACTED.contains(&key) || skip_headers.iter().any(|s| s.eq_ignore_ascii_case(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        map
    }

    #[test]
    fn test_single_and_repeated_values() {
        let map = headers(&[
            ("accept", "text/plain"),
            ("x-forwarded-for", "10.0.0.1"),
            ("x-forwarded-for", "10.0.0.2"),
        ]);
        let field = header_log_field(&map, &[]);

        assert_eq!(field.len(), 2);
        assert_eq!(field["accept"], "text/plain");
        assert_eq!(field["x-forwarded-for"], "[10.0.0.1], [10.0.0.2]");
    }

    #[test]
    fn test_credentials_always_redacted() {
        let map = headers(&[
            ("authorization", "Bearer xyz"),
            ("cookie", "session=abc"),
            ("set-cookie", "a=1"),
            ("set-cookie", "b=2"),
            ("accept", "*/*"),
        ]);
        let field = header_log_field(&map, &[]);

        assert_eq!(field["authorization"], REDACTED);
        assert_eq!(field["cookie"], REDACTED);
        assert_eq!(field["set-cookie"], REDACTED);
        assert_eq!(field["accept"], "*/*");
    }

    #[test]
    fn test_skip_list_is_case_insensitive() {
        let map = headers(&[("x-api-key", "secret"), ("x-trace", "1")]);
        let skip = vec!["X-Api-Key".to_string()];
        let field = header_log_field(&map, &skip);

        assert_eq!(field["x-api-key"], REDACTED);
        assert_eq!(field["x-trace"], "1");
    }

    #[test]
    fn test_empty_map() {
        assert!(header_log_field(&HeaderMap::new(), &[]).is_empty());
    }
}
