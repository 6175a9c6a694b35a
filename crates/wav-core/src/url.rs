use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;

/// Query parameters keyed by name. Repeated keys keep every value; values are
/// sorted so comparison is order-insensitive.
pub type QueryParams = BTreeMap<String, Vec<String>>;

fn decode_component(raw: &str) -> String {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|s| s.to_string())
        .unwrap_or(plus_decoded)
}

/// Parse a raw query string into QueryParams. Keys without `=` get an empty
/// value, mirroring how browsers serialize them.
pub fn normalize_query(query: &str) -> QueryParams {
    let mut params: QueryParams = BTreeMap::new();
    if query.is_empty() {
        return params;
    }
    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        let (raw_key, raw_value) = match part.split_once('=') {
            Some((k, v)) => (k, v),
            None => (part, ""),
        };
        let key = decode_component(raw_key);
        let value = decode_component(raw_value);
        params.entry(key).or_default().push(value);
    }
    for values in params.values_mut() {
        values.sort();
    }
    params
}

fn decode_base64_segment(segment: &str) -> Option<String> {
    if segment.len() < 4 {
        return None;
    }
    let trimmed = segment.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let query = text.trim_start_matches(['?', '&']);
    if !query.contains('=') {
        return None;
    }
    Some(query.to_string())
}

/// Remove base64-encoded path segments that decode to query strings and
/// return the cleaned path plus the decoded query strings in path order.
pub fn extract_base64_query(path: &str) -> (String, Vec<String>) {
    if path.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut decoded = Vec::new();
    let kept: Vec<&str> = path
        .split('/')
        .filter(|segment| {
            if segment.is_empty() {
                return true;
            }
            match decode_base64_segment(segment) {
                Some(query) => {
                    decoded.push(query);
                    false
                }
                None => true,
            }
        })
        .collect();
    let mut cleaned = kept.join("/");
    if cleaned.is_empty() && path.starts_with('/') {
        cleaned = "/".to_string();
    }
    (cleaned, decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &[&str])]) -> QueryParams {
        pairs
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn normalize_query_single_and_multiple_params() {
        assert_eq!(normalize_query("key=value"), params(&[("key", &["value"])]));
        assert_eq!(
            normalize_query("key1=value1&key2=value2"),
            params(&[("key1", &["value1"]), ("key2", &["value2"])])
        );
    }

    #[test]
    fn normalize_query_sorts_duplicate_key_values() {
        assert_eq!(
            normalize_query("tag=python&tag=code&tag=aws"),
            params(&[("tag", &["aws", "code", "python"])])
        );
        assert_eq!(
            normalize_query("key=z&key=a&key=m"),
            params(&[("key", &["a", "m", "z"])])
        );
    }

    #[test]
    fn normalize_query_decodes_keys_and_values() {
        assert_eq!(
            normalize_query("name=John%20Doe&city=New%20York"),
            params(&[("city", &["New York"]), ("name", &["John Doe"])])
        );
        assert_eq!(
            normalize_query("search%5Bquery%5D=test"),
            params(&[("search[query]", &["test"])])
        );
        assert_eq!(
            normalize_query("special=hello%21%40%23"),
            params(&[("special", &["hello!@#"])])
        );
        assert_eq!(
            normalize_query("equation=a%3Db%2Bc"),
            params(&[("equation", &["a=b+c"])])
        );
        assert_eq!(
            normalize_query("text=hello+world"),
            params(&[("text", &["hello world"])])
        );
    }

    #[test]
    fn normalize_query_edge_cases() {
        assert_eq!(normalize_query(""), QueryParams::new());
        assert_eq!(normalize_query("key="), params(&[("key", &[""])]));
        assert_eq!(normalize_query("key=&key="), params(&[("key", &["", ""])]));
        assert_eq!(normalize_query("key"), params(&[("key", &[""])]));
    }

    #[test]
    fn extract_base64_query_positions() {
        // "dXNlcj1hZG1pbiZwYXNzPTEyMw" == "user=admin&pass=123"
        assert_eq!(
            extract_base64_query("/api/dXNlcj1hZG1pbiZwYXNzPTEyMw/data"),
            ("/api/data".to_string(), vec!["user=admin&pass=123".to_string()])
        );
        assert_eq!(
            extract_base64_query("/api/dXNlcj1hZG1pbiZwYXNzPTEyMw"),
            ("/api".to_string(), vec!["user=admin&pass=123".to_string()])
        );
        assert_eq!(
            extract_base64_query("/dXNlcj1hZG1pbg/api/data"),
            ("/api/data".to_string(), vec!["user=admin".to_string()])
        );
        assert_eq!(
            extract_base64_query("/api/dXNlcj1hZG1pbg/data/cGFzcz0xMjM"),
            (
                "/api/data".to_string(),
                vec!["user=admin".to_string(), "pass=123".to_string()]
            )
        );
    }

    #[test]
    fn extract_base64_query_preserves_slashes() {
        assert_eq!(
            extract_base64_query("/dXNlcj1hZG1pbg"),
            ("/".to_string(), vec!["user=admin".to_string()])
        );
        assert_eq!(
            extract_base64_query("/api/dXNlcj1hZG1pbg/"),
            ("/api/".to_string(), vec!["user=admin".to_string()])
        );
    }

    #[test]
    fn extract_base64_query_skips_non_query_segments() {
        assert_eq!(extract_base64_query(""), (String::new(), vec![]));
        assert_eq!(
            extract_base64_query("/api/data"),
            ("/api/data".to_string(), vec![])
        );
        // Too short to qualify.
        assert_eq!(
            extract_base64_query("/api/abc/data"),
            ("/api/abc/data".to_string(), vec![])
        );
        // Valid base64 but decodes to "notaquery" (no '=').
        assert_eq!(
            extract_base64_query("/api/bm90YXF1ZXJ5/data"),
            ("/api/bm90YXF1ZXJ5/data".to_string(), vec![])
        );
        assert_eq!(
            extract_base64_query("/api/segment@with#special$/data"),
            ("/api/segment@with#special$/data".to_string(), vec![])
        );
    }

    #[test]
    fn extract_base64_query_handles_padding_and_prefixes() {
        assert_eq!(
            extract_base64_query("/api/dXNlcj1hZG1pbg==/data"),
            ("/api/data".to_string(), vec!["user=admin".to_string()])
        );
        // "P2tleT12YWx1ZQ" == "?key=value"; "JmtleT12YWx1ZQ" == "&key=value"
        assert_eq!(
            extract_base64_query("/api/P2tleT12YWx1ZQ/data"),
            ("/api/data".to_string(), vec!["key=value".to_string()])
        );
        assert_eq!(
            extract_base64_query("/api/JmtleT12YWx1ZQ/data"),
            ("/api/data".to_string(), vec!["key=value".to_string()])
        );
    }
}
