//! Hybrid search query parsing for the case inbox.
//!
//! `key:value` filters (AND across keys, OR across repeated values) plus
//! free-text tokens. Unknown keys degrade to plain tokens.

use std::collections::BTreeMap;

/// Parsed hybrid search query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedSearchQuery {
    /// Normalized key -> values.
    pub filters: BTreeMap<String, Vec<String>>,
    /// Free-text tokens; caller decides AND/OR semantics.
    pub tokens: Vec<String>,
}

fn normalize_key(k: &str) -> Option<&'static str> {
    match k.trim().to_ascii_lowercase().as_str() {
        "ns" | "namespace" => Some("namespace"),
        "pod" => Some("pod"),
        "deploy" | "deployment" | "workload" => Some("workload"),
        "svc" | "service" => Some("service"),
        "cluster" => Some("cluster"),
        "alert" | "alertname" => Some("alertname"),
        _ => None,
    }
}

/// Consume a quoted value starting at byte index `i` (`s[i..]` starts with
/// the quote). Returns `(value, next_byte_index)`, or `None` for an
/// unterminated quote.
fn consume_quoted(s: &str, i: usize) -> Option<(String, usize)> {
    let mut chars = s[i..].char_indices();
    let (_, q) = chars.next()?;
    if q != '\'' && q != '"' {
        return None;
    }
    let mut out = String::new();
    let mut escaped = false;
    for (off, ch) in chars {
        if escaped {
            // minimal escape handling for \" \' and \\
            if ch == '\\' || ch == q {
                out.push(ch);
            } else {
                out.push('\\');
                out.push(ch);
            }
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == q {
            return Some((out, i + off + ch.len_utf8()));
        }
        out.push(ch);
    }
    None
}

/// Parse a hybrid search string into filters and tokens.
#[must_use]
pub fn parse_search_query(q: &str) -> ParsedSearchQuery {
    let s = q.trim();
    let bytes = s.as_bytes();
    let mut out = ParsedSearchQuery::default();

    let mut push_filter = |filters: &mut BTreeMap<String, Vec<String>>, key: &str, val: &str| {
        let v = val.trim();
        if !v.is_empty() {
            filters.entry(key.to_string()).or_default().push(v.to_string());
        }
    };

    let mut i = 0usize;
    let n = bytes.len();
    while i < n {
        while i < n && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= n {
            break;
        }

        let start = i;
        while i < n && !bytes[i].is_ascii_whitespace() && bytes[i] != b':' {
            i += 1;
        }

        // Not key:value — a plain (possibly quoted) token.
        if i >= n || bytes[i] != b':' {
            if bytes[start] == b'\'' || bytes[start] == b'"' {
                if let Some((v, j)) = consume_quoted(s, start) {
                    if !v.trim().is_empty() {
                        out.tokens.push(v);
                    }
                    i = j;
                    continue;
                }
            }
            while i < n && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            let tok = s[start..i].trim();
            if !tok.is_empty() {
                out.tokens.push(tok.to_string());
            }
            continue;
        }

        let raw_key = &s[start..i];
        let norm_key = normalize_key(raw_key);
        i += 1; // skip ':'
        if i >= n {
            // trailing "k:" — ignore
            break;
        }

        if bytes[i] == b'\'' || bytes[i] == b'"' {
            if let Some((v, j)) = consume_quoted(s, i) {
                if let Some(key) = norm_key {
                    push_filter(&mut out.filters, key, &v);
                    i = j;
                    continue;
                }
            }
            // unterminated quote or unknown key: fall through to raw value
        }

        let v_start = i;
        while i < n && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let raw_val = &s[v_start..i];

        if let Some(key) = norm_key {
            push_filter(&mut out.filters, key, raw_val);
        } else {
            let tok = format!("{raw_key}:{raw_val}");
            if !tok.trim().is_empty() {
                out.tokens.push(tok);
            }
        }
    }

    out
}

/// Render a parsed query back to a search string. Values containing
/// whitespace are double-quoted. `parse_search_query(render(q)) == q` for
/// queries built from known keys and safe tokens.
#[must_use]
pub fn render_search_query(q: &ParsedSearchQuery) -> String {
    let mut parts: Vec<String> = Vec::new();
    for (key, values) in &q.filters {
        for v in values {
            if v.chars().any(char::is_whitespace) {
                parts.push(format!("{key}:\"{v}\""));
            } else {
                parts.push(format!("{key}:{v}"));
            }
        }
    }
    for tok in &q.tokens {
        if tok.chars().any(char::is_whitespace) {
            parts.push(format!("\"{tok}\""));
        } else {
            parts.push(tok.clone());
        }
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_and_tokens() {
        let q = parse_search_query("ns:payments pod:api-123 timeout");
        assert_eq!(q.filters.get("namespace"), Some(&vec!["payments".to_string()]));
        assert_eq!(q.filters.get("pod"), Some(&vec!["api-123".to_string()]));
        assert_eq!(q.tokens, vec!["timeout".to_string()]);
    }

    #[test]
    fn test_aliases() {
        let q = parse_search_query("deploy:api svc:gateway alert:KubeJobFailed cluster:c1");
        assert!(q.filters.contains_key("workload"));
        assert!(q.filters.contains_key("service"));
        assert!(q.filters.contains_key("alertname"));
        assert!(q.filters.contains_key("cluster"));
    }

    #[test]
    fn test_quoted_values() {
        let q = parse_search_query("ns:\"payments prod\" \"free text\"");
        assert_eq!(q.filters.get("namespace"), Some(&vec!["payments prod".to_string()]));
        assert_eq!(q.tokens, vec!["free text".to_string()]);
    }

    #[test]
    fn test_unknown_key_becomes_token() {
        let q = parse_search_query("bogus:thing");
        assert!(q.filters.is_empty());
        assert_eq!(q.tokens, vec!["bogus:thing".to_string()]);
    }

    #[test]
    fn test_repeated_values_accumulate() {
        let q = parse_search_query("ns:a ns:b");
        assert_eq!(
            q.filters.get("namespace"),
            Some(&vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_trailing_colon_ignored() {
        let q = parse_search_query("ns:");
        assert!(q.filters.is_empty());
        assert!(q.tokens.is_empty());
    }

    #[test]
    fn test_render_roundtrip() {
        let cases = [
            "ns:payments pod:api-123 timeout",
            "workload:api \"free text\"",
            "cluster:c1 namespace:\"two words\" token",
        ];
        for c in cases {
            let parsed = parse_search_query(c);
            let rendered = render_search_query(&parsed);
            assert_eq!(parse_search_query(&rendered), parsed, "case {c}");
        }
    }
}
