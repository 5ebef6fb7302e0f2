//! Placeholder substitution and character-budget helpers.

/// Marker appended to text cut down to fit a budget.
pub const TRUNCATION_MARKER: &str = "\n...[truncated]";

/// Replace `{name}` tokens in `template` with the matching value.
///
/// Single pass: substituted values are never rescanned, so source code or
/// captured output containing braces passes through untouched. Tokens with
/// no matching key are left as written. `{{` and `}}` are literal braces.
pub fn render_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail[1..].find('}') {
            Some(end) => {
                let key = &tail[1..1 + end];
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) if is_identifier(key) => out.push_str(value),
                    _ => out.push_str(&tail[..end + 2]),
                }
                rest = &tail[end + 2..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_identifier(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Number of characters (not bytes) in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Cut `text` to at most `max_chars` characters, marker included.
///
/// Keeps the head of the text; returns the input unchanged when it already
/// fits.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    let marker_len = char_len(TRUNCATION_MARKER);
    if max_chars <= marker_len {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    out
}

/// Like [`truncate_chars`] but keeps the tail, where tracebacks end.
pub fn truncate_chars_tail(text: &str, max_chars: usize) -> String {
    let len = char_len(text);
    if len <= max_chars {
        return text.to_string();
    }
    let marker = "[truncated]...\n";
    let marker_len = char_len(marker);
    if max_chars <= marker_len {
        return text.chars().skip(len - max_chars).collect();
    }
    let keep = max_chars - marker_len;
    let mut out = marker.to_string();
    out.extend(text.chars().skip(len - keep));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_known_keys() {
        let out = render_placeholders("nu = {nu}, rho = {rho}", &[("nu", "0.01"), ("rho", "1")]);
        assert_eq!(out, "nu = 0.01, rho = 1");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let out = render_placeholders("code: {code}", &[("code", "d = {nu}"), ("nu", "X")]);
        assert_eq!(out, "code: d = {nu}");
    }

    #[test]
    fn test_render_keeps_unknown_and_escaped_braces() {
        let out = render_placeholders(r"\frac{{a}}{{b}} {missing} {x y}", &[("a", "1")]);
        assert_eq!(out, r"\frac{a}{b} {missing} {x y}");
    }

    #[test]
    fn test_render_unterminated_brace() {
        assert_eq!(render_placeholders("open {tail", &[]), "open {tail");
    }

    #[test]
    fn test_truncate_chars_respects_budget() {
        let text = "é".repeat(100);
        let out = truncate_chars(&text, 40);
        assert_eq!(char_len(&out), 40);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert_eq!(truncate_chars("short", 40), "short");
    }

    #[test]
    fn test_truncate_tail_keeps_end() {
        let text = format!("{}ZeroDivisionError", "x".repeat(200));
        let out = truncate_chars_tail(&text, 50);
        assert_eq!(char_len(&out), 50);
        assert!(out.ends_with("ZeroDivisionError"));
    }
}
