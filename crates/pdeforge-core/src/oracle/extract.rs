//! Code extraction from fenced Markdown blocks.

use std::sync::OnceLock;

use regex::Regex;

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        // Opening fence with optional tag, body, closing fence on its own line.
        Regex::new(r"(?ms)^[ \t]*```[ \t]*([A-Za-z0-9_+.-]*)[^\n]*\n(.*?)^[ \t]*```[ \t]*$")
            .expect("Invalid code fence regex")
    })
}

/// Extract candidate source from an oracle response.
///
/// Prefers the last block tagged `language` (case-insensitive), else the
/// last fenced block of any tag. Unterminated and whitespace-only blocks do
/// not count. On failure returns the reason.
pub fn extract_code(text: &str, language: &str) -> Result<String, String> {
    let blocks: Vec<(String, String)> = fence_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let tag = caps.get(1).map_or("", |m| m.as_str()).to_string();
            let body = caps.get(2).map_or("", |m| m.as_str());
            let body = body.trim_end_matches(['\n', '\r']);
            if body.trim().is_empty() {
                None
            } else {
                Some((tag, body.to_string()))
            }
        })
        .collect();

    blocks
        .iter()
        .rev()
        .find(|(tag, _)| tag.eq_ignore_ascii_case(language))
        .or_else(|| blocks.last())
        .map(|(_, body)| body.clone())
        .ok_or_else(|| format!("no fenced {language} code block found in response"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_last_block_with_language_tag() {
        let text = "Plan:\n```python\nx = 1\n```\nthen\n```bash\npip install numpy\n```\nfinal\n```python\nx = 2\n```\n";
        assert_eq!(extract_code(text, "python").unwrap(), "x = 2");
    }

    #[test]
    fn test_falls_back_to_last_untagged_block() {
        let text = "```\nfirst\n```\n\n```\nsecond\n```";
        assert_eq!(extract_code(text, "python").unwrap(), "second");
    }

    #[test]
    fn test_tagged_block_wins_over_later_untagged() {
        let text = "```python\nimport numpy as np\n```\n```\nusage example\n```";
        assert_eq!(extract_code(text, "python").unwrap(), "import numpy as np");
    }

    #[test]
    fn test_unterminated_fence_is_absent() {
        let text = "Here you go:\n```python\ndef solver():\n    pass\n";
        assert!(extract_code(text, "python").is_err());
    }

    #[test]
    fn test_empty_block_is_absent() {
        let text = "```python\n   \n```";
        let err = extract_code(text, "python").unwrap_err();
        assert!(err.contains("no fenced python code block"));
    }

    #[test]
    fn test_no_fence_at_all() {
        assert!(extract_code("just prose", "python").is_err());
    }

    #[test]
    fn test_multiline_body_preserved() {
        let text = "```Python\ndef solver(u0_batch, t_coordinate, nu):\n    return u0_batch\n```";
        assert_eq!(
            extract_code(text, "python").unwrap(),
            "def solver(u0_batch, t_coordinate, nu):\n    return u0_batch"
        );
    }
}
