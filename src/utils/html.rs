// src/utils/html.rs

/// Longest violation description kept, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

/// Cleans a client-supplied violation description before storage.
///
/// Descriptions end up in instructor review screens, so markup is passed
/// through ammonia's whitelist (scripts, iframes and event handlers are
/// stripped) and the result is trimmed and capped in length.
pub fn sanitize_description(input: &str) -> String {
    let cleaned = ammonia::clean(input.trim());
    match cleaned.char_indices().nth(MAX_DESCRIPTION_CHARS) {
        Some((cut, _)) => cleaned[..cut].to_string(),
        None => cleaned,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let out = sanitize_description("<b>blur</b><script>alert(1)</script>");
        assert_eq!(out, "<b>blur</b>");
    }

    #[test]
    fn strips_event_handlers() {
        let out = sanitize_description(r#"<p onclick="steal()">Left window</p>"#);
        assert_eq!(out, "<p>Left window</p>");
    }

    #[test]
    fn caps_length() {
        let long = "x".repeat(MAX_DESCRIPTION_CHARS + 50);
        assert_eq!(sanitize_description(&long).chars().count(), MAX_DESCRIPTION_CHARS);
    }
}
