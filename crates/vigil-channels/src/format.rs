//! Shared text shaping for providers with different size limits and markup
//! dialects.

/// Cut `text` to at most `max` characters, appending a truncation notice
/// when anything was dropped. Splits on a char boundary, never mid-codepoint.
pub fn truncate_with_notice(text: &str, max: usize) -> String {
    const NOTICE: &str = "\n… (truncated)";
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(NOTICE.chars().count());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(NOTICE);
    out
}

/// Reduce simple HTML (the dispatcher's template dialect) to plain text for
/// webhook platforms that render none of it.
pub fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&nbsp;", " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_untouched() {
        assert_eq!(truncate_with_notice("hello", 100), "hello");
    }

    #[test]
    fn long_text_truncated_with_notice() {
        let long = "x".repeat(5000);
        let cut = truncate_with_notice(&long, 4096);
        assert!(cut.chars().count() <= 4096);
        assert!(cut.ends_with("(truncated)"));
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let long = "é".repeat(5000);
        let cut = truncate_with_notice(&long, 4096);
        assert!(cut.chars().count() <= 4096);
    }

    #[test]
    fn html_is_stripped_to_plain_text() {
        assert_eq!(
            strip_html("<b>Task</b> finished &amp; <i>logged</i>"),
            "Task finished & logged"
        );
        assert_eq!(strip_html("no markup"), "no markup");
    }
}
