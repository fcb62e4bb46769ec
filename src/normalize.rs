//! Turns raw model output into a loadable HTML document.

use once_cell::sync::Lazy;
use regex::Regex;

static LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```[a-zA-Z0-9_+-]*[ \t]*\r?\n?").expect("valid regex"));
static TRAILING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*```\s*$").expect("valid regex"));

/// Removes one leading and one trailing code fence, then trims.
pub fn strip_code_fences(text: &str) -> String {
    let text = text.trim();
    let text = LEADING_FENCE.replace(text, "");
    let text = TRAILING_FENCE.replace(&text, "");
    text.trim().to_string()
}

/// Returns the cleaned document, or a fallback page wrapping `raw` when the
/// model did not produce anything resembling HTML.
pub fn normalize_html(raw: &str) -> String {
    let html = strip_code_fences(raw);
    if html.to_lowercase().contains("<html") {
        return html;
    }
    tracing::debug!(chars = raw.len(), "model output has no <html>, using fallback page");
    fallback_document(raw)
}

pub fn fallback_document(raw: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"de\"><head><meta charset=\"utf-8\">\
         <meta name=\"viewport\" content=\"width=device-width,initial-scale=1\">\
         <title>Website</title>\
         <style>body{{font-family:Arial,sans-serif;padding:24px;max-width:900px;margin:0 auto}}\
         pre{{white-space:pre-wrap;word-wrap:break-word}}</style>\
         </head><body><h1>Entwurf</h1><pre>{}</pre></body></html>",
        escape_html(raw)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<!DOCTYPE html><html><body><p>Hi</p></body></html>";

    #[test]
    fn strips_fences_with_language_tag() {
        let raw = format!("```html\n{PAGE}\n```");
        assert_eq!(normalize_html(&raw), PAGE);
    }

    #[test]
    fn strips_bare_fences_and_whitespace() {
        let raw = format!("  \n```\n{PAGE}\n```  \n");
        assert_eq!(strip_code_fences(&raw), PAGE);
    }

    #[test]
    fn leaves_unfenced_text_alone() {
        assert_eq!(strip_code_fences(PAGE), PAGE);
    }

    #[test]
    fn normalizing_twice_is_stable() {
        for raw in [
            format!("```html\n{PAGE}\n```"),
            PAGE.to_string(),
            "just plain text".to_string(),
            "```\n<b>not a page</b>\n```".to_string(),
        ] {
            let once = normalize_html(&raw);
            assert_eq!(normalize_html(&once), once);
        }
    }

    #[test]
    fn plain_text_becomes_fallback_document() {
        let out = normalize_html("just plain text");
        assert!(out.starts_with("<!DOCTYPE html>"));
        assert!(out.contains("<pre>just plain text</pre>"));
        assert!(out.ends_with("</html>"));
    }

    #[test]
    fn fallback_escapes_markup() {
        let out = normalize_html("<script>alert('x')</script> & more");
        assert!(out.contains("&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt; &amp; more"));
        assert!(!out.contains("<script>"));
    }

    #[test]
    fn html_token_check_is_case_insensitive() {
        let page = "<HTML><BODY>ok</BODY></HTML>";
        assert_eq!(normalize_html(page), page);
    }

    #[test]
    fn empty_output_still_yields_a_document() {
        let out = normalize_html("");
        assert!(out.contains("<html"));
        assert!(out.contains("<pre></pre>"));
    }
}
