//! Utility functions shared by the renderer and the script synthesizer.
//!
//! - HTML text/attribute escaping
//! - Script-safe JSON embedding (injection-safe inside `<script>`)
//! - Head, html-attribute and script tag generators
//! - Comment and spacing stripping for emitted scripts
//! - Stable short hashes for asset names

use serde::Serialize;
use tracing::warn;

use crate::context::{HeadTag, HtmlAttr, ScriptTag};

// ---------------------------------------------------------------------------
// HTML Escaping
// ---------------------------------------------------------------------------

/// Escape text content.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape a double-quoted attribute value.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Make `s` safe as the body of `<!-- ... -->`: no `--` anywhere, no leading
/// `>` or `->`, no trailing `-`.
pub fn escape_comment(s: &str) -> String {
    let mut out = s.to_string();
    while out.contains("--") {
        out = out.replace("--", "- -");
    }
    if out.starts_with('>') || out.starts_with("->") {
        out.insert(0, ' ');
    }
    if out.ends_with('-') {
        out.push(' ');
    }
    out
}

/// Attribute names are written unescaped, so anything that could end the
/// name early is refused.
pub fn is_valid_attr_name(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().any(|c| {
            c.is_whitespace()
                || c.is_control()
                || matches!(c, '"' | '\'' | '<' | '>' | '/' | '=')
        })
}

// ---------------------------------------------------------------------------
// Script-safe JSON
// ---------------------------------------------------------------------------

/// Serialize `value` as JSON that can sit inside an inline `<script>`.
///
/// `<`, `>`, `&` and the two JS line terminators are emitted as `\uXXXX`
/// escapes. They can only occur inside JSON strings, so parsing the output
/// yields the original value.
pub fn script_safe_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len() + 16);
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// A JS string literal for `s`, script-safe.
pub fn js_string(s: &str) -> String {
    // serializing a &str cannot fail
    script_safe_json(s).unwrap_or_else(|_| "\"\"".to_string())
}

// ---------------------------------------------------------------------------
// Tag Generators
// ---------------------------------------------------------------------------

pub fn head_tags_markup(tags: &[HeadTag]) -> String {
    let mut out = String::new();
    for tag in tags {
        match tag {
            HeadTag::Charset { charset } => {
                out.push_str(&format!("<meta charset=\"{}\" />", escape_attr(charset)));
            }
            HeadTag::Meta { name, content } => {
                out.push_str(&format!(
                    "<meta name=\"{}\" content=\"{}\" />",
                    escape_attr(name),
                    escape_attr(content)
                ));
            }
            HeadTag::Link {
                href,
                rel,
                as_type,
                crossorigin,
                hreflang,
                title,
                link_type,
            } => {
                let mut attrs = vec![
                    format!("href=\"{}\"", escape_attr(href)),
                    format!("rel=\"{}\"", escape_attr(rel)),
                ];
                if let Some(as_type) = as_type {
                    attrs.push(format!("as=\"{}\"", escape_attr(as_type)));
                }
                if *crossorigin {
                    attrs.push("crossorigin".to_string());
                }
                if let Some(hreflang) = hreflang {
                    attrs.push(format!("hreflang=\"{}\"", escape_attr(hreflang)));
                }
                if let Some(title) = title {
                    attrs.push(format!("title=\"{}\"", escape_attr(title)));
                }
                if let Some(link_type) = link_type {
                    attrs.push(format!("type=\"{}\"", escape_attr(link_type)));
                }
                out.push_str(&format!("<link {} />", attrs.join(" ")));
            }
        }
    }
    out
}

/// ` lang="en" dir="ltr"`, leading space included when non-empty.
pub fn html_attrs_markup(attrs: &[HtmlAttr]) -> String {
    let mut out = String::new();
    for attr in attrs {
        if !is_valid_attr_name(&attr.name) {
            warn!(name = %attr.name, "dropping html attribute with an invalid name");
            continue;
        }
        out.push_str(&format!(" {}=\"{}\"", attr.name, escape_attr(&attr.value)));
    }
    out
}

pub fn script_tags_markup(tags: &[ScriptTag]) -> String {
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        let mut attrs = Vec::new();
        if tag.is_async {
            attrs.push("async".to_string());
        }
        if tag.defer {
            attrs.push("defer".to_string());
        }
        attrs.push(format!("type=\"{}\"", escape_attr(&tag.script_type)));
        match (&tag.src, &tag.text_content) {
            (Some(src), _) => {
                attrs.push(format!("src=\"{}\"", escape_attr(src)));
                out.push(format!("<script {}></script>", attrs.join(" ")));
            }
            (None, text) => {
                let body = text.as_deref().unwrap_or_default().replace("</script", "<\\/script");
                out.push(format!("<script {}>{}</script>", attrs.join(" "), body));
            }
        }
    }
    out.join("\n")
}

// ---------------------------------------------------------------------------
// Script Stripping
// ---------------------------------------------------------------------------

enum StripState {
    Code,
    AfterSlash,
    InString(char),
    InStringEscape(char),
    InBlockComment,
    InBlockCommentEnd,
    InLineComment,
}

/// Remove `//` and `/* */` comments outside string literals, trim every line
/// and drop blank ones. Pure textual transform: same input, same output.
pub fn strip_comments_and_spacing(js: &str) -> String {
    let mut code = String::with_capacity(js.len());
    let mut state = StripState::Code;

    for ch in js.chars() {
        state = match state {
            StripState::Code => {
                code.push(ch);
                match ch {
                    '"' | '\'' | '`' => StripState::InString(ch),
                    '/' => StripState::AfterSlash,
                    _ => StripState::Code,
                }
            }
            StripState::AfterSlash => match ch {
                '*' => {
                    code.pop();
                    StripState::InBlockComment
                }
                '/' => {
                    code.pop();
                    StripState::InLineComment
                }
                '"' | '\'' | '`' => {
                    code.push(ch);
                    StripState::InString(ch)
                }
                _ => {
                    code.push(ch);
                    StripState::Code
                }
            },
            StripState::InString(quote) => {
                code.push(ch);
                if ch == '\\' {
                    StripState::InStringEscape(quote)
                } else if ch == quote {
                    StripState::Code
                } else {
                    StripState::InString(quote)
                }
            }
            StripState::InStringEscape(quote) => {
                code.push(ch);
                StripState::InString(quote)
            }
            StripState::InBlockComment => {
                if ch == '*' {
                    StripState::InBlockCommentEnd
                } else {
                    StripState::InBlockComment
                }
            }
            StripState::InBlockCommentEnd => match ch {
                '/' => StripState::Code,
                '*' => StripState::InBlockCommentEnd,
                _ => StripState::InBlockComment,
            },
            StripState::InLineComment => {
                if ch == '\n' {
                    code.push(ch);
                    StripState::Code
                } else {
                    StripState::InLineComment
                }
            }
        };
    }

    code.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Stable Hash
// ---------------------------------------------------------------------------

/// 8 hex chars, stable across runs and platforms. Used for asset file names.
pub fn stable_hash_8(content: &str) -> String {
    let mut hash: i32 = 0;
    for byte in content.bytes() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(byte as i32);
    }
    let normalized = hash.wrapping_abs() as u32;
    format!("{normalized:08x}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b & c"), "a &lt; b &amp; c");
        assert_eq!(escape_html("\"quoted\""), "\"quoted\"");
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(escape_attr(r#"say "hi""#), "say &quot;hi&quot;");
    }

    #[test]
    fn test_escape_comment() {
        assert_eq!(escape_comment("a--->b"), "a- - ->b");
        assert_eq!(escape_comment("x--!>y"), "x- -!>y");
        assert_eq!(escape_comment(">start"), " >start");
        assert_eq!(escape_comment("->start"), " ->start");
        assert_eq!(escape_comment("end-"), "end- ");
        assert_eq!(escape_comment("plain"), "plain");
        for text in ["----->", "a-->", "-->", "--!>"] {
            let escaped = escape_comment(text);
            assert!(!escaped.contains("--"), "{text:?} -> {escaped:?}");
        }
    }

    #[test]
    fn test_is_valid_attr_name() {
        for name in ["lang", "data-x", "aria-label", "xml:lang", "@click"] {
            assert!(is_valid_attr_name(name), "{name}");
        }
        for name in ["", "a b", "a\"b", "a'b", "a>b", "a/b", "a=b", "a\tb"] {
            assert!(!is_valid_attr_name(name), "{name:?}");
        }
    }

    #[test]
    fn test_html_attrs_markup_drops_invalid_names() {
        let attrs = vec![
            HtmlAttr::new("lang", "en"),
            HtmlAttr::new("x onload=alert(1) y", "z"),
        ];
        assert_eq!(html_attrs_markup(&attrs), " lang=\"en\"");
    }

    #[test]
    fn test_script_safe_json_round_trip() {
        let value = serde_json::json!({ "html": "</script><b>&</b>", "n": 3 });
        let embedded = script_safe_json(&value).unwrap();
        assert!(!embedded.contains('<'));
        assert!(!embedded.contains('>'));
        let parsed: serde_json::Value = serde_json::from_str(&embedded).unwrap();
        assert_eq!(parsed, value);
    }

    #[test]
    fn test_js_string() {
        assert_eq!(js_string("home"), "\"home\"");
        assert_eq!(js_string("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_head_tags_markup() {
        let tags = vec![
            HeadTag::charset("utf-8"),
            HeadTag::meta("viewport", "width=device-width"),
            HeadTag::stylesheet("/app.css"),
        ];
        assert_eq!(
            head_tags_markup(&tags),
            "<meta charset=\"utf-8\" /><meta name=\"viewport\" content=\"width=device-width\" /><link href=\"/app.css\" rel=\"stylesheet\" />"
        );
    }

    #[test]
    fn test_html_attrs_markup() {
        let attrs = vec![HtmlAttr::new("lang", "en"), HtmlAttr::new("dir", "ltr")];
        assert_eq!(html_attrs_markup(&attrs), " lang=\"en\" dir=\"ltr\"");
        assert_eq!(html_attrs_markup(&[]), "");
    }

    #[test]
    fn test_script_tags_markup() {
        let mut deferred = ScriptTag::src("/a.js");
        deferred.defer = true;
        let tags = vec![deferred, ScriptTag::inline("var x = '</script>';")];
        assert_eq!(
            script_tags_markup(&tags),
            "<script defer type=\"text/javascript\" src=\"/a.js\"></script>\n<script type=\"text/javascript\">var x = '<\\/script>';</script>"
        );
    }

    #[test]
    fn test_strip_comments_and_spacing() {
        let js = "  // leading\n  var a = 1; /* block */\n\n  var u = \"http://x\"; // tail\n";
        assert_eq!(
            strip_comments_and_spacing(js),
            "var a = 1;\nvar u = \"http://x\";"
        );
    }

    #[test]
    fn test_strip_keeps_division() {
        assert_eq!(strip_comments_and_spacing("var r = a / b;"), "var r = a / b;");
    }

    #[test]
    fn test_stable_hash_8() {
        assert_eq!(stable_hash_8("abc"), stable_hash_8("abc"));
        assert_ne!(stable_hash_8("abc"), stable_hash_8("abd"));
        assert_eq!(stable_hash_8("").len(), 8);
    }
}
