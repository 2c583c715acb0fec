//! # Content Sanitizer
//!
//! Transforms raw model output into renderable-safe text. The one transform
//! applied is to SVG markup: fenced ` ```svg ` / ` ```xml ` blocks (and bare
//! fences whose body is an SVG document) as well as inline `<svg>...</svg>`
//! occurrences are re-wrapped in an isolated, style-safe container so the
//! graphic stays legible over arbitrary backgrounds. Everything else passes
//! through unchanged.
//!
//! ## Passes
//!
//! 1. **Fenced pass**: every fenced code block is inspected. Blocks whose
//!    content is a complete SVG document are replaced by the wrapped
//!    graphic; all other blocks are kept byte-for-byte. Either way the
//!    block is stashed behind a placeholder for the duration of pass 2.
//! 2. **Inline pass**: `<svg>...</svg>` spans in the remaining text are
//!    wrapped the same way. Because fenced blocks are stashed, an SVG
//!    inside a code fence is never wrapped twice (and an SVG inside, say,
//!    a `python` fence is never wrapped at all).
//!
//! Malformed markup is never an error: if the SVG cannot be parsed the
//! original text is returned unmodified.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Fallback width used when the SVG declares neither `viewBox` nor `width`.
const DEFAULT_WIDTH: &str = "800";
/// Fallback height used when the SVG declares neither `viewBox` nor `height`.
const DEFAULT_HEIGHT: &str = "600";

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(\w+)?[ \t]*\n?(.*?)```").unwrap());
static INLINE_SVG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<svg\b.*?</svg>").unwrap());
static SVG_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)^<svg\b[^>]*>").unwrap());
static VIEWBOX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\sviewBox\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap());
static WIDTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\swidth\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static HEIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\sheight\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

/// Sanitize one message body for display.
///
/// Runs the fenced pass and then the inline pass described in the module
/// docs. This function never fails; text that cannot be interpreted as SVG
/// comes back exactly as it went in.
///
/// # Examples
/// ```
/// let out = ollie::sanitize::process_message("```python\nprint(1)\n```");
/// assert_eq!(out, "```python\nprint(1)\n```");
/// ```
pub fn process_message(text: &str) -> String {
    // Pass 1: fenced blocks, stashed behind placeholders so the inline pass
    // cannot see (and re-wrap) their contents.
    let mut stash: Vec<String> = Vec::new();
    let fenced = FENCED_RE.replace_all(text, |caps: &Captures| {
        let block = fenced_replacement(caps).unwrap_or_else(|| caps[0].to_string());
        stash.push(block);
        format!("\u{1}{}\u{1}", stash.len() - 1)
    });

    // Pass 2: inline SVG spans in the remaining prose.
    let inlined = INLINE_SVG_RE.replace_all(&fenced, |caps: &Captures| {
        wrap_svg(&caps[0]).unwrap_or_else(|| caps[0].to_string())
    });

    // Restore the stashed fenced blocks.
    let mut out = inlined.into_owned();
    for (idx, block) in stash.iter().enumerate() {
        out = out.replace(&format!("\u{1}{idx}\u{1}"), block);
    }
    out
}

/// Decide what a fenced block becomes: `Some(wrapped)` when it is a
/// convertible SVG document, `None` to keep the fence untouched.
fn fenced_replacement(caps: &Captures) -> Option<String> {
    // Fences tagged with a non-SVG language are always ordinary code.
    match caps.get(1).map(|m| m.as_str()) {
        None | Some("svg") | Some("xml") => {}
        Some(_) => return None,
    }

    let body = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();
    if body.starts_with("<svg") && body.ends_with("</svg>") {
        wrap_svg(body)
    } else {
        None
    }
}

/// Wrap a complete SVG document in the display container, synthesizing a
/// `viewBox` from `width`/`height` when the root element lacks one.
///
/// Returns `None` when the root tag cannot be parsed; callers fall back to
/// the original text.
fn wrap_svg(svg: &str) -> Option<String> {
    let svg = svg.trim();
    let open = SVG_OPEN_RE.find(svg)?;
    let open_tag = open.as_str();

    let rendered = if VIEWBOX_RE.is_match(open_tag) {
        svg.to_string()
    } else {
        let width = attr_value(open_tag, &WIDTH_RE).unwrap_or_else(|| DEFAULT_WIDTH.to_string());
        let height = attr_value(open_tag, &HEIGHT_RE).unwrap_or_else(|| DEFAULT_HEIGHT.to_string());
        let patched = patch_open_tag(open_tag, &width, &height)?;
        format!("{patched}{}", &svg[open.end()..])
    };

    Some(format!(
        r#"<div class="rendered-svg" style="background-color: white; padding: 10px; border-radius: 5px; margin: 10px 0;">{rendered}</div>"#
    ))
}

/// Insert a synthesized `viewBox` attribute into the root `<svg ...>` tag.
fn patch_open_tag(open_tag: &str, width: &str, height: &str) -> Option<String> {
    let insertion = format!(r#" viewBox="0 0 {width} {height}""#);
    if let Some(stripped) = open_tag.strip_suffix("/>") {
        Some(format!("{stripped}{insertion}/>"))
    } else {
        let stripped = open_tag.strip_suffix('>')?;
        Some(format!("{stripped}{insertion}>"))
    }
}

/// Extract a quoted attribute value from the root tag.
fn attr_value(tag: &str, re: &Regex) -> Option<String> {
    re.captures(tag)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_svg_block_gets_synthesized_viewbox() {
        let input = "```svg\n<svg width=\"100\" height=\"50\"><rect/></svg>\n```";
        let out = process_message(input);
        assert!(out.contains(r#"viewBox="0 0 100 50""#), "got: {out}");
        assert!(out.contains(r#"class="rendered-svg""#));
        assert!(!out.contains("```"));
    }

    #[test]
    fn fenced_python_block_is_untouched() {
        let input = "```python\nprint(1)\n```";
        assert_eq!(process_message(input), input);
    }

    #[test]
    fn untagged_fence_with_svg_body_is_wrapped_with_defaults() {
        let input = "```\n<svg></svg>\n```";
        let out = process_message(input);
        assert!(out.contains(r#"viewBox="0 0 800 600""#), "got: {out}");
    }

    #[test]
    fn malformed_svg_passes_through_unchanged() {
        let input = "<svg><unclosed";
        assert_eq!(process_message(input), input);
    }

    #[test]
    fn inline_svg_is_wrapped_and_prose_preserved() {
        let input = "before <svg width=\"10\" height=\"20\"></svg> after";
        let out = process_message(input);
        assert!(out.starts_with("before "));
        assert!(out.ends_with(" after"));
        assert!(out.contains(r#"viewBox="0 0 10 20""#));
        assert!(out.contains(r#"<div class="rendered-svg""#));
    }

    #[test]
    fn existing_viewbox_is_not_duplicated() {
        let input = r#"<svg viewBox="0 0 4 4"><circle/></svg>"#;
        let out = process_message(input);
        assert_eq!(out.matches("viewBox").count(), 1);
        assert!(out.contains(r#"class="rendered-svg""#));
    }

    #[test]
    fn svg_inside_python_fence_is_not_wrapped() {
        let input = "```python\nsvg = '<svg width=\"1\" height=\"1\"></svg>'\n```";
        assert_eq!(process_message(input), input);
    }

    #[test]
    fn fenced_graphic_is_not_wrapped_twice_by_inline_pass() {
        let input = "```svg\n<svg width=\"2\" height=\"2\"></svg>\n```";
        let out = process_message(input);
        assert_eq!(out.matches("rendered-svg").count(), 1);
    }

    #[test]
    fn plain_text_passes_through() {
        let input = "Just words, no markup at all.";
        assert_eq!(process_message(input), input);
    }

    #[test]
    fn stroke_width_is_not_mistaken_for_width() {
        let input = r#"<svg stroke-width="3" height="9"></svg>"#;
        let out = process_message(input);
        assert!(out.contains(r#"viewBox="0 0 800 9""#), "got: {out}");
    }
}
