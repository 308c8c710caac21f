//! Sanitization of untrusted entry markup.
//!
//! Markup is run through the HTML5 tree builder (so malformed input degrades
//! the same way a browser would repair it) and re-serialized from an
//! allow-list. Two renderings are produced:
//!
//! - [`MediaMode::Allow`] keeps images, audio, video and allow-listed iframes
//! - [`MediaMode::Placeholder`] swaps each of those for an inert
//!   `<span class="media-placeholder">` so rendering fires no request
//!
//! Both renderings are projections: cleaning already-clean output returns it
//! unchanged.
//!
//! # Example
//!
//! ```
//! use feedhq::sanitize::Sanitizer;
//!
//! let clean = Sanitizer::default().sanitize(
//!     r#"<p onclick="x()">Hi<script>alert(1)</script><img src="http://x/y.png"></p>"#,
//!     None,
//! );
//! assert_eq!(clean.content, r#"<p>Hi<img src="http://x/y.png"></p>"#);
//! assert!(!clean.no_media.contains("<img"));
//! ```

mod policy;
mod style;

use scraper::{ElementRef, Html, Node};
use url::Url;

use crate::config::SanitizerConfig;
use crate::model::SanitizedContent;
use crate::util::{collapse_whitespace, strip_control_chars};
use policy::{Disposition, MediaKind};

/// How external media is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaMode {
    Allow,
    Placeholder,
}

/// Allow-list sanitizer for entry bodies.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    allowed_frame_hosts: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(&SanitizerConfig::default())
    }
}

impl Sanitizer {
    pub fn new(config: &SanitizerConfig) -> Self {
        Self {
            allowed_frame_hosts: config.allowed_iframe_hosts.clone(),
        }
    }

    /// Produces both renderings of `raw`. Relative `href`/`src` values are
    /// resolved against `base` when given.
    pub fn sanitize(&self, raw: &str, base: Option<&Url>) -> SanitizedContent {
        SanitizedContent {
            content: self.clean(raw, MediaMode::Allow, base),
            no_media: self.clean(raw, MediaMode::Placeholder, base),
        }
    }

    pub fn clean(&self, raw: &str, mode: MediaMode, base: Option<&Url>) -> String {
        if raw.trim().is_empty() {
            return String::new();
        }
        let first = self.clean_pass(raw, mode, base);
        // The tree builder may re-nest children of unwrapped elements on the
        // next parse; a second pass lands on the fixed point.
        let out = self.clean_pass(&first, mode, base);
        // Whitespace-only output has to agree with the early return above.
        if out.trim().is_empty() {
            String::new()
        } else {
            out
        }
    }

    fn clean_pass(&self, raw: &str, mode: MediaMode, base: Option<&Url>) -> String {
        let fragment = Html::parse_fragment(raw);
        let mut writer = Writer {
            allowed_frame_hosts: &self.allowed_frame_hosts,
            mode,
            base,
            out: String::with_capacity(raw.len()),
        };
        writer.children(fragment.root_element());
        writer.out
    }
}

/// Reduces a title that may contain markup to plain text.
///
/// Tags are removed (the content of script-like elements with them),
/// entities decoded, control characters stripped and whitespace collapsed.
/// The result is meant for plain-text contexts and is not HTML-escaped.
pub fn sanitize_title(raw: &str) -> String {
    if !raw.contains('<') && !raw.contains('&') {
        return collapse_whitespace(&strip_control_chars(raw));
    }
    let fragment = Html::parse_fragment(raw);
    let mut text = String::with_capacity(raw.len());
    collect_text(fragment.root_element(), &mut text);
    collapse_whitespace(&strip_control_chars(&text))
}

fn collect_text(parent: ElementRef<'_>, out: &mut String) {
    for child in parent.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => {
                if element.name() == "br" {
                    out.push(' ');
                } else if policy::disposition(element.name()) != Disposition::Drop {
                    if let Some(element) = ElementRef::wrap(child) {
                        collect_text(element, out);
                    }
                }
            }
            _ => {}
        }
    }
}

struct Writer<'a> {
    allowed_frame_hosts: &'a [String],
    mode: MediaMode,
    base: Option<&'a Url>,
    out: String,
}

impl Writer<'_> {
    fn children(&mut self, parent: ElementRef<'_>) {
        for child in parent.children() {
            match child.value() {
                Node::Text(text) => escape_text(text, &mut self.out),
                Node::Element(_) => {
                    if let Some(element) = ElementRef::wrap(child) {
                        self.element(element);
                    }
                }
                // Comments, doctypes and processing instructions never survive
                _ => {}
            }
        }
    }

    fn element(&mut self, element: ElementRef<'_>) {
        match policy::disposition(element.value().name()) {
            Disposition::Keep => self.keep(element),
            Disposition::Unwrap => self.children(element),
            Disposition::Drop => {}
            Disposition::Media(kind) => match self.mode {
                MediaMode::Allow => self.keep(element),
                MediaMode::Placeholder => {
                    let alt = match kind {
                        MediaKind::Image => element.value().attr("alt"),
                        _ => None,
                    };
                    let src = self.media_source(element);
                    self.placeholder(kind.label(), alt, src);
                }
            },
            Disposition::MediaSource => {
                if self.mode == MediaMode::Allow {
                    self.keep(element);
                }
            }
            Disposition::Frame => {
                let src = element
                    .value()
                    .attr("src")
                    .and_then(|src| policy::clean_url(src, self.base))
                    .filter(|src| policy::is_allowed_frame(src, self.allowed_frame_hosts));
                let Some(src) = src else {
                    return;
                };
                match self.mode {
                    MediaMode::Allow => {
                        // Frame content is fallback text for ancient browsers
                        self.open_tag(element);
                        self.out.push_str("</iframe>");
                    }
                    MediaMode::Placeholder => {
                        self.placeholder("embedded content", None, Some(src));
                    }
                }
            }
        }
    }

    fn keep(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        self.open_tag(element);
        if policy::is_void(name) {
            return;
        }
        // The parser eats one newline right after <pre>
        if name == "pre" && first_text_starts_with_newline(element) {
            self.out.push('\n');
        }
        self.children(element);
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    fn open_tag(&mut self, element: ElementRef<'_>) {
        self.out.push('<');
        self.out.push_str(element.value().name());
        for (name, value) in element.value().attrs() {
            if let Some(value) = self.attribute(name, value) {
                self.out.push(' ');
                self.out.push_str(name);
                self.out.push_str("=\"");
                escape_attribute(&value, &mut self.out);
                self.out.push('"');
            }
        }
        self.out.push('>');
    }

    fn attribute(&self, name: &str, value: &str) -> Option<String> {
        if !policy::is_allowed_attribute(name) {
            return None;
        }
        if name == "style" {
            return style::clean_style(value);
        }
        if policy::is_url_attribute(name) {
            return policy::clean_url(value, self.base);
        }
        Some(value.to_string())
    }

    /// The element's own `src`, else the first `src` of a nested img/source.
    fn media_source(&self, element: ElementRef<'_>) -> Option<String> {
        element
            .value()
            .attr("src")
            .or_else(|| {
                element
                    .descendants()
                    .filter_map(|node| node.value().as_element())
                    .filter(|e| matches!(e.name(), "img" | "source"))
                    .find_map(|e| e.attr("src"))
            })
            .and_then(|src| policy::clean_url(src, self.base))
    }

    fn placeholder(&mut self, label: &str, detail: Option<&str>, src: Option<String>) {
        self.out.push_str("<span class=\"media-placeholder\"");
        if let Some(src) = src {
            self.out.push_str(" data-src=\"");
            escape_attribute(&src, &mut self.out);
            self.out.push('"');
        }
        self.out.push_str(">[");
        self.out.push_str(label);
        let detail = detail.map(collapse_whitespace).filter(|d| !d.is_empty());
        if let Some(detail) = detail {
            self.out.push_str(": ");
            escape_text(&detail, &mut self.out);
        }
        self.out.push_str("]</span>");
    }
}

fn first_text_starts_with_newline(element: ElementRef<'_>) -> bool {
    element
        .children()
        .next()
        .and_then(|child| child.value().as_text().map(|t| t.starts_with('\n')))
        .unwrap_or(false)
}

fn escape_text(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sanitizer() -> Sanitizer {
        Sanitizer::default()
    }

    #[test]
    fn test_script_dropped_image_kept_or_placeholdered() {
        let raw = r#"<p>Hello<script>alert(1)</script><img src="http://x/y.png"></p>"#;
        let clean = sanitizer().sanitize(raw, None);

        assert_eq!(clean.content, r#"<p>Hello<img src="http://x/y.png"></p>"#);
        assert_eq!(
            clean.no_media,
            r#"<p>Hello<span class="media-placeholder" data-src="http://x/y.png">[image]</span></p>"#
        );
    }

    #[test]
    fn test_event_handlers_removed() {
        let out = sanitizer().clean(
            r#"<a href="https://example.com" onclick="steal()" onmouseover="x()">link</a>"#,
            MediaMode::Allow,
            None,
        );
        assert_eq!(out, r#"<a href="https://example.com">link</a>"#);
    }

    #[test]
    fn test_javascript_links_dropped() {
        let out = sanitizer().clean(
            r#"<a href="javascript:alert(1)">click</a>"#,
            MediaMode::Allow,
            None,
        );
        assert_eq!(out, "<a>click</a>");
    }

    #[test]
    fn test_objects_embeds_and_forms_removed() {
        let out = sanitizer().clean(
            r#"<object data="x.swf"><param name="a" value="b">fallback</object><embed src="y.swf"><form action="/x"><input name="q"><p>kept</p></form>"#,
            MediaMode::Allow,
            None,
        );
        assert_eq!(out, "<p>kept</p>");
    }

    #[test]
    fn test_style_filtered() {
        let out = sanitizer().clean(
            r#"<p style="color: red; background-image: url(http://tracker/x.gif)">x</p><style>body{}</style>"#,
            MediaMode::Allow,
            None,
        );
        assert_eq!(out, r#"<p style="color: red">x</p>"#);
    }

    #[test]
    fn test_comments_and_unknown_tags() {
        let out = sanitizer().clean(
            "<!--[if IE]><script>x</script><![endif]--><blink>text</blink>",
            MediaMode::Allow,
            None,
        );
        assert_eq!(out, "text");
    }

    #[test]
    fn test_iframe_allow_list() {
        let raw = r#"<iframe src="https://www.youtube.com/embed/abc" width="560" onload="x()"></iframe><iframe src="https://evil.example/frame"></iframe>"#;
        let clean = sanitizer().sanitize(raw, None);
        assert_eq!(
            clean.content,
            r#"<iframe src="https://www.youtube.com/embed/abc" width="560"></iframe>"#
        );
        assert_eq!(
            clean.no_media,
            r#"<span class="media-placeholder" data-src="https://www.youtube.com/embed/abc">[embedded content]</span>"#
        );
    }

    #[test]
    fn test_video_placeholder_uses_nested_source() {
        let raw = r#"<video controls><source src="https://cdn.example/v.mp4" type="video/mp4"></video>"#;
        let clean = sanitizer().sanitize(raw, None);
        assert_eq!(
            clean.content,
            r#"<video controls=""><source src="https://cdn.example/v.mp4" type="video/mp4"></video>"#
        );
        assert_eq!(
            clean.no_media,
            r#"<span class="media-placeholder" data-src="https://cdn.example/v.mp4">[video]</span>"#
        );
    }

    #[test]
    fn test_image_alt_in_placeholder() {
        let out = sanitizer().clean(
            r#"<img src="https://x/y.png" alt="A  <chart>">"#,
            MediaMode::Placeholder,
            None,
        );
        assert_eq!(
            out,
            r#"<span class="media-placeholder" data-src="https://x/y.png">[image: A &lt;chart&gt;]</span>"#
        );
    }

    #[test]
    fn test_relative_urls_resolved_against_base() {
        let base = Url::parse("https://example.com/posts/1").unwrap();
        let out = sanitizer().clean(
            r#"<a href="../about">About</a><img src="/i.png">"#,
            MediaMode::Allow,
            Some(&base),
        );
        assert_eq!(
            out,
            r#"<a href="https://example.com/about">About</a><img src="https://example.com/i.png">"#
        );
    }

    #[test]
    fn test_malformed_markup_degrades() {
        let out = sanitizer().clean("<p>unclosed <b>bold <i>both", MediaMode::Allow, None);
        assert_eq!(out, "<p>unclosed <b>bold <i>both</i></b></p>");

        let out = sanitizer().clean("<<<>>> & </div>", MediaMode::Allow, None);
        assert_eq!(out, "&lt;&lt;&lt;&gt;&gt;&gt; &amp; ");
    }

    #[test]
    fn test_pre_leading_newline_preserved() {
        let s = sanitizer();
        let out = s.clean("<pre>\n\ncode</pre>", MediaMode::Allow, None);
        assert_eq!(s.clean(&out, MediaMode::Allow, None), out);
    }

    #[test]
    fn test_idempotent_on_samples() {
        let s = sanitizer();
        let samples = [
            r#"<p>Hello<script>alert(1)</script><img src="http://x/y.png" alt="x"></p>"#,
            r#"<a href="https://x"><img src="https://x/i.png"></a>"#,
            "<h1><blink><h2>nested</h2></blink></h1>",
            "<table><tr><td>a<td>b</table><p>after",
            "<b><p>mis</b>nested</p>",
            "<ul><li>one<li>two</ul>",
            r#"<p style="COLOR:Red;;float:left">x&nbsp;y</p>"#,
            "plain & simple < text",
        ];
        for raw in samples {
            for mode in [MediaMode::Allow, MediaMode::Placeholder] {
                let once = s.clean(raw, mode, None);
                let twice = s.clean(&once, mode, None);
                assert_eq!(once, twice, "not idempotent for {raw:?} in {mode:?}");
            }
        }
    }

    #[test]
    fn test_empty_input() {
        let clean = sanitizer().sanitize("   ", None);
        assert_eq!(clean.content, "");
        assert_eq!(clean.no_media, "");
    }

    #[test]
    fn test_attributes_keep_source_order() {
        let s = sanitizer();
        let raw = r#"<img src="https://x/i.png" alt="pic" width="10" height="20" title="t"><iframe src="https://www.youtube.com/embed/a" width="560" height="315" frameborder="0"></iframe>"#;
        let expected = r#"<img src="https://x/i.png" alt="pic" width="10" height="20" title="t"><iframe src="https://www.youtube.com/embed/a" width="560" height="315" frameborder="0"></iframe>"#;
        for _ in 0..20 {
            let once = s.clean(raw, MediaMode::Allow, None);
            assert_eq!(once, expected);
            assert_eq!(s.clean(&once, MediaMode::Allow, None), once);
        }
    }

    #[test]
    fn test_whitespace_only_result_is_empty() {
        let s = sanitizer();
        for raw in ["<tr>\n</tr>", "<script>x</script>\n ", "<style>p{}</style>\t"] {
            for mode in [MediaMode::Allow, MediaMode::Placeholder] {
                assert_eq!(s.clean(raw, mode, None), "", "for {raw:?}");
            }
        }
    }

    #[test]
    fn test_sanitize_title_strips_markup() {
        assert_eq!(sanitize_title("<b>Bold</b> <i>move</i>"), "Bold move");
        assert_eq!(sanitize_title("AT&amp;T  earnings"), "AT&T earnings");
        assert_eq!(sanitize_title("x<script>alert(1)</script>y"), "xy");
        assert_eq!(sanitize_title("line<br>break"), "line break");
        assert_eq!(sanitize_title("  plain\n title \u{7}"), "plain title");
        assert_eq!(sanitize_title(""), "");
    }
}
