//! Element and attribute allow-lists.

use url::Url;

/// What the sanitizer does with an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    /// Emit the element with filtered attributes
    Keep,
    /// Drop the tag but keep its children
    Unwrap,
    /// Drop the element and everything inside it
    Drop,
    /// External media: kept, or replaced by a placeholder
    Media(MediaKind),
    /// Media children that only make sense inside a media parent
    MediaSource,
    /// Kept only when the source host is allow-listed
    Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MediaKind {
    Image,
    Audio,
    Video,
    Picture,
}

impl MediaKind {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            MediaKind::Image | MediaKind::Picture => "image",
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

const KEPT_ELEMENTS: &[&str] = &[
    "a", "abbr", "acronym", "address", "article", "aside", "b", "bdi", "bdo", "big",
    "blockquote", "br", "caption", "center", "cite", "code", "col", "colgroup", "dd", "del",
    "details", "dfn", "dir", "div", "dl", "dt", "em", "figcaption", "figure", "font", "footer",
    "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "i", "ins", "kbd", "li", "mark",
    "menu", "ol", "p", "pre", "q", "rp", "rt", "ruby", "s", "samp", "section", "small", "span",
    "strike", "strong", "sub", "summary", "sup", "table", "tbody", "td", "tfoot", "th",
    "thead", "time", "tr", "tt", "u", "ul", "var", "wbr",
];

/// Elements removed together with their content.
const DROPPED_ELEMENTS: &[&str] = &[
    "applet", "base", "button", "datalist", "embed", "frame", "frameset", "head", "input",
    "keygen", "link", "math", "meta", "noframes", "noscript", "object", "optgroup", "option",
    "output", "param", "script", "select", "style", "svg", "template", "textarea", "title",
];

const ALLOWED_ATTRIBUTES: &[&str] = &[
    "abbr", "align", "allowfullscreen", "alt", "axis", "border", "cellpadding", "cellspacing",
    "char", "charoff", "cite", "class", "clear", "color", "cols", "colspan", "controls",
    "coords", "data-src", "datetime", "dir", "face", "frameborder", "headers", "height",
    "href", "hreflang", "hspace", "kind", "label", "lang", "loop", "muted", "nowrap", "poster",
    "rel", "rev", "rows", "rowspan", "rules", "scope", "shape", "size", "span", "src",
    "srclang", "start", "style", "summary", "title", "type", "valign", "vspace", "width",
];

/// Attributes whose value is a URL and goes through scheme filtering.
const URL_ATTRIBUTES: &[&str] = &["cite", "data-src", "href", "poster", "src"];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta",
    "param", "source", "track", "wbr",
];

pub(crate) fn disposition(name: &str) -> Disposition {
    match name {
        "img" => Disposition::Media(MediaKind::Image),
        "audio" => Disposition::Media(MediaKind::Audio),
        "video" => Disposition::Media(MediaKind::Video),
        "picture" => Disposition::Media(MediaKind::Picture),
        "source" | "track" => Disposition::MediaSource,
        "iframe" => Disposition::Frame,
        _ if KEPT_ELEMENTS.contains(&name) => Disposition::Keep,
        _ if DROPPED_ELEMENTS.contains(&name) => Disposition::Drop,
        _ => Disposition::Unwrap,
    }
}

pub(crate) fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

pub(crate) fn is_allowed_attribute(name: &str) -> bool {
    ALLOWED_ATTRIBUTES.contains(&name)
}

pub(crate) fn is_url_attribute(name: &str) -> bool {
    URL_ATTRIBUTES.contains(&name)
}

/// Filters a URL attribute value.
///
/// Absolute URLs must use http, https or mailto and are returned untouched.
/// Relative URLs are resolved against `base` when one is given and kept
/// as-is otherwise. Browsers ignore tabs, newlines and control characters
/// inside a scheme (`java\tscript:`), so those are skipped when reading it.
pub(crate) fn clean_url(value: &str, base: Option<&Url>) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    match scheme_of(value) {
        Some(scheme) => match scheme.as_str() {
            "http" | "https" | "mailto" => Some(value.to_string()),
            _ => None,
        },
        None => match base {
            Some(base) => base
                .join(value)
                .ok()
                .filter(|u| matches!(u.scheme(), "http" | "https"))
                .map(|u| u.to_string()),
            None => Some(value.to_string()),
        },
    }
}

fn scheme_of(value: &str) -> Option<String> {
    let mut scheme = String::new();
    for c in value.chars() {
        match c {
            ':' => {
                return if scheme.is_empty() {
                    None
                } else {
                    Some(scheme.to_ascii_lowercase())
                }
            }
            '/' | '?' | '#' => return None,
            c if c.is_control() || c == ' ' => continue,
            c => scheme.push(c),
        }
    }
    None
}

/// True when `src` points at an allow-listed frame host (exact host or a
/// subdomain of one).
pub(crate) fn is_allowed_frame(src: &str, allowed_hosts: &[String]) -> bool {
    let Ok(url) = Url::parse(src) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    allowed_hosts.iter().any(|allowed| {
        let allowed = allowed.to_ascii_lowercase();
        host == allowed || host.ends_with(&format!(".{allowed}"))
    })
}
