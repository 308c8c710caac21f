//! Inline `style` filtering.

const ALLOWED_PROPERTIES: &[&str] = &[
    "azimuth", "background-color", "border", "border-bottom", "border-bottom-color",
    "border-collapse", "border-color", "border-left", "border-left-color", "border-right",
    "border-right-color", "border-spacing", "border-style", "border-top", "border-top-color",
    "border-width", "clear", "color", "direction", "display", "elevation", "float", "font",
    "font-family", "font-size", "font-style", "font-variant", "font-weight", "height",
    "letter-spacing", "line-height", "list-style-type", "margin", "margin-bottom",
    "margin-left", "margin-right", "margin-top", "overflow", "padding", "padding-bottom",
    "padding-left", "padding-right", "padding-top", "pause", "pause-after", "pause-before",
    "pitch", "pitch-range", "richness", "speak", "speak-header", "speak-numeral",
    "speak-punctuation", "speech-rate", "stress", "text-align", "text-decoration",
    "text-indent", "unicode-bidi", "vertical-align", "voice-family", "volume", "white-space",
    "width",
];

/// Value fragments that either load resources or execute code.
const FORBIDDEN_FRAGMENTS: &[&str] = &["url(", "expression", "javascript:", "behavior", "-moz-binding", "/*", "@import"];

/// Reduces a `style` attribute to allow-listed declarations.
///
/// Output is `prop: value` pairs joined by `"; "`, which this function maps
/// to itself. Returns `None` when nothing survives.
pub(crate) fn clean_style(value: &str) -> Option<String> {
    let declarations: Vec<String> = value
        .split(';')
        .filter_map(|decl| {
            let (prop, val) = decl.split_once(':')?;
            let prop = prop.trim().to_ascii_lowercase();
            let val = val.trim();
            if val.is_empty() || !ALLOWED_PROPERTIES.contains(&prop.as_str()) {
                return None;
            }
            let lowered = val.to_ascii_lowercase();
            if val.contains('\\')
                || val.contains('<')
                || FORBIDDEN_FRAGMENTS.iter().any(|f| lowered.contains(f))
            {
                return None;
            }
            Some(format!("{prop}: {val}"))
        })
        .collect();

    if declarations.is_empty() {
        None
    } else {
        Some(declarations.join("; "))
    }
}
