use once_cell::sync::Lazy;
use regex::{NoExpand, Regex};

/// The default preview-name template.
pub const DEFAULT_PREVIEW_PATTERN: &str = "{{name}}-preview";

static NAME_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*name\s*\}\}").expect("placeholder regex"));

/// Renders the preview service name from a `{{name}}` template. Whitespace
/// inside the braces is tolerated.
pub fn apply_pattern(pattern: &str, service: &str) -> String {
    NAME_PLACEHOLDER
        .replace_all(pattern, NoExpand(service))
        .into_owned()
}

/// Resolves the preview name for a base service: suffix replacement when
/// both suffixes are configured and the name carries the active suffix,
/// otherwise the pattern fallback.
pub fn derive_preview_name(
    name: &str,
    active_suffix: &str,
    preview_suffix: &str,
    pattern: &str,
) -> String {
    if !active_suffix.is_empty() && !preview_suffix.is_empty() {
        if let Some(stem) = name.strip_suffix(active_suffix) {
            return format!("{stem}{preview_suffix}");
        }
    }
    apply_pattern(pattern, name)
}
