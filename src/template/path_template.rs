// src/template/path_template.rs

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::template::paths::normalize;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^{}]*)\}").expect("placeholder regex is valid"));

/// Placeholders that only resolve when a concrete file was matched.
pub const FILE_PLACEHOLDERS: &[&str] = &["filename", "stem", "ext", "dir"];

pub const KNOWN_PLACEHOLDERS: &[&str] = &["filename", "stem", "ext", "dir", "template", "date", "hop"];

/// A destination path with `{placeholder}` substitutions, e.g.
/// `"archive/{date}/{stem}"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    placeholders: Vec<String>,
}

/// Values available when rendering a [`PathTemplate`].
#[derive(Debug, Clone, Default)]
pub struct PathContext {
    /// Matched file name, for event-triggered and chained Jobs.
    pub filename: Option<String>,
    /// Directory of the matched file relative to the source path.
    pub dir: Option<String>,
    pub template: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// 1-based hop number.
    pub hop: usize,
}

impl PathTemplate {
    /// Parse and check a template. Unknown placeholders and stray braces are
    /// rejected.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut placeholders = Vec::new();
        for caps in PLACEHOLDER.captures_iter(raw) {
            let name = caps[1].trim().to_string();
            if !KNOWN_PLACEHOLDERS.contains(&name.as_str()) {
                return Err(format!(
                    "unresolved placeholder '{{{name}}}' in path '{raw}' (known: {})",
                    KNOWN_PLACEHOLDERS.join(", ")
                ));
            }
            placeholders.push(name);
        }

        let stripped = PLACEHOLDER.replace_all(raw, "");
        if stripped.contains('{') || stripped.contains('}') {
            return Err(format!("unbalanced brace in path '{raw}'"));
        }

        Ok(Self {
            raw: raw.to_string(),
            placeholders,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn uses_file_placeholders(&self) -> bool {
        self.placeholders
            .iter()
            .any(|p| FILE_PLACEHOLDERS.contains(&p.as_str()))
    }

    /// Substitute placeholders; the result is a normalised endpoint path.
    pub fn render(&self, ctx: &PathContext) -> Result<String, String> {
        let mut missing = None;
        let rendered = PLACEHOLDER.replace_all(&self.raw, |caps: &regex::Captures<'_>| {
            match resolve(caps[1].trim(), ctx) {
                Some(v) => v,
                None => {
                    missing.get_or_insert_with(|| caps[1].trim().to_string());
                    String::new()
                }
            }
        });

        if let Some(name) = missing {
            return Err(format!(
                "placeholder '{{{name}}}' in '{}' has no value for this trigger",
                self.raw
            ));
        }

        Ok(normalize(&rendered))
    }
}

fn resolve(name: &str, ctx: &PathContext) -> Option<String> {
    match name {
        "filename" => ctx.filename.clone(),
        "stem" => ctx.filename.as_deref().map(|f| {
            Path::new(f)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        }),
        "ext" => ctx.filename.as_deref().map(|f| {
            Path::new(f)
                .extension()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        }),
        "dir" => ctx.dir.clone(),
        "template" => Some(ctx.template.clone()),
        "date" => Some(ctx.date.clone()),
        "hop" => Some(ctx.hop.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(filename: Option<&str>) -> PathContext {
        PathContext {
            filename: filename.map(str::to_string),
            dir: Some("cam1".into()),
            template: "ingest".into(),
            date: "2026-10-19".into(),
            hop: 2,
        }
    }

    #[test]
    fn renders_file_and_context_placeholders() {
        let t = PathTemplate::parse("/raw/{date}/{dir}/{stem}.{ext}-{hop}/").unwrap();
        assert!(t.uses_file_placeholders());
        assert_eq!(
            t.render(&ctx(Some("clip.mp4"))).unwrap(),
            "raw/2026-10-19/cam1/clip.mp4-2"
        );
    }

    #[test]
    fn rejects_unknown_placeholders_and_braces() {
        assert!(PathTemplate::parse("out/{nope}").is_err());
        assert!(PathTemplate::parse("out/{date").is_err());
        assert!(PathTemplate::parse("out/date}").is_err());
    }

    #[test]
    fn file_placeholder_without_file_fails_to_render() {
        let t = PathTemplate::parse("out/{filename}").unwrap();
        let err = t.render(&ctx(None)).unwrap_err();
        assert!(err.contains("filename"));
    }

    #[test]
    fn plain_paths_render_unchanged() {
        let t = PathTemplate::parse("archive/cold").unwrap();
        assert!(!t.uses_file_placeholders());
        assert_eq!(t.render(&ctx(None)).unwrap(), "archive/cold");
    }
}
