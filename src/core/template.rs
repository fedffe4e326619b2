//! Text templating for URLs, asset names, checksum files, and wrapper
//! scripts.
//!
//! Templates are minijinja source strings over a small variable set:
//! `{{version}}`, `{{tag}}`, `{{os}}`, `{{arch}}`, `{{name}}`, and
//! `{{asset}}` once an asset has been chosen. Wrapper scripts additionally
//! see `{{app_dir}}` and `{{bin_dir}}`.

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template error in '{template}': {source}")]
    Render {
        template: String,
        #[source]
        source: minijinja::Error,
    },

    #[error("'{0}' is not a valid http(s) URL")]
    InvalidUrl(String),
}

/// Variables available to URL and asset templates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateVars {
    pub name: String,
    pub version: String,
    pub tag: String,
    pub os: String,
    pub arch: String,
    pub asset: String,
}

impl TemplateVars {
    pub fn new(
        name: &str,
        version: &str,
        tag: &str,
        platform: &crate::types::Platform,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            // `tag` falls back to the normalized version when the source
            // did not preserve a literal tag.
            tag: if tag.is_empty() { version } else { tag }.to_string(),
            os: platform.os.clone(),
            arch: platform.arch.clone(),
            asset: String::new(),
        }
    }

    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = asset.into();
        self
    }
}

fn environment<'a>() -> Environment<'a> {
    let mut env = Environment::new();
    // Unknown variables render as errors rather than silently vanishing
    // into malformed URLs.
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

/// Render a template against arbitrary serializable context.
pub fn render_with<S: Serialize>(template: &str, ctx: &S) -> Result<String, TemplateError> {
    environment()
        .render_str(template, ctx)
        .map_err(|source| TemplateError::Render {
            template: template.to_string(),
            source,
        })
}

/// Render a template against the standard variable set.
pub fn render(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    render_with(template, vars)
}

/// Render a URL template. A template ending in `/` has `{{asset}}`
/// appended automatically.
pub fn render_url(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let effective = if template.ends_with('/') {
        format!("{template}{{{{asset}}}}")
    } else {
        template.to_string()
    };
    let rendered = render(&effective, vars)?;
    ensure_http_url(&rendered)?;
    Ok(rendered)
}

/// Validate that a rendered string is a syntactically valid http(s) URL.
pub fn ensure_http_url(s: &str) -> Result<Url, TemplateError> {
    let parsed = Url::parse(s).map_err(|_| TemplateError::InvalidUrl(s.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        _ => Err(TemplateError::InvalidUrl(s.to_string())),
    }
}

/// Join a possibly-relative checksum file reference against the directory
/// of the asset download URL. Absolute URLs are used as-is.
pub fn join_against_url_dir(download_url: &str, reference: &str) -> Result<String, TemplateError> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        ensure_http_url(reference)?;
        return Ok(reference.to_string());
    }
    let base = ensure_http_url(download_url)?;
    let joined = base
        .join(reference)
        .map_err(|_| TemplateError::InvalidUrl(reference.to_string()))?;
    Ok(joined.to_string())
}
