//! Spec template rendering.
//!
//! Templates are opaque text with `${VAR}` / `$VAR` placeholders. The result
//! lives in a temporary file owned by the returned `RenderedSpec`; dropping it
//! removes the file on every exit path of the calling step.
use crate::config::DeployConfig;
use anyhow::{Context, Result};
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// A rendered spec materialized on disk for the lifetime of this value.
pub struct RenderedSpec {
    file: NamedTempFile,
}

impl RenderedSpec {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// `path()` as a string argument for CLI invocations.
    pub fn path_arg(&self) -> String {
        self.path().display().to_string()
    }
}

/// Render `template` against the configuration into a fresh temporary file.
pub fn render(template: &Path, config: &DeployConfig) -> Result<RenderedSpec> {
    let text = fs::read_to_string(template)
        .with_context(|| format!("read spec template {}", template.display()))?;
    let rendered = substitute(&text, config.vars());

    let suffix = template
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix("spcs-spec-")
        .suffix(&suffix)
        .tempfile()
        .context("create temporary spec file")?;
    file.write_all(rendered.as_bytes())
        .context("write rendered spec")?;
    file.flush().context("flush rendered spec")?;
    tracing::debug!(
        template = %template.display(),
        rendered = %file.path().display(),
        bytes = rendered.len(),
        "rendered spec"
    );
    Ok(RenderedSpec { file })
}

/// Replace `${VAR}` and `$VAR` with values from `vars`; unset variables become
/// empty strings. `$$` is left untouched.
pub fn substitute(text: &str, vars: &BTreeMap<String, String>) -> String {
    let pattern = placeholder_pattern();
    pattern
        .replace_all(text, |caps: &Captures<'_>| {
            if caps.get(0).is_some_and(|m| m.as_str() == "$$") {
                return "$$".to_string();
            }
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            vars.get(name).cloned().unwrap_or_default()
        })
        .into_owned()
}

fn placeholder_pattern() -> Regex {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("placeholder pattern is valid")
}
