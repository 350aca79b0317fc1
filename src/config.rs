//! CF CLI config file (`~/.cf/config.json`): API target, token and targeted space.

use anyhow::{Context, Result};
use base64::Engine;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfConfig {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default, rename = "SSLDisabled")]
    pub ssl_disabled: bool,
    #[serde(default)]
    pub organization_fields: TargetFields,
    #[serde(default)]
    pub space_fields: TargetFields,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TargetFields {
    #[serde(default, rename = "GUID")]
    pub guid: String,
    #[serde(default, rename = "Name")]
    pub name: String,
}

/// `$CF_HOME/.cf/config.json`, or the same under the home directory.
pub fn config_path() -> Option<PathBuf> {
    let base = std::env::var_os("CF_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(dirs::home_dir)?;
    Some(base.join(".cf").join("config.json"))
}

/// Load the CF CLI config. A missing file yields an empty config so that
/// flags alone can supply the target.
pub fn load() -> Result<CfConfig> {
    match config_path() {
        Some(path) if path.exists() => load_from(&path),
        _ => Ok(CfConfig::default()),
    }
}

pub fn load_from(path: &Path) -> Result<CfConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read CF config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse CF config {}", path.display()))
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl CfConfig {
    pub fn org_name(&self) -> Option<String> {
        non_empty(&self.organization_fields.name)
    }

    pub fn space_name(&self) -> Option<String> {
        non_empty(&self.space_fields.name)
    }
}

/// `user_name` claim of a `bearer <jwt>` access token. The signature is not checked.
pub fn token_user_name(token: &str) -> Option<String> {
    let jwt = token
        .strip_prefix("bearer ")
        .or_else(|| token.strip_prefix("Bearer "))
        .unwrap_or(token);
    let claims = jwt.split('.').nth(1)?;
    let raw = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(claims.trim_end_matches('='))
        .ok()?;
    let value: serde_json::Value = serde_json::from_slice(&raw).ok()?;
    value
        .get("user_name")
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
