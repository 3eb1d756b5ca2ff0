//! Secret resolution and upsert.
//!
//! Each secret is resolved through its own fallback chain and written with
//! `CREATE OR REPLACE SECRET`; nothing is ever read back. Values are logged
//! by name and length only, and the upsert statement travels on stdin.
use crate::config::{
    DeployConfig, Profile, KEY_ADMIN_USERS, KEY_DB_URI, KEY_FERNET_KEY, KEY_POSTGRES_DB,
    KEY_POSTGRES_PASSWORD, KEY_POSTGRES_USER, KEY_SECRET_KEY, LEGACY_ADMIN_ALIASES,
    LEGACY_DB_URI, LEGACY_FERNET_KEY, LEGACY_SECRET_KEY,
};
use crate::error::DeployError;
use crate::gateway::snow::quote_sql_literal;
use crate::gateway::ControlPlane;
use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;

const DRIVER_SCHEME: &str = "postgresql+psycopg2://";
const BARE_SCHEME: &str = "postgres://";
const KEY_BYTES: usize = 32;
const ADMIN_FALLBACK: &str = "admin";

/// Where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    Explicit(&'static str),
    Legacy(&'static str),
    Synthesized,
    Generated,
    Principal,
    LiteralFallback,
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::Explicit(key) => write!(f, "explicit {key}"),
            SecretSource::Legacy(key) => write!(f, "legacy {key}"),
            SecretSource::Synthesized => f.write_str("synthesized in-service default"),
            SecretSource::Generated => f.write_str("generated"),
            SecretSource::Principal => f.write_str("connection principal"),
            SecretSource::LiteralFallback => f.write_str("literal fallback"),
        }
    }
}

/// A secret ready to upsert. `Debug` never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub name: String,
    pub value: String,
    pub source: SecretSource,
}

impl fmt::Debug for ResolvedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedSecret")
            .field("name", &self.name)
            .field("len", &self.value.len())
            .field("source", &self.source)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SecretBundle {
    pub db_uri: ResolvedSecret,
    pub secret_key: ResolvedSecret,
    pub fernet_key: ResolvedSecret,
    pub admin_users: ResolvedSecret,
}

impl SecretBundle {
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedSecret> {
        [
            &self.db_uri,
            &self.secret_key,
            &self.fernet_key,
            &self.admin_users,
        ]
        .into_iter()
    }
}

/// Resolve all four secrets. `principal` is only consulted for the admin list.
pub fn resolve_bundle(
    config: &DeployConfig,
    principal: impl FnOnce() -> Option<String>,
) -> Result<SecretBundle, DeployError> {
    Ok(bundle_with_db_uri(config, resolve_db_uri(config)?, principal))
}

/// Resolve the remaining secrets around an already chosen database URI.
pub fn bundle_with_db_uri(
    config: &DeployConfig,
    db_uri: ResolvedSecret,
    principal: impl FnOnce() -> Option<String>,
) -> SecretBundle {
    let names = &config.secret_names;
    SecretBundle {
        db_uri,
        secret_key: resolve_key(config, &names.secret_key, KEY_SECRET_KEY, LEGACY_SECRET_KEY),
        fernet_key: resolve_key(config, &names.fernet_key, KEY_FERNET_KEY, LEGACY_FERNET_KEY),
        admin_users: resolve_admin_users(config, principal),
    }
}

pub fn resolve_db_uri(config: &DeployConfig) -> Result<ResolvedSecret, DeployError> {
    let name = config.secret_names.db_uri.clone();
    let (value, source) = if let Some(value) = config.get(KEY_DB_URI) {
        (value.to_string(), SecretSource::Explicit(KEY_DB_URI))
    } else if let Some(value) = config.get(LEGACY_DB_URI) {
        (value.to_string(), SecretSource::Legacy(LEGACY_DB_URI))
    } else if config.profile == Profile::AllInOne {
        (all_in_one_db_uri(config, &name)?, SecretSource::Synthesized)
    } else {
        return Err(DeployError::MissingSecret {
            name,
            hint: format!("{KEY_DB_URI} or {LEGACY_DB_URI}"),
        });
    };
    Ok(ResolvedSecret {
        name,
        value: rewrite_db_scheme(&value),
        source,
    })
}

/// Qualify a bare `postgres://` URI with the driver the app expects.
pub fn rewrite_db_scheme(uri: &str) -> String {
    match uri.strip_prefix(BARE_SCHEME) {
        Some(rest) => format!("{DRIVER_SCHEME}{rest}"),
        None => uri.to_string(),
    }
}

/// Fresh key material: 32 random bytes, URL-safe base64 (Fernet-compatible).
pub fn generate_key() -> String {
    let mut bytes = [0u8; KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

fn resolve_key(
    config: &DeployConfig,
    name: &str,
    explicit: &'static str,
    legacy: &'static str,
) -> ResolvedSecret {
    let (value, source) = if let Some(value) = config.get(explicit) {
        (value.to_string(), SecretSource::Explicit(explicit))
    } else if let Some(value) = config.get(legacy) {
        (value.to_string(), SecretSource::Legacy(legacy))
    } else {
        (generate_key(), SecretSource::Generated)
    };
    ResolvedSecret {
        name: name.to_string(),
        value,
        source,
    }
}

fn resolve_admin_users(
    config: &DeployConfig,
    principal: impl FnOnce() -> Option<String>,
) -> ResolvedSecret {
    let name = config.secret_names.admin_users.clone();
    let explicit = config
        .get(KEY_ADMIN_USERS)
        .map(|value| (value.to_string(), SecretSource::Explicit(KEY_ADMIN_USERS)));
    let legacy = || {
        LEGACY_ADMIN_ALIASES.iter().find_map(|&key| {
            config
                .get(key)
                .map(|value| (value.to_string(), SecretSource::Legacy(key)))
        })
    };
    let (value, source) = explicit
        .or_else(legacy)
        .or_else(|| principal().map(|user| (user, SecretSource::Principal)))
        .unwrap_or_else(|| {
            tracing::warn!(
                secret = %name,
                "no admin list configured and principal lookup failed; granting admin to `{ADMIN_FALLBACK}`"
            );
            (ADMIN_FALLBACK.to_string(), SecretSource::LiteralFallback)
        });
    ResolvedSecret {
        name,
        value,
        source,
    }
}

/// URI of the co-located database. The password must match the one the
/// service spec inlines into the Postgres container, so it is never defaulted.
fn all_in_one_db_uri(config: &DeployConfig, name: &str) -> Result<String, DeployError> {
    let password = config
        .get(KEY_POSTGRES_PASSWORD)
        .ok_or_else(|| DeployError::MissingSecret {
            name: name.to_string(),
            hint: format!("{KEY_DB_URI}, {LEGACY_DB_URI}, or {KEY_POSTGRES_PASSWORD}"),
        })?;
    Ok(format!(
        "{DRIVER_SCHEME}{}:{}@localhost:5432/{}",
        config.get_or(KEY_POSTGRES_USER, "superset"),
        password,
        config.get_or(KEY_POSTGRES_DB, "superset"),
    ))
}

#[derive(Debug, Deserialize)]
struct PrincipalRow {
    #[serde(rename = "USER_NAME", alias = "user_name")]
    user_name: Option<String>,
}

/// Name of the authenticated user on the current connection, if obtainable.
pub fn current_principal(plane: &ControlPlane<'_>) -> Option<String> {
    match plane.sql_json("SELECT CURRENT_USER() AS USER_NAME") {
        Ok(value) => principal_from_rows(value),
        Err(err) => {
            tracing::debug!(error = %err, "principal lookup failed");
            None
        }
    }
}

fn principal_from_rows(value: Value) -> Option<String> {
    let rows: Vec<PrincipalRow> = serde_json::from_value(value).ok()?;
    rows.into_iter()
        .filter_map(|row| row.user_name)
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

pub fn upsert_statement(qualified_name: &str, value: &str) -> String {
    format!(
        "CREATE OR REPLACE SECRET {qualified_name} TYPE = GENERIC_STRING SECRET_STRING = {}",
        quote_sql_literal(value)
    )
}

/// Resolve every secret and upsert it through the control plane.
pub fn create_or_update_secrets(config: &DeployConfig, plane: &ControlPlane<'_>) -> Result<()> {
    let bundle = resolve_bundle(config, || current_principal(plane))?;
    for secret in bundle.iter() {
        let qualified = config.qualify(&secret.name);
        plane
            .sql_confidential(upsert_statement(&qualified, &secret.value))
            .with_context(|| format!("upsert secret {qualified}"))?;
        tracing::info!(
            secret = %qualified,
            len = secret.value.len(),
            source = %secret.source,
            "secret upserted"
        );
    }
    Ok(())
}
