//! Deployment configuration: env-file loading, key catalog, and canonical forms.
//!
//! The configuration is resolved once at startup into an immutable
//! `DeployConfig` and passed by reference to every component. Stage
//! references and image paths are canonicalized here so downstream code never
//! has to re-derive them.
use crate::error::DeployError;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Local directory uploaded to the config stage.
pub const CONFIG_DIR_REL: &str = "superset/config";
/// Repo-local control-plane connection config directory.
pub const SNOW_CONFIG_DIR_REL: &str = ".snowflake";
/// Default env file, relative to the project directory.
pub const DEFAULT_ENV_FILE: &str = ".env";

pub const KEY_CONNECTION: &str = "SNOWFLAKE_CONNECTION";
pub const KEY_DATABASE: &str = "SNOWFLAKE_DATABASE";
pub const KEY_SCHEMA: &str = "SNOWFLAKE_SCHEMA";
pub const KEY_CONFIG_STAGE: &str = "SPCS_CONFIG_STAGE";
pub const KEY_CONFIG_STAGE_NAME: &str = "SPCS_CONFIG_STAGE_NAME";
pub const KEY_ARTIFACT_STAGE: &str = "SPCS_ARTIFACT_STAGE";
pub const KEY_ARTIFACT_STAGE_NAME: &str = "SPCS_ARTIFACT_STAGE_NAME";
pub const KEY_IMAGE_REPOSITORY: &str = "SPCS_IMAGE_REPOSITORY";
pub const KEY_IMAGE_NAME: &str = "SPCS_IMAGE_NAME";
pub const KEY_IMAGE: &str = "SPCS_IMAGE";
pub const KEY_SECONDARY_IMAGES: &str = "SPCS_SECONDARY_IMAGES";
pub const KEY_LOCAL_IMAGE: &str = "LOCAL_IMAGE";
pub const KEY_DOCKERFILE: &str = "DOCKERFILE";
pub const KEY_BUILD_CONTEXT: &str = "BUILD_CONTEXT";
pub const KEY_BUILD_PLATFORM: &str = "BUILD_PLATFORM";
pub const KEY_COMPUTE_POOL: &str = "SPCS_COMPUTE_POOL";
pub const KEY_INSTANCE_FAMILY: &str = "SPCS_INSTANCE_FAMILY";
pub const KEY_SERVICE_NAME: &str = "SPCS_SERVICE_NAME";
pub const KEY_CONTAINER_NAME: &str = "SPCS_CONTAINER_NAME";
pub const KEY_PROFILE: &str = "SPCS_PROFILE";
pub const KEY_SERVICE_SPEC: &str = "SPCS_SERVICE_SPEC";
pub const KEY_JOB_SPEC: &str = "SPCS_JOB_SPEC";
pub const KEY_SNOW_DEBUG: &str = "SNOW_DEBUG";
pub const KEY_CONTAINER_ENGINE: &str = "CONTAINER_ENGINE";
pub const KEY_LOCAL_CONTAINER: &str = "LOCAL_CONTAINER_NAME";
pub const KEY_LOCAL_PORT: &str = "LOCAL_PORT";

pub const KEY_SECRET_DB_URI_NAME: &str = "SPCS_SECRET_DB_URI_NAME";
pub const KEY_SECRET_SECRET_KEY_NAME: &str = "SPCS_SECRET_SECRET_KEY_NAME";
pub const KEY_SECRET_FERNET_KEY_NAME: &str = "SPCS_SECRET_FERNET_KEY_NAME";
pub const KEY_SECRET_ADMIN_USERS_NAME: &str = "SPCS_SECRET_ADMIN_USERS_NAME";

pub const KEY_DB_URI: &str = "SUPERSET_DB_URI";
pub const KEY_SECRET_KEY: &str = "SUPERSET_SECRET_KEY";
pub const KEY_FERNET_KEY: &str = "SUPERSET_FERNET_KEY";
pub const KEY_ADMIN_USERS: &str = "SUPERSET_ADMIN_USERS";
pub const KEY_POSTGRES_USER: &str = "POSTGRES_USER";
pub const KEY_POSTGRES_PASSWORD: &str = "POSTGRES_PASSWORD";
pub const KEY_POSTGRES_DB: &str = "POSTGRES_DB";

pub const LEGACY_DB_URI: &str = "DATABASE_URL";
pub const LEGACY_SECRET_KEY: &str = "SECRET_KEY";
pub const LEGACY_FERNET_KEY: &str = "FERNET_KEY";
pub const LEGACY_ADMIN_ALIASES: [&str; 2] = ["SUPERSET_ADMIN_USER", "ADMIN_USERS"];

pub const FLAG_AUTO_BOOTSTRAP: &str = "SPCS_AUTO_BOOTSTRAP";
pub const FLAG_PUSH: &str = "SPCS_PUSH";
pub const FLAG_PUSH_ALL_IMAGES: &str = "SPCS_PUSH_ALL_IMAGES";
pub const FLAG_RUN_BOOTSTRAP_JOB: &str = "SPCS_RUN_BOOTSTRAP_JOB";
pub const FLAG_JOB_UNIQUE_NAMES: &str = "SPCS_JOB_UNIQUE_NAMES";
pub const FLAG_AUTO_CREATE_COMPUTE_POOL: &str = "SPCS_AUTO_CREATE_COMPUTE_POOL";

/// Secret values required before apply under the all-in-one profile.
pub const ALL_IN_ONE_SECRET_KEYS: [&str; 3] =
    [KEY_POSTGRES_PASSWORD, KEY_SECRET_KEY, KEY_FERNET_KEY];

/// Deployment topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Superset alone; metadata DB and cache are external.
    Managed,
    /// Superset, Postgres, and Redis co-located in one service.
    AllInOne,
}

impl Profile {
    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "managed" => Ok(Profile::Managed),
            "all-in-one" | "all_in_one" | "allinone" | "aio" => Ok(Profile::AllInOne),
            other => Err(DeployError::Configuration(format!(
                "{KEY_PROFILE} must be `managed` or `all-in-one`, got `{other}`"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Managed => "managed",
            Profile::AllInOne => "all-in-one",
        }
    }

    pub fn default_service_spec(&self) -> &'static str {
        match self {
            Profile::Managed => "spcs/service-managed.yaml",
            Profile::AllInOne => "spcs/service-all-in-one.yaml",
        }
    }

    pub fn default_job_spec(&self) -> &'static str {
        match self {
            Profile::Managed => "spcs/job-bootstrap-managed.yaml",
            Profile::AllInOne => "spcs/job-bootstrap-all-in-one.yaml",
        }
    }

    /// One-shot jobs cannot host the co-located processes the app needs.
    pub fn permits_bootstrap_job(&self) -> bool {
        matches!(self, Profile::Managed)
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage reference kept in its canonical `@`-prefixed form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRef {
    canonical: String,
}

impl StageRef {
    pub fn parse(raw: &str) -> Result<Self, DeployError> {
        let canonical = normalize_stage_ref(raw);
        if canonical.len() <= 1 || canonical[1..].starts_with('/') {
            return Err(DeployError::Configuration(format!(
                "invalid stage reference `{raw}`"
            )));
        }
        Ok(Self { canonical })
    }

    /// `@DB.SCHEMA.STAGE[/path]`, used for copy and mount operations.
    pub fn at_ref(&self) -> &str {
        &self.canonical
    }

    /// `DB.SCHEMA.STAGE`, used for object creation.
    pub fn object_name(&self) -> &str {
        let bare = &self.canonical[1..];
        bare.split_once('/').map_or(bare, |(name, _)| name)
    }
}

/// Ensure exactly one leading `@`; trailing path segments are preserved.
pub fn normalize_stage_ref(raw: &str) -> String {
    format!("@{}", raw.trim().trim_start_matches('@'))
}

/// Container registries only accept lowercase repository paths.
pub fn fold_image_ref(raw: &str) -> String {
    raw.to_ascii_lowercase()
}

/// A non-primary image pushed alongside the app image (e.g. postgres, redis).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryImage {
    pub local: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flags {
    pub auto_bootstrap: bool,
    pub push: bool,
    pub push_all_images: bool,
    pub run_bootstrap_job: bool,
    pub unique_job_names: bool,
    pub auto_create_compute_pool: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretNames {
    pub db_uri: String,
    pub secret_key: String,
    pub fernet_key: String,
    pub admin_users: String,
}

#[derive(Debug, Clone)]
pub struct DeployConfig {
    root: PathBuf,
    vars: BTreeMap<String, String>,
    child_env: BTreeMap<String, String>,
    pub profile: Profile,
    pub connection: Option<String>,
    pub database: String,
    pub schema: String,
    pub config_stage: StageRef,
    pub artifact_stage: StageRef,
    pub image_repository: String,
    pub image: String,
    pub local_image: String,
    pub secondary_images: Vec<SecondaryImage>,
    pub flags: Flags,
    pub secret_names: SecretNames,
    pub snow_debug: bool,
}

impl DeployConfig {
    /// Resolve configuration from the process environment and an optional env file.
    ///
    /// A missing env file is not an error; configuration then comes entirely
    /// from the caller's environment.
    pub fn load(root: &Path, env_file: Option<&Path>, connection: Option<String>) -> Result<Self> {
        let env_path = match env_file {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => root.join(path),
            None => root.join(DEFAULT_ENV_FILE),
        };
        let file_vars = if env_path.is_file() {
            let text = fs::read_to_string(&env_path)
                .with_context(|| format!("read {}", env_path.display()))?;
            tracing::debug!(path = %env_path.display(), "loaded env file");
            parse_env_file(&text)?
        } else {
            if env_file.is_some() {
                tracing::warn!(
                    path = %env_path.display(),
                    "env file not found; using process environment only"
                );
            }
            BTreeMap::new()
        };
        let mut config = Self::from_layers(root, std::env::vars(), file_vars)?;
        if let Some(name) = connection.filter(|name| !name.trim().is_empty()) {
            config.vars.insert(KEY_CONNECTION.to_string(), name.clone());
            config.connection = Some(name);
        }
        Ok(config)
    }

    /// Merge the file layer over process defaults and canonicalize.
    pub fn from_layers(
        root: &Path,
        process: impl IntoIterator<Item = (String, String)>,
        file: BTreeMap<String, String>,
    ) -> Result<Self, DeployError> {
        let mut vars: BTreeMap<String, String> = process.into_iter().collect();
        let child_env = file.clone();
        vars.extend(file);

        let lookup = |key: &str| non_empty(&vars, key).map(str::to_string);
        let database = lookup(KEY_DATABASE).unwrap_or_else(|| "SUPERSET_DB".to_string());
        let schema = lookup(KEY_SCHEMA).unwrap_or_else(|| "APP".to_string());
        let qualify = |name: &str| qualify_name(&database, &schema, name);

        let profile = Profile::parse(lookup(KEY_PROFILE).as_deref().unwrap_or_default())?;
        let config_stage = StageRef::parse(
            &lookup(KEY_CONFIG_STAGE).unwrap_or_else(|| qualify("SUPERSET_CONFIG")),
        )?;
        let artifact_stage = StageRef::parse(
            &lookup(KEY_ARTIFACT_STAGE).unwrap_or_else(|| qualify("SUPERSET_ARTIFACTS")),
        )?;
        let image_repository = lookup(KEY_IMAGE_REPOSITORY)
            .map(|name| qualify(&name))
            .unwrap_or_else(|| qualify("SUPERSET_REPO"));
        let image_name = lookup(KEY_IMAGE_NAME).unwrap_or_else(|| "superset:latest".to_string());
        let image = fold_image_ref(&lookup(KEY_IMAGE).unwrap_or_else(|| {
            format!(
                "/{}/{}/{}/{}",
                database,
                schema,
                last_segment(&image_repository),
                image_name
            )
        }));
        let local_image = lookup(KEY_LOCAL_IMAGE).unwrap_or_else(|| "superset-spcs:latest".into());
        let secondary_images = parse_secondary_images(lookup(KEY_SECONDARY_IMAGES).as_deref());

        let flag = |key: &str, default: bool| match non_empty(&vars, key) {
            Some(raw) => parse_bool(key, raw),
            None => Ok(default),
        };
        let flags = Flags {
            auto_bootstrap: flag(FLAG_AUTO_BOOTSTRAP, true)?,
            push: flag(FLAG_PUSH, false)?,
            push_all_images: flag(FLAG_PUSH_ALL_IMAGES, false)?,
            run_bootstrap_job: flag(FLAG_RUN_BOOTSTRAP_JOB, true)?,
            unique_job_names: flag(FLAG_JOB_UNIQUE_NAMES, false)?,
            auto_create_compute_pool: flag(FLAG_AUTO_CREATE_COMPUTE_POOL, true)?,
        };
        let snow_debug = flag(KEY_SNOW_DEBUG, false)?;
        let secret_names = SecretNames {
            db_uri: lookup(KEY_SECRET_DB_URI_NAME).unwrap_or_else(|| KEY_DB_URI.into()),
            secret_key: lookup(KEY_SECRET_SECRET_KEY_NAME).unwrap_or_else(|| KEY_SECRET_KEY.into()),
            fernet_key: lookup(KEY_SECRET_FERNET_KEY_NAME).unwrap_or_else(|| KEY_FERNET_KEY.into()),
            admin_users: lookup(KEY_SECRET_ADMIN_USERS_NAME)
                .unwrap_or_else(|| KEY_ADMIN_USERS.into()),
        };
        let container_name = lookup(KEY_CONTAINER_NAME).unwrap_or_else(|| "superset".into());
        let connection = lookup(KEY_CONNECTION);
        let postgres_user = lookup(KEY_POSTGRES_USER).unwrap_or_else(|| "superset".into());
        let postgres_db = lookup(KEY_POSTGRES_DB).unwrap_or_else(|| "superset".into());

        // Export canonical forms so rendered specs see the same values the steps use.
        let canonical = [
            (KEY_DATABASE, database.clone()),
            (KEY_SCHEMA, schema.clone()),
            (KEY_PROFILE, profile.as_str().to_string()),
            (KEY_CONFIG_STAGE, config_stage.at_ref().to_string()),
            (KEY_CONFIG_STAGE_NAME, config_stage.object_name().to_string()),
            (KEY_ARTIFACT_STAGE, artifact_stage.at_ref().to_string()),
            (KEY_ARTIFACT_STAGE_NAME, artifact_stage.object_name().to_string()),
            (KEY_IMAGE_REPOSITORY, image_repository.clone()),
            (KEY_IMAGE_NAME, image_name),
            (KEY_IMAGE, image.clone()),
            (KEY_LOCAL_IMAGE, local_image.clone()),
            (KEY_CONTAINER_NAME, container_name),
            (KEY_SECRET_DB_URI_NAME, secret_names.db_uri.clone()),
            (KEY_SECRET_SECRET_KEY_NAME, secret_names.secret_key.clone()),
            (KEY_SECRET_FERNET_KEY_NAME, secret_names.fernet_key.clone()),
            (KEY_SECRET_ADMIN_USERS_NAME, secret_names.admin_users.clone()),
            (KEY_POSTGRES_USER, postgres_user),
            (KEY_POSTGRES_DB, postgres_db),
        ];
        for (key, value) in canonical {
            vars.insert(key.to_string(), value);
        }

        Ok(Self {
            root: root.to_path_buf(),
            vars,
            child_env,
            profile,
            connection,
            database,
            schema,
            config_stage,
            artifact_stage,
            image_repository,
            image,
            local_image,
            secondary_images,
            flags,
            secret_names,
            snow_debug,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Trimmed, non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        non_empty(&self.vars, key)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Variables forwarded to child processes (the env-file layer).
    pub fn child_env(&self) -> &BTreeMap<String, String> {
        &self.child_env
    }

    /// Fail with every missing key listed at once.
    pub fn require(&self, keys: &[&str]) -> Result<(), DeployError> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|key| self.get(key).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(DeployError::Configuration(format!(
            "missing required keys: {}",
            missing.join(", ")
        )))
    }

    pub fn require_value(&self, key: &str) -> Result<&str, DeployError> {
        self.require(&[key])?;
        Ok(self.get(key).unwrap_or_default())
    }

    pub fn compute_pool(&self) -> Result<&str, DeployError> {
        self.require_value(KEY_COMPUTE_POOL)
    }

    pub fn service_name(&self) -> Result<&str, DeployError> {
        self.require_value(KEY_SERVICE_NAME)
    }

    pub fn qualified_service(&self) -> Result<String, DeployError> {
        Ok(self.qualify(self.service_name()?))
    }

    /// Prefix `name` with the configured database and schema unless already dotted.
    pub fn qualify(&self, name: &str) -> String {
        qualify_name(&self.database, &self.schema, name)
    }

    /// Unqualified repository name (final dotted segment).
    pub fn repository_name(&self) -> &str {
        last_segment(&self.image_repository)
    }

    pub fn resolve_path(&self, rel: &str) -> PathBuf {
        let path = Path::new(rel);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn service_spec_path(&self) -> PathBuf {
        self.resolve_path(self.get_or(KEY_SERVICE_SPEC, self.profile.default_service_spec()))
    }

    pub fn job_spec_path(&self) -> PathBuf {
        self.resolve_path(self.get_or(KEY_JOB_SPEC, self.profile.default_job_spec()))
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR_REL)
    }

    /// Repo-local connection config directory, when the project carries one.
    pub fn snow_config_dir(&self) -> Option<PathBuf> {
        let dir = self.root.join(SNOW_CONFIG_DIR_REL);
        dir.is_dir().then_some(dir)
    }
}

/// Parse `KEY=VALUE` lines. Comments and blank lines are skipped and values
/// are taken literally apart from one pair of matching surrounding quotes.
pub fn parse_env_file(text: &str) -> Result<BTreeMap<String, String>, DeployError> {
    let mut vars = BTreeMap::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line.split_once('=').ok_or_else(|| {
            DeployError::Configuration(format!("env file line {}: expected KEY=VALUE", idx + 1))
        })?;
        let key = key.trim();
        if !is_env_key(key) {
            return Err(DeployError::Configuration(format!(
                "env file line {}: invalid key `{key}`",
                idx + 1
            )));
        }
        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(vars)
}

pub fn parse_bool(key: &str, raw: &str) -> Result<bool, DeployError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DeployError::Configuration(format!(
            "{key} must be a boolean (1/0, true/false, yes/no, on/off), got `{other}`"
        ))),
    }
}

fn parse_secondary_images(raw: Option<&str>) -> Vec<SecondaryImage> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((local, target)) => SecondaryImage {
                local: local.trim().to_string(),
                target: fold_image_ref(target.trim()),
            },
            None => SecondaryImage {
                local: entry.to_string(),
                target: fold_image_ref(entry.rsplit('/').next().unwrap_or(entry)),
            },
        })
        .collect()
}

fn non_empty<'a>(vars: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    vars.get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn qualify_name(database: &str, schema: &str, name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{database}.{schema}.{name}")
    }
}

fn last_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn is_env_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
