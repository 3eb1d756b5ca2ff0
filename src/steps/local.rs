use super::Steps;
use crate::config::{KEY_LOCAL_CONTAINER, KEY_LOCAL_PORT};
use crate::error::DeployError;
use crate::gateway::engine::RunDetached;
use crate::secrets::{self, ResolvedSecret, SecretSource};
use anyhow::{Context, Result};
use std::collections::BTreeMap;

const DEFAULT_LOCAL_CONTAINER: &str = "superset-local";
const DEFAULT_LOCAL_PORT: u16 = 8088;
const APP_PORT: u16 = 8088;
const CONFIG_MOUNT: &str = "/app/pythonpath";
const LOCAL_SQLITE_URI: &str = "sqlite:////app/superset_home/superset.db";

impl Steps<'_> {
    fn local_container(&self) -> &str {
        self.config.get_or(KEY_LOCAL_CONTAINER, DEFAULT_LOCAL_CONTAINER)
    }

    fn local_port(&self) -> Result<u16, DeployError> {
        match self.config.get(KEY_LOCAL_PORT) {
            None => Ok(DEFAULT_LOCAL_PORT),
            Some(raw) => raw.parse().map_err(|_| {
                DeployError::Configuration(format!(
                    "{KEY_LOCAL_PORT} must be a port number, got `{raw}`"
                ))
            }),
        }
    }

    /// Environment for the local container, keyed by the app's variable names.
    pub fn local_env(&self) -> Result<BTreeMap<String, String>> {
        let db_uri = match secrets::resolve_db_uri(self.config) {
            Ok(secret) => secret,
            Err(DeployError::MissingSecret { .. }) => {
                tracing::info!("no database URI configured; local run uses SQLite");
                ResolvedSecret {
                    name: self.config.secret_names.db_uri.clone(),
                    value: LOCAL_SQLITE_URI.to_string(),
                    source: SecretSource::LiteralFallback,
                }
            }
            Err(err) => return Err(err.into()),
        };
        let bundle = secrets::bundle_with_db_uri(self.config, db_uri, || None);

        let admin = bundle
            .admin_users
            .value
            .split(',')
            .map(str::trim)
            .find(|user| !user.is_empty())
            .unwrap_or("admin")
            .to_string();
        let mut env: BTreeMap<String, String> = [
            ("SUPERSET_DB_URI", bundle.db_uri.value),
            ("SUPERSET_SECRET_KEY", bundle.secret_key.value),
            ("SUPERSET_FERNET_KEY", bundle.fernet_key.value),
            ("SUPERSET_ADMIN_USERS", bundle.admin_users.value),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();
        // No ingress proxy locally; the app trusts this user instead.
        env.insert("SF_FAKE_REMOTE_USER".to_string(), admin);
        Ok(env)
    }

    /// Replace any previous local container and start a fresh one.
    pub fn run_local(&self) -> Result<String> {
        let name = self.local_container();
        let port = self.local_port()?;
        let env = self.local_env()?;
        if self.engine.remove(name)? {
            tracing::info!(container = name, "removed previous local container");
        }
        let config_dir = self.config.config_dir();
        let id = self
            .engine
            .run_detached(&RunDetached {
                name,
                image: &self.config.local_image,
                port: Some((port, APP_PORT)),
                volume: config_dir
                    .is_dir()
                    .then_some((config_dir.as_path(), CONFIG_MOUNT)),
                env,
            })
            .with_context(|| format!("start local container {name}"))?;
        tracing::info!(container = name, id = %id, port, "local container started");
        println!("Superset is starting at http://localhost:{port}");
        Ok(id)
    }

    pub fn stop_local(&self) -> Result<bool> {
        let name = self.local_container();
        let removed = self.engine.remove(name)?;
        if removed {
            tracing::info!(container = name, "local container removed");
        } else {
            tracing::info!(container = name, "no local container to remove");
        }
        Ok(removed)
    }

    /// Run an interactive command in the local container.
    ///
    /// A single argument is split with shell quoting rules.
    pub fn exec_local(&self, command: &[String]) -> Result<()> {
        let argv = match command {
            [single] => shell_words::split(single)
                .with_context(|| format!("parse command `{single}`"))?,
            _ => command.to_vec(),
        };
        if argv.is_empty() {
            return Err(DeployError::Configuration("exec needs a command to run".into()).into());
        }
        self.engine
            .exec_interactive(self.local_container(), &argv)
            .context("exec in local container")
    }
}
