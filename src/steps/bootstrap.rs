use super::Steps;
use crate::config::DeployConfig;
use anyhow::{Context, Result};

impl Steps<'_> {
    /// Ensure the database, schema, both stages, and the image repository exist.
    pub fn bootstrap_objects(&self) -> Result<()> {
        let config = self.config;
        let statements = [
            format!("CREATE DATABASE IF NOT EXISTS {}", config.database),
            format!(
                "CREATE SCHEMA IF NOT EXISTS {}.{}",
                config.database, config.schema
            ),
            create_stage_statement(config.config_stage.object_name()),
            create_stage_statement(config.artifact_stage.object_name()),
        ];
        for statement in &statements {
            self.snow
                .sql(statement)
                .with_context(|| format!("bootstrap: {statement}"))?;
        }

        let (database, schema) = repository_namespace(config);
        self.snow
            .run(&[
                "spcs",
                "image-repository",
                "create",
                config.repository_name(),
                "--database",
                database,
                "--schema",
                schema,
                "--if-not-exists",
            ])
            .with_context(|| format!("create image repository {}", config.image_repository))?;
        tracing::info!(
            database = %config.database,
            schema = %config.schema,
            repository = %config.image_repository,
            "bootstrap objects ensured"
        );
        println!("{}", manual_checklist(config));
        Ok(())
    }
}

fn create_stage_statement(name: &str) -> String {
    format!(
        "CREATE STAGE IF NOT EXISTS {name} ENCRYPTION = (TYPE = 'SNOWFLAKE_SSE') DIRECTORY = (ENABLE = TRUE)"
    )
}

/// Database and schema of the repository, from its qualified name when present.
fn repository_namespace(config: &DeployConfig) -> (&str, &str) {
    let parts: Vec<&str> = config.image_repository.split('.').collect();
    match parts.as_slice() {
        [database, schema, _] => (*database, *schema),
        _ => (config.database.as_str(), config.schema.as_str()),
    }
}

/// Prerequisites the pipeline cannot create on its own.
pub fn manual_checklist(config: &DeployConfig) -> String {
    let pool = config
        .get(crate::config::KEY_COMPUTE_POOL)
        .unwrap_or("<SPCS_COMPUTE_POOL>");
    let service = config
        .get(crate::config::KEY_SERVICE_NAME)
        .unwrap_or("<SPCS_SERVICE_NAME>");
    let mut lines = vec![
        "Remaining manual prerequisites:".to_string(),
        format!(
            "  [ ] secrets: run `spcs-deploy create-secrets` to create {}, {}, {}, {} in {}.{}",
            config.secret_names.db_uri,
            config.secret_names.secret_key,
            config.secret_names.fernet_key,
            config.secret_names.admin_users,
            config.database,
            config.schema
        ),
        format!(
            "  [ ] compute pool: CREATE COMPUTE POOL IF NOT EXISTS {pool} MIN_NODES = 1 MAX_NODES = 1 INSTANCE_FAMILY = CPU_X64_S (or leave SPCS_AUTO_CREATE_COMPUTE_POOL on)"
        ),
        "  [ ] network egress: create a NETWORK RULE (MODE = EGRESS) and an EXTERNAL ACCESS INTEGRATION for any external hosts the app must reach".to_string(),
        format!(
            "  [ ] grants: the deploying role needs BIND SERVICE ENDPOINT and USAGE on {pool} to expose {service}"
        ),
    ];
    if config.profile.permits_bootstrap_job() {
        lines.push(
            "  [ ] metadata database: SUPERSET_DB_URI must point at a reachable Postgres".to_string(),
        );
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::ScriptedRunner;
    use crate::steps::test_support::config_at;
    use std::path::Path;

    #[test]
    fn bootstrap_uses_ensure_exists_statements_only() {
        let config = config_at(
            Path::new("/nonexistent"),
            &[("SPCS_IMAGE_REPOSITORY", "OTHER_DB.IMAGES.SUPERSET_REPO")],
        );
        let runner = ScriptedRunner::new();
        let steps = Steps::scripted(&config, &runner);
        steps.bootstrap_objects().expect("bootstrap");

        let lines = runner.command_lines();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].ends_with("CREATE DATABASE IF NOT EXISTS SUPERSET_DB"));
        assert!(lines[1].ends_with("CREATE SCHEMA IF NOT EXISTS SUPERSET_DB.APP"));
        assert!(lines[2].contains("CREATE STAGE IF NOT EXISTS SUPERSET_DB.APP.SUPERSET_CONFIG "));
        assert!(lines[3].contains("SUPERSET_DB.APP.SUPERSET_ARTIFACTS"));
        assert_eq!(
            lines[4],
            "snow spcs image-repository create SUPERSET_REPO --database OTHER_DB --schema IMAGES --if-not-exists"
        );
        assert!(!lines.iter().any(|line| line.contains("OR REPLACE")));
    }

    #[test]
    fn checklist_names_secrets_pool_and_egress() {
        let config = config_at(Path::new("/p"), &[("SPCS_COMPUTE_POOL", "POOL_A")]);
        let checklist = manual_checklist(&config);
        assert!(checklist.contains("SUPERSET_FERNET_KEY"));
        assert!(checklist.contains("POOL_A"));
        assert!(checklist.contains("EXTERNAL ACCESS INTEGRATION"));
    }
}
