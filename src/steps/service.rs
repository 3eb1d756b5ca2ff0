use super::Steps;
use crate::config::{
    Profile, ALL_IN_ONE_SECRET_KEYS, KEY_COMPUTE_POOL, KEY_CONFIG_STAGE, KEY_CONTAINER_NAME,
    KEY_IMAGE, KEY_SERVICE_NAME,
};
use crate::render::render;
use anyhow::{Context, Result};
use std::path::Path;

impl Steps<'_> {
    /// Keys that must be set before a service spec may be applied.
    pub fn apply_requirements(&self) -> Vec<&'static str> {
        let mut keys = vec![KEY_COMPUTE_POOL, KEY_SERVICE_NAME, KEY_IMAGE, KEY_CONFIG_STAGE];
        if self.config.profile == Profile::AllInOne {
            keys.extend(ALL_IN_ONE_SECRET_KEYS);
        }
        keys
    }

    /// Create the service if missing, then upgrade it to the rendered spec.
    ///
    /// Unlike the job step there is no conflict recovery here: create runs
    /// with `--if-not-exists`, so an "already exists" failure from either
    /// call is unexpected and propagates.
    pub fn apply_service_spec(&self, template: Option<&Path>) -> Result<()> {
        self.config.require(&self.apply_requirements())?;
        let service = self.config.qualified_service()?;
        let pool = self.config.compute_pool()?;
        let template = template
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.service_spec_path());
        let rendered = render(&template, self.config)?;
        let spec_path = rendered.path_arg();

        self.snow
            .run_forwarded(&[
                "spcs",
                "service",
                "create",
                &service,
                "--compute-pool",
                pool,
                "--spec-path",
                &spec_path,
                "--if-not-exists",
            ])
            .with_context(|| format!("create service {service}"))?;
        self.snow
            .run_forwarded(&["spcs", "service", "upgrade", &service, "--spec-path", &spec_path])
            .with_context(|| format!("upgrade service {service}"))?;
        tracing::info!(service = %service, profile = %self.config.profile, "service spec applied");
        Ok(())
    }

    pub fn service_endpoints(&self) -> Result<()> {
        let service = self.config.qualified_service()?;
        self.snow
            .run_forwarded(&["spcs", "service", "list-endpoints", &service])
            .with_context(|| format!("list endpoints of {service}"))?;
        Ok(())
    }

    /// Status, instances, containers, and logs for one instance.
    pub fn debug_service(&self, instance: Option<&str>) -> Result<()> {
        let service = self.config.qualified_service()?;
        let instance = instance.unwrap_or("0");
        let container = self.config.require_value(KEY_CONTAINER_NAME)?;
        for action in ["describe", "list-instances", "list-containers"] {
            self.snow
                .run_forwarded(&["spcs", "service", action, &service])
                .with_context(|| format!("{action} {service}"))?;
        }
        self.snow
            .run_forwarded(&[
                "spcs",
                "service",
                "logs",
                &service,
                "--container-name",
                container,
                "--instance-id",
                instance,
            ])
            .with_context(|| format!("logs for {service} instance {instance}"))?;
        Ok(())
    }

    /// Graceful drop through the CLI, or an immediate forced drop.
    pub fn drop_service(&self, force: bool) -> Result<()> {
        let service = self.config.qualified_service()?;
        if force {
            self.snow
                .sql(&format!("DROP SERVICE IF EXISTS {service} FORCE"))
                .with_context(|| format!("force drop {service}"))?;
        } else {
            self.snow
                .run_forwarded(&["spcs", "service", "drop", &service])
                .with_context(|| format!("drop {service}"))?;
        }
        tracing::info!(service = %service, force, "service dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployError;
    use crate::gateway::testing::ScriptedRunner;
    use crate::gateway::CommandOutput;
    use crate::steps::test_support::{config_at, project_dir};

    const SERVICE_KEYS: [(&str, &str); 2] = [
        ("SPCS_COMPUTE_POOL", "SUPERSET_POOL"),
        ("SPCS_SERVICE_NAME", "SUPERSET_SERVICE"),
    ];

    #[test]
    fn apply_creates_then_upgrades_with_rendered_spec() {
        let dir = project_dir();
        let config = config_at(dir.path(), &SERVICE_KEYS);
        let runner = ScriptedRunner::new();
        Steps::scripted(&config, &runner)
            .apply_service_spec(None)
            .expect("apply");

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].args[..4],
            ["spcs", "service", "create", "SUPERSET_DB.APP.SUPERSET_SERVICE"]
        );
        assert!(calls[0].args.contains(&"--if-not-exists".to_string()));
        assert_eq!(calls[1].args[2], "upgrade");
        // Same rendered file for both calls, removed once the step returns.
        let spec_path = &calls[0].args[7];
        assert_eq!(&calls[1].args[5], spec_path);
        assert!(!Path::new(spec_path).exists());
    }

    #[test]
    fn all_in_one_requires_co_located_secrets() {
        let dir = project_dir();
        let mut pairs = SERVICE_KEYS.to_vec();
        pairs.push(("SPCS_PROFILE", "all-in-one"));
        pairs.push(("SUPERSET_SECRET_KEY", "s"));
        let config = config_at(dir.path(), &pairs);
        let runner = ScriptedRunner::new();
        let err = Steps::scripted(&config, &runner)
            .apply_service_spec(None)
            .expect_err("missing secrets");
        match err.downcast_ref::<DeployError>() {
            Some(DeployError::Configuration(message)) => {
                assert!(message.contains("POSTGRES_PASSWORD"));
                assert!(message.contains("SUPERSET_FERNET_KEY"));
                assert!(!message.contains("SUPERSET_SECRET_KEY"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn apply_does_not_retry_on_conflict() {
        let dir = project_dir();
        let config = config_at(dir.path(), &SERVICE_KEYS);
        let runner = ScriptedRunner::new();
        runner.queue(
            "service upgrade",
            CommandOutput::failed(1, "Service SUPERSET_SERVICE already exists"),
        );
        let err = Steps::scripted(&config, &runner)
            .apply_service_spec(None)
            .expect_err("conflict is fatal");
        assert!(err
            .downcast_ref::<DeployError>()
            .is_some_and(DeployError::is_conflict));
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(runner.count_matching("DROP SERVICE"), 0);
    }

    #[test]
    fn debug_defaults_to_first_instance() {
        let config = config_at(Path::new("/p"), &SERVICE_KEYS);
        let runner = ScriptedRunner::new();
        Steps::scripted(&config, &runner)
            .debug_service(None)
            .expect("debug");
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[3],
            "snow spcs service logs SUPERSET_DB.APP.SUPERSET_SERVICE --container-name superset --instance-id 0"
        );
    }

    #[test]
    fn forced_drop_uses_sql() {
        let config = config_at(Path::new("/p"), &SERVICE_KEYS);
        let runner = ScriptedRunner::new();
        let steps = Steps::scripted(&config, &runner);
        steps.drop_service(false).expect("drop");
        steps.drop_service(true).expect("force drop");
        assert_eq!(
            runner.command_lines(),
            vec![
                "snow spcs service drop SUPERSET_DB.APP.SUPERSET_SERVICE",
                "snow sql -q DROP SERVICE IF EXISTS SUPERSET_DB.APP.SUPERSET_SERVICE FORCE",
            ]
        );
    }
}
