use super::Steps;
use crate::config::KEY_INSTANCE_FAMILY;
use anyhow::{Context, Result};

const DEFAULT_INSTANCE_FAMILY: &str = "CPU_X64_S";

impl Steps<'_> {
    /// Make sure the compute pool exists when auto-creation is enabled.
    pub fn ensure_compute_pool(&self) -> Result<()> {
        let pool = self.config.compute_pool()?;
        if !self.config.flags.auto_create_compute_pool {
            tracing::info!(pool, "compute pool auto-creation disabled; assuming it exists");
            return Ok(());
        }
        let family = self
            .config
            .get_or(KEY_INSTANCE_FAMILY, DEFAULT_INSTANCE_FAMILY);
        let statement = format!(
            "CREATE COMPUTE POOL IF NOT EXISTS {pool} MIN_NODES = 1 MAX_NODES = 1 \
             INSTANCE_FAMILY = {family} AUTO_RESUME = TRUE"
        );
        self.snow
            .sql(&statement)
            .with_context(|| format!("ensure compute pool {pool}"))?;
        tracing::info!(pool, family, "compute pool ensured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployError;
    use crate::gateway::testing::ScriptedRunner;
    use crate::steps::test_support::config_at;
    use std::path::Path;

    #[test]
    fn creates_pool_if_missing_with_auto_resume() {
        let config = config_at(
            Path::new("/p"),
            &[("SPCS_COMPUTE_POOL", "SUPERSET_POOL"), ("SPCS_INSTANCE_FAMILY", "CPU_X64_M")],
        );
        let runner = ScriptedRunner::new();
        Steps::scripted(&config, &runner)
            .ensure_compute_pool()
            .expect("ensure");
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("CREATE COMPUTE POOL IF NOT EXISTS SUPERSET_POOL"));
        assert!(lines[0].contains("INSTANCE_FAMILY = CPU_X64_M AUTO_RESUME = TRUE"));
    }

    #[test]
    fn disabled_auto_creation_issues_nothing() {
        let config = config_at(
            Path::new("/p"),
            &[
                ("SPCS_COMPUTE_POOL", "SUPERSET_POOL"),
                ("SPCS_AUTO_CREATE_COMPUTE_POOL", "false"),
            ],
        );
        let runner = ScriptedRunner::new();
        Steps::scripted(&config, &runner)
            .ensure_compute_pool()
            .expect("ensure");
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn missing_pool_name_is_a_configuration_error() {
        let config = config_at(Path::new("/p"), &[]);
        let runner = ScriptedRunner::new();
        let err = Steps::scripted(&config, &runner)
            .ensure_compute_pool()
            .expect_err("pool required");
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::Configuration(_))
        ));
    }
}
