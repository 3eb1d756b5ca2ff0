//! Provisioning steps.
//!
//! Each step is an idempotent operation against the control plane that can
//! be invoked on its own or composed by the pipeline. All durable state
//! lives in the remote account.
mod bootstrap;
mod compute;
mod config_stage;
mod images;
mod job;
mod local;
mod service;

use crate::config::DeployConfig;
use crate::gateway::{CommandRunner, ContainerEngine, ControlPlane};
use job::JobNamer;

/// Shared handles every step runs against.
pub struct Steps<'a> {
    pub config: &'a DeployConfig,
    pub snow: ControlPlane<'a>,
    pub engine: ContainerEngine<'a>,
    job_namer: JobNamer,
}

impl<'a> Steps<'a> {
    pub fn new(config: &'a DeployConfig, runner: &'a dyn CommandRunner, debug: bool) -> Self {
        Self {
            config,
            snow: ControlPlane::new(config, runner, debug),
            engine: ContainerEngine::new(config, runner),
            job_namer: JobNamer::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn scripted(config: &'a DeployConfig, runner: &'a dyn CommandRunner) -> Self {
        use crate::gateway::Program;
        Self {
            config,
            snow: ControlPlane::with_program(
                config,
                runner,
                Program::new("snow", "/bin/snow"),
                false,
            ),
            engine: ContainerEngine::with_program(
                config,
                runner,
                Program::new("docker", "/bin/docker"),
            ),
            job_namer: JobNamer::default(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::config::DeployConfig;
    use std::collections::BTreeMap;
    use std::path::Path;

    pub(crate) fn config_at(root: &Path, pairs: &[(&str, &str)]) -> DeployConfig {
        let file: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DeployConfig::from_layers(root, Vec::new(), file).expect("config")
    }

    /// Project directory with the service and job templates in place.
    pub(crate) fn project_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        let spcs = dir.path().join("spcs");
        std::fs::create_dir_all(&spcs).expect("create spcs dir");
        for name in [
            "service-managed.yaml",
            "service-all-in-one.yaml",
            "job-bootstrap-managed.yaml",
            "job-bootstrap-all-in-one.yaml",
        ] {
            std::fs::write(spcs.join(name), "image: ${SPCS_IMAGE}\n").expect("write template");
        }
        dir
    }
}
