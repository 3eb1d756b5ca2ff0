//! Container engine (`docker` or `podman`) invocation.
use super::{failure_error, CommandOutput, CommandRequest, CommandRunner, Io, Program};
use crate::config::{DeployConfig, KEY_CONTAINER_ENGINE};
use crate::error::DeployError;
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::path::Path;

/// Options for a detached local container.
#[derive(Debug, Clone, Default)]
pub struct RunDetached<'a> {
    pub name: &'a str,
    pub image: &'a str,
    pub port: Option<(u16, u16)>,
    pub volume: Option<(&'a Path, &'a str)>,
    pub env: BTreeMap<String, String>,
}

pub struct ContainerEngine<'a> {
    config: &'a DeployConfig,
    runner: &'a dyn CommandRunner,
    program: OnceCell<Program>,
}

impl<'a> ContainerEngine<'a> {
    pub fn new(config: &'a DeployConfig, runner: &'a dyn CommandRunner) -> Self {
        Self {
            config,
            runner,
            program: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn with_program(
        config: &'a DeployConfig,
        runner: &'a dyn CommandRunner,
        program: Program,
    ) -> Self {
        let engine = Self::new(config, runner);
        let _ = engine.program.set(program);
        engine
    }

    fn program(&self) -> Result<&Program, DeployError> {
        if let Some(program) = self.program.get() {
            return Ok(program);
        }
        let name = self.config.get_or(KEY_CONTAINER_ENGINE, "docker");
        let path = which::which(name).map_err(|_| {
            DeployError::ToolResolution(format!(
                "container engine `{name}` not found on PATH; install it or set {KEY_CONTAINER_ENGINE}"
            ))
        })?;
        Ok(self.program.get_or_init(|| Program::new(name, path)))
    }

    fn invoke(&self, args: Vec<String>, io: Io) -> Result<CommandOutput, DeployError> {
        let request = CommandRequest {
            program: self.program()?.clone(),
            args,
            envs: BTreeMap::new(),
            stdin: None,
            io,
        };
        let output = self.runner.run(&request)?;
        if !output.success {
            return Err(failure_error(&request.program.label, &output));
        }
        Ok(output)
    }

    pub fn build(
        &self,
        dockerfile: &Path,
        context: &Path,
        tag: &str,
        platform: &str,
    ) -> Result<(), DeployError> {
        let args = vec![
            "build".to_string(),
            "--platform".to_string(),
            platform.to_string(),
            "-t".to_string(),
            tag.to_string(),
            "-f".to_string(),
            dockerfile.display().to_string(),
            context.display().to_string(),
        ];
        self.invoke(args, Io::Inherit).map(drop)
    }

    pub fn tag(&self, source: &str, target: &str) -> Result<(), DeployError> {
        self.invoke(strings(&["tag", source, target]), Io::Capture)
            .map(drop)
    }

    pub fn push(&self, target: &str) -> Result<(), DeployError> {
        self.invoke(strings(&["push", target]), Io::Inherit).map(drop)
    }

    pub fn pull(&self, image: &str, platform: &str) -> Result<(), DeployError> {
        self.invoke(strings(&["pull", "--platform", platform, image]), Io::Inherit)
            .map(drop)
    }

    /// Start a detached container; returns the container id.
    pub fn run_detached(&self, options: &RunDetached<'_>) -> Result<String, DeployError> {
        let mut args = strings(&["run", "-d", "--name", options.name]);
        if let Some((host, container)) = options.port {
            args.push("-p".to_string());
            args.push(format!("{host}:{container}"));
        }
        if let Some((source, target)) = options.volume {
            args.push("-v".to_string());
            args.push(format!("{}:{target}:ro", source.display()));
        }
        // Values are passed by name only so they stay out of argv.
        for key in options.env.keys() {
            args.push("-e".to_string());
            args.push(key.clone());
        }
        args.push(options.image.to_string());
        let request = CommandRequest {
            program: self.program()?.clone(),
            args,
            envs: options.env.clone(),
            stdin: None,
            io: Io::Capture,
        };
        let output = self.runner.run(&request)?;
        if !output.success {
            return Err(failure_error(&request.program.label, &output));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Force-remove a container; a missing container is not an error.
    pub fn remove(&self, name: &str) -> Result<bool, DeployError> {
        match self.invoke(strings(&["rm", "-f", name]), Io::Capture) {
            Ok(_) => Ok(true),
            Err(DeployError::ExternalCommand { detail, .. })
                if detail.to_ascii_lowercase().contains("no such container") =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub fn exec_interactive(&self, name: &str, command: &[String]) -> Result<(), DeployError> {
        let mut args = strings(&["exec", "-it", name]);
        args.extend(command.iter().cloned());
        self.invoke(args, Io::Inherit).map(drop)
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}
