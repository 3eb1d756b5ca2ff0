//! CLI argument parsing.
//!
//! Every subcommand maps onto one step (or the whole pipeline for `deploy`);
//! configuration comes from the env file and process environment, not flags.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "spcs-deploy",
    version,
    about = "Deploy Superset to Snowpark Container Services",
    after_help = "Examples:\n  spcs-deploy bootstrap-snowflake\n  spcs-deploy create-secrets --env-file .env.prod\n  spcs-deploy deploy --connection prod\n  spcs-deploy run-job spcs/job-bootstrap-managed.yaml\n  spcs-deploy debug-service 1",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Env file layered over the process environment (default: .env in the project dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Project directory holding spcs/, superset/config/, and the Dockerfile
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    pub project_dir: PathBuf,

    /// Named snow connection (overrides SNOWFLAKE_CONNECTION)
    #[arg(long, global = true, value_name = "NAME")]
    pub connection: Option<String>,

    /// Debug logging, and --debug on every snow invocation
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the application image locally
    BuildImage,
    /// Run the local image detached with config mounted and secrets as env
    RunLocal,
    /// Remove the local container
    StopLocal,
    /// Run an interactive command inside the local container
    Exec(ExecArgs),
    /// Print a spec template with configuration substituted
    RenderSpec(RenderSpecArgs),
    /// Ensure database, schema, stages, and image repository exist
    BootstrapSnowflake,
    /// Create or replace the application secrets
    CreateSecrets,
    /// List the service's public endpoints
    Endpoints,
    /// Describe the service and fetch logs for one instance
    DebugService(DebugServiceArgs),
    /// Drop the service
    DropService(DropServiceArgs),
    /// Push the primary image (and secondary images) to the account registry
    PushImages(PushImagesArgs),
    /// Upload superset/config/ to the config stage
    SyncConfigStage,
    /// Create the service if missing, then upgrade it to the rendered spec
    ApplyService(ApplyServiceArgs),
    /// Execute a one-shot job from a spec template
    RunJob(RunJobArgs),
    /// Run the full pipeline
    Deploy,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Command to run; a single argument is split with shell quoting rules
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RenderSpecArgs {
    /// Template file
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct DebugServiceArgs {
    /// Instance id to fetch logs for
    #[arg(default_value = "0")]
    pub instance: String,
}

#[derive(Args, Debug)]
pub struct DropServiceArgs {
    /// Drop immediately with FORCE, releasing attached volumes
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct PushImagesArgs {
    /// Skip SPCS_SECONDARY_IMAGES
    #[arg(long)]
    pub primary_only: bool,
}

#[derive(Args, Debug)]
pub struct ApplyServiceArgs {
    /// Service spec template (default: per SPCS_PROFILE or SPCS_SERVICE_SPEC)
    #[arg(long, value_name = "PATH")]
    pub spec: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunJobArgs {
    /// Job spec template
    pub spec: PathBuf,
    /// Job name (default: template file stem)
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        RootArgs::command().debug_assert();
    }

    #[test]
    fn global_options_work_after_the_subcommand() {
        let args = RootArgs::try_parse_from([
            "spcs-deploy",
            "drop-service",
            "--force",
            "--connection",
            "prod",
            "-v",
        ])
        .expect("parse");
        assert_eq!(args.global.connection.as_deref(), Some("prod"));
        assert!(args.global.verbose);
        assert!(matches!(
            args.command,
            Command::DropService(DropServiceArgs { force: true })
        ));
    }

    #[test]
    fn exec_keeps_hyphenated_arguments() {
        let args = RootArgs::try_parse_from(["spcs-deploy", "exec", "superset", "db", "--help"])
            .expect("parse");
        match args.command {
            Command::Exec(exec) => assert_eq!(exec.command, ["superset", "db", "--help"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn run_job_name_is_optional() {
        let args = RootArgs::try_parse_from(["spcs-deploy", "run-job", "spcs/job.yaml"])
            .expect("parse");
        match args.command {
            Command::RunJob(job) => {
                assert_eq!(job.spec, PathBuf::from("spcs/job.yaml"));
                assert!(job.name.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_subcommand_is_a_usage_error() {
        let err = RootArgs::try_parse_from(["spcs-deploy", "launch"]).expect_err("unknown");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
        assert_eq!(err.exit_code(), 2);
    }
}
