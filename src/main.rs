use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod error;
mod gateway;
mod pipeline;
mod render;
mod secrets;
mod steps;

use cli::{Command, RootArgs};
use config::DeployConfig;
use gateway::ProcessRunner;
use steps::Steps;

fn main() -> ExitCode {
    let args = RootArgs::parse();
    init_tracing(args.global.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let message = format!("{err:#}").replace(['\n', '\r'], " ");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays usable for rendered specs and CLI output.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: RootArgs) -> Result<()> {
    let global = args.global;
    let root = global
        .project_dir
        .canonicalize()
        .with_context(|| format!("project directory {}", global.project_dir.display()))?;
    let config = DeployConfig::load(&root, global.env_file.as_deref(), global.connection)?;
    tracing::debug!(
        root = %root.display(),
        profile = %config.profile,
        database = %config.database,
        schema = %config.schema,
        "configuration loaded"
    );

    let runner = ProcessRunner;
    let steps = Steps::new(&config, &runner, global.verbose);

    match args.command {
        Command::BuildImage => steps.build_image(),
        Command::RunLocal => steps.run_local().map(drop),
        Command::StopLocal => steps.stop_local().map(drop),
        Command::Exec(exec) => steps.exec_local(&exec.command),
        Command::RenderSpec(spec) => {
            let rendered = render::render(&spec.file, &config)?;
            let text = fs::read_to_string(rendered.path()).context("read rendered spec")?;
            print!("{text}");
            Ok(())
        }
        Command::BootstrapSnowflake => steps.bootstrap_objects(),
        Command::CreateSecrets => secrets::create_or_update_secrets(&config, &steps.snow),
        Command::Endpoints => steps.service_endpoints(),
        Command::DebugService(debug) => steps.debug_service(Some(debug.instance.as_str())),
        Command::DropService(drop_args) => steps.drop_service(drop_args.force),
        Command::PushImages(push) => {
            let pushed = steps.push_images(!push.primary_only)?;
            for target in pushed {
                println!("{target}");
            }
            Ok(())
        }
        Command::SyncConfigStage => steps.sync_config_stage().map(drop),
        Command::ApplyService(apply) => steps.apply_service_spec(apply.spec.as_deref()),
        Command::RunJob(job) => {
            let name = steps.run_job_spec(&job.spec, job.name.as_deref())?;
            println!("{name}");
            Ok(())
        }
        Command::Deploy => {
            let plan = pipeline::plan(&config);
            pipeline::run(&steps, &plan)
        }
    }
}
