//! End-to-end deployment: a linear sequence of steps with flag-gated branches.
//!
//! The plan is computed up front from the configuration so skip decisions are
//! logged and testable independently of execution. Execution is fail-fast and
//! never rolls back steps that already ran.
use crate::config::{DeployConfig, Profile};
use crate::steps::Steps;
use anyhow::{Context, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    BootstrapObjects,
    EnsureComputeTarget,
    BuildImage,
    PushImages,
    TagAndPushSingleTarget,
    SyncConfigStage,
    RunBootstrapJob,
    ApplyServiceSpec,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::BootstrapObjects => "bootstrap-objects",
            Step::EnsureComputeTarget => "ensure-compute-target",
            Step::BuildImage => "build-image",
            Step::PushImages => "push-images",
            Step::TagAndPushSingleTarget => "tag-and-push",
            Step::SyncConfigStage => "sync-config-stage",
            Step::RunBootstrapJob => "run-bootstrap-job",
            Step::ApplyServiceSpec => "apply-service-spec",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Run,
    Skip(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    pub step: Step,
    pub decision: Decision,
}

impl PlannedStep {
    fn run(step: Step) -> Self {
        Self {
            step,
            decision: Decision::Run,
        }
    }

    fn skip(step: Step, reason: impl Into<String>) -> Self {
        Self {
            step,
            decision: Decision::Skip(reason.into()),
        }
    }

    fn gated(step: Step, enabled: bool, flag: &str) -> Self {
        if enabled {
            Self::run(step)
        } else {
            Self::skip(step, format!("{flag} is off"))
        }
    }
}

/// Ordered plan for one deployment run.
pub fn plan(config: &DeployConfig) -> Vec<PlannedStep> {
    use crate::config::{
        FLAG_AUTO_BOOTSTRAP, FLAG_AUTO_CREATE_COMPUTE_POOL, FLAG_PUSH, FLAG_RUN_BOOTSTRAP_JOB,
    };
    let flags = &config.flags;

    let push = if flags.push_all_images {
        PlannedStep::run(Step::PushImages)
    } else if flags.push {
        PlannedStep::run(Step::TagAndPushSingleTarget)
    } else {
        PlannedStep::skip(Step::PushImages, format!("{FLAG_PUSH} is off"))
    };

    let job = match config.profile {
        Profile::AllInOne => PlannedStep::skip(
            Step::RunBootstrapJob,
            "all-in-one profile: a one-shot job cannot host the co-located database and cache, \
             the service container migrates at startup instead",
        ),
        Profile::Managed => PlannedStep::gated(
            Step::RunBootstrapJob,
            flags.run_bootstrap_job,
            FLAG_RUN_BOOTSTRAP_JOB,
        ),
    };

    vec![
        PlannedStep::gated(Step::BootstrapObjects, flags.auto_bootstrap, FLAG_AUTO_BOOTSTRAP),
        PlannedStep::gated(
            Step::EnsureComputeTarget,
            flags.auto_create_compute_pool,
            FLAG_AUTO_CREATE_COMPUTE_POOL,
        ),
        PlannedStep::run(Step::BuildImage),
        push,
        PlannedStep::run(Step::SyncConfigStage),
        job,
        PlannedStep::run(Step::ApplyServiceSpec),
    ]
}

/// Execute the plan in order, stopping at the first failure.
pub fn run(steps: &Steps<'_>, plan: &[PlannedStep]) -> Result<()> {
    // Missing keys surface before anything is built or pushed.
    steps.config.require(&steps.apply_requirements())?;

    for planned in plan {
        if let Decision::Skip(reason) = &planned.decision {
            tracing::info!(step = %planned.step, reason = %reason, "skipping step");
            continue;
        }
        tracing::info!(step = %planned.step, "step started");
        execute(steps, planned.step).with_context(|| format!("step {} failed", planned.step))?;
        tracing::info!(step = %planned.step, "step finished");
    }
    tracing::info!("deployment complete");
    Ok(())
}

fn execute(steps: &Steps<'_>, step: Step) -> Result<()> {
    match step {
        Step::BootstrapObjects => steps.bootstrap_objects(),
        Step::EnsureComputeTarget => steps.ensure_compute_pool(),
        Step::BuildImage => steps.build_image(),
        Step::PushImages => steps.push_images(true).map(drop),
        Step::TagAndPushSingleTarget => steps.tag_and_push_primary().map(drop),
        Step::SyncConfigStage => steps.sync_config_stage().map(drop),
        Step::RunBootstrapJob => steps
            .run_job_spec(&steps.config.job_spec_path(), None)
            .map(drop),
        Step::ApplyServiceSpec => steps.apply_service_spec(None),
    }
}
