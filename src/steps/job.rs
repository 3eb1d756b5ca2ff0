use super::Steps;
use crate::render::{render, RenderedSpec};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::Path;

/// Replace characters that are not valid in an unquoted identifier.
pub fn normalize_job_name(raw: &str) -> String {
    let mut name: String = raw
        .trim()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect();
    if name.is_empty() || name.starts_with(|ch: char| ch.is_ascii_digit()) {
        name.insert_str(0, "JOB_");
    }
    name.to_ascii_uppercase()
}

/// Issues timestamp-suffixed names that stay distinct within one process.
///
/// Every stamp handed out is remembered with its last sequence number, so
/// interleaved bases in the same second never repeat.
#[derive(Debug, Default)]
pub struct JobNamer {
    issued: RefCell<BTreeMap<String, u32>>,
}

impl JobNamer {
    pub fn unique(&self, base: &str, now: DateTime<Utc>) -> String {
        let stamp = format!("{base}_{}", now.format("%Y%m%d%H%M%S"));
        let mut issued = self.issued.borrow_mut();
        let seq = *issued
            .entry(stamp.clone())
            .and_modify(|seq| *seq += 1)
            .or_insert(0);
        if seq == 0 {
            stamp
        } else {
            format!("{stamp}_{seq}")
        }
    }
}

/// A one-shot job ready to execute.
pub struct JobInvocation {
    pub name: String,
    pub qualified: String,
    pub compute_pool: String,
    pub spec: RenderedSpec,
}

impl JobInvocation {
    fn args(&self) -> Vec<String> {
        vec![
            "spcs".to_string(),
            "service".to_string(),
            "execute-job".to_string(),
            self.qualified.clone(),
            "--compute-pool".to_string(),
            self.compute_pool.clone(),
            "--spec-path".to_string(),
            self.spec.path_arg(),
        ]
    }
}

impl Steps<'_> {
    /// Render `template` and resolve the job name.
    ///
    /// Without an explicit name the template's file stem is used.
    pub fn prepare_job(&self, template: &Path, name: Option<&str>) -> Result<JobInvocation> {
        let compute_pool = self.config.compute_pool()?.to_string();
        let base = normalize_job_name(name.unwrap_or_else(|| {
            template
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
        }));
        let name = if self.config.flags.unique_job_names {
            self.job_namer.unique(&base, Utc::now())
        } else {
            base
        };
        Ok(JobInvocation {
            qualified: self.config.qualify(&name),
            name,
            compute_pool,
            spec: render(template, self.config)?,
        })
    }

    /// Execute a one-shot job.
    ///
    /// If the name collides with a leftover job service, that service is
    /// dropped and the job is retried exactly once.
    pub fn run_job_spec(&self, template: &Path, name: Option<&str>) -> Result<String> {
        let job = self.prepare_job(template, name)?;
        let args = job.args();
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();
        tracing::info!(job = %job.qualified, pool = %job.compute_pool, "executing job");

        match self.snow.run_forwarded(&argv) {
            Ok(_) => {}
            Err(err) if err.is_conflict() => {
                tracing::warn!(job = %job.qualified, "job name in use; dropping stale job service and retrying once");
                self.snow
                    .sql(&format!("DROP SERVICE IF EXISTS {}", job.qualified))
                    .with_context(|| format!("drop stale job {}", job.qualified))?;
                self.snow
                    .run_forwarded(&argv)
                    .with_context(|| format!("retry job {}", job.qualified))?;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("execute job {}", job.qualified));
            }
        }
        tracing::info!(job = %job.qualified, "job finished");
        Ok(job.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeployError;
    use crate::gateway::testing::ScriptedRunner;
    use crate::gateway::CommandOutput;
    use crate::steps::test_support::{config_at, project_dir};
    use chrono::TimeZone;

    fn job_template(dir: &Path) -> std::path::PathBuf {
        dir.join("spcs/job-bootstrap-managed.yaml")
    }

    #[test]
    fn names_are_normalized_to_identifiers() {
        assert_eq!(normalize_job_name("job-bootstrap-managed"), "JOB_BOOTSTRAP_MANAGED");
        assert_eq!(normalize_job_name("db upgrade.v2"), "DB_UPGRADE_V2");
        assert_eq!(normalize_job_name("2024_migrate"), "JOB_2024_MIGRATE");
        assert_eq!(normalize_job_name("  "), "JOB_");
    }

    #[test]
    fn unique_names_differ_within_the_same_second() {
        let namer = JobNamer::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).single().expect("time");
        let first = namer.unique("BOOTSTRAP", now);
        let second = namer.unique("BOOTSTRAP", now);
        let later = namer.unique("BOOTSTRAP", now + chrono::Duration::seconds(1));
        assert_eq!(first, "BOOTSTRAP_20260301123005");
        assert_eq!(second, "BOOTSTRAP_20260301123005_1");
        assert_eq!(later, "BOOTSTRAP_20260301123006");
    }

    #[test]
    fn interleaved_bases_in_one_second_stay_distinct() {
        let namer = JobNamer::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).single().expect("time");
        let a1 = namer.unique("A", now);
        let b1 = namer.unique("B", now);
        let a2 = namer.unique("A", now);
        assert_eq!(a1, "A_20260301123005");
        assert_eq!(b1, "B_20260301123005");
        assert_eq!(a2, "A_20260301123005_1");
    }

    #[test]
    fn name_defaults_to_template_stem() {
        let dir = project_dir();
        let config = config_at(dir.path(), &[("SPCS_COMPUTE_POOL", "POOL")]);
        let runner = ScriptedRunner::new();
        let name = Steps::scripted(&config, &runner)
            .run_job_spec(&job_template(dir.path()), None)
            .expect("job");
        assert_eq!(name, "JOB_BOOTSTRAP_MANAGED");
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(
            "snow spcs service execute-job SUPERSET_DB.APP.JOB_BOOTSTRAP_MANAGED --compute-pool POOL --spec-path "
        ));
    }

    #[test]
    fn conflict_drops_and_retries_exactly_once() {
        let dir = project_dir();
        let config = config_at(dir.path(), &[("SPCS_COMPUTE_POOL", "POOL")]);
        let runner = ScriptedRunner::new();
        runner.queue("execute-job", CommandOutput::failed(1, "Object 'MIGRATE' already exists."));
        runner.queue("execute-job", CommandOutput::failed(1, "Object 'MIGRATE' already exists."));

        let err = Steps::scripted(&config, &runner)
            .run_job_spec(&job_template(dir.path()), Some("migrate"))
            .expect_err("second conflict is fatal");
        assert!(err
            .downcast_ref::<DeployError>()
            .is_some_and(DeployError::is_conflict));
        assert_eq!(runner.count_matching("execute-job"), 2);
        assert_eq!(
            runner.count_matching("DROP SERVICE IF EXISTS SUPERSET_DB.APP.MIGRATE"),
            1
        );
    }

    #[test]
    fn conflict_then_success_completes() {
        let dir = project_dir();
        let config = config_at(dir.path(), &[("SPCS_COMPUTE_POOL", "POOL")]);
        let runner = ScriptedRunner::new();
        runner.queue("execute-job", CommandOutput::failed(1, "already exists"));
        Steps::scripted(&config, &runner)
            .run_job_spec(&job_template(dir.path()), Some("migrate"))
            .expect("retry succeeds");
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("DROP SERVICE IF EXISTS"));
    }

    #[test]
    fn other_failures_are_not_retried() {
        let dir = project_dir();
        let config = config_at(dir.path(), &[("SPCS_COMPUTE_POOL", "POOL")]);
        let runner = ScriptedRunner::new();
        runner.queue("execute-job", CommandOutput::failed(1, "compute pool POOL is suspended"));
        assert!(Steps::scripted(&config, &runner)
            .run_job_spec(&job_template(dir.path()), Some("migrate"))
            .is_err());
        assert_eq!(runner.calls().len(), 1);
    }
}
