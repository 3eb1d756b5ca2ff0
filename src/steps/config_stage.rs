use super::Steps;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Regular files directly inside `dir`, sorted by name.
pub fn collect_config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl Steps<'_> {
    /// Upload the local config directory to the config stage, overwriting.
    pub fn sync_config_stage(&self) -> Result<usize> {
        let stage = &self.config.config_stage;
        // `stage create` has no if-not-exists form; an existing stage is fine.
        if let Err(err) = self.snow.run(&["stage", "create", stage.object_name()]) {
            tracing::debug!(stage = stage.object_name(), error = %err, "stage create skipped");
        }

        let dir = self.config.config_dir();
        let files = collect_config_files(&dir)?;
        if files.is_empty() {
            tracing::warn!(dir = %dir.display(), "no config files to upload");
            return Ok(0);
        }
        for file in &files {
            let local = file.display().to_string();
            self.snow
                .run(&[
                    "stage",
                    "copy",
                    local.as_str(),
                    stage.at_ref(),
                    "--overwrite",
                    "--no-auto-compress",
                ])
                .with_context(|| format!("upload {local} to {}", stage.at_ref()))?;
        }
        tracing::info!(stage = stage.at_ref(), files = files.len(), "config stage synced");
        Ok(files.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::ScriptedRunner;
    use crate::gateway::CommandOutput;
    use crate::steps::test_support::config_at;

    #[test]
    fn uploads_every_file_even_when_stage_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("superset/config");
        fs::create_dir_all(config_dir.join("nested")).expect("mkdir");
        fs::write(config_dir.join("superset_config.py"), "X = 1\n").expect("write");
        fs::write(config_dir.join("auth.py"), "Y = 2\n").expect("write");

        let config = config_at(dir.path(), &[]);
        let runner = ScriptedRunner::new();
        runner.queue(
            "stage create",
            CommandOutput::failed(1, "Object 'SUPERSET_CONFIG' already exists."),
        );
        let uploaded = Steps::scripted(&config, &runner)
            .sync_config_stage()
            .expect("sync");

        assert_eq!(uploaded, 2);
        let lines = runner.command_lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("auth.py @SUPERSET_DB.APP.SUPERSET_CONFIG --overwrite --no-auto-compress"));
        assert!(lines[2].contains("superset_config.py"));
    }

    #[test]
    fn missing_config_dir_uploads_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_at(dir.path(), &[]);
        let runner = ScriptedRunner::new();
        let uploaded = Steps::scripted(&config, &runner)
            .sync_config_stage()
            .expect("sync");
        assert_eq!(uploaded, 0);
        assert_eq!(runner.count_matching("stage copy"), 0);
    }

    #[test]
    fn failed_upload_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join("superset/config");
        fs::create_dir_all(&config_dir).expect("mkdir");
        fs::write(config_dir.join("superset_config.py"), "X = 1\n").expect("write");

        let config = config_at(dir.path(), &[]);
        let runner = ScriptedRunner::new();
        runner.queue("stage copy", CommandOutput::failed(1, "insufficient privileges"));
        assert!(Steps::scripted(&config, &runner).sync_config_stage().is_err());
    }
}
