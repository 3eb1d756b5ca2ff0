//! Control-plane (`snow` CLI) invocation.
//!
//! The binary is resolved through an ordered chain of strategies and
//! memoized for the process lifetime. Every invocation gets the configured
//! connection appended and, in debug mode, `--debug` placed after the leaf
//! subcommand.
use super::{failure_error, CommandOutput, CommandRequest, CommandRunner, Io, Program};
use crate::config::DeployConfig;
use crate::error::DeployError;
use serde_json::Value;
use std::cell::OnceCell;
use std::path::Path;

/// Official package providing the `snow` entry point.
pub const SNOW_PACKAGE: &str = "snowflake-cli";

const DEBUG_FLAG: &str = "--debug";

struct Strategy {
    label: &'static str,
    resolve: fn(&Path) -> Option<Program>,
}

/// Preference order: vendored virtualenv, PATH, uvx, pipx.
const STRATEGIES: [Strategy; 4] = [
    Strategy {
        label: "project virtualenv",
        resolve: resolve_vendored,
    },
    Strategy {
        label: "PATH",
        resolve: resolve_on_path,
    },
    Strategy {
        label: "uvx",
        resolve: resolve_uvx,
    },
    Strategy {
        label: "pipx run",
        resolve: resolve_pipx,
    },
];

fn resolve_vendored(root: &Path) -> Option<Program> {
    [".venv/bin/snow", "venv/bin/snow", ".venv/Scripts/snow.exe"]
        .iter()
        .map(|rel| root.join(rel))
        .find(|path| path.is_file())
        .map(|path| Program::new("snow", path))
}

fn resolve_on_path(_root: &Path) -> Option<Program> {
    which::which("snow")
        .ok()
        .map(|path| Program::new("snow", path))
}

fn resolve_uvx(_root: &Path) -> Option<Program> {
    which::which("uvx")
        .ok()
        .map(|path| Program::new("snow (uvx)", path).with_prefix(&["--from", SNOW_PACKAGE, "snow"]))
}

fn resolve_pipx(_root: &Path) -> Option<Program> {
    which::which("pipx").ok().map(|path| {
        Program::new("snow (pipx)", path).with_prefix(&["run", "--spec", SNOW_PACKAGE, "snow"])
    })
}

/// Walk the strategy chain and return the first usable program.
pub fn resolve_snow(root: &Path) -> Result<Program, DeployError> {
    for strategy in &STRATEGIES {
        if let Some(program) = (strategy.resolve)(root) {
            tracing::debug!(
                strategy = strategy.label,
                path = %program.path.display(),
                "resolved control-plane CLI"
            );
            return Ok(program);
        }
    }
    Err(DeployError::ToolResolution(format!(
        "snow CLI not found (checked .venv/bin/snow, PATH, uvx, pipx); \
         install it with `pip install {SNOW_PACKAGE}` or `uv tool install {SNOW_PACKAGE}`"
    )))
}

/// Number of leading tokens that name the leaf subcommand.
fn leaf_depth(args: &[String]) -> usize {
    let is_word = |idx: usize| args.get(idx).is_some_and(|arg| !arg.starts_with('-'));
    match args.first().map(String::as_str) {
        Some("sql") => 1,
        Some("stage" | "object" | "connection") if is_word(1) => 2,
        Some("spcs") if is_word(1) && is_word(2) => 3,
        _ => 1,
    }
}

/// Insert `--debug` right after the leaf subcommand tokens.
pub fn inject_debug_flag(args: &mut Vec<String>) {
    if args.is_empty() || args.iter().any(|arg| arg == DEBUG_FLAG) {
        return;
    }
    let pos = leaf_depth(args).min(args.len());
    args.insert(pos, DEBUG_FLAG.to_string());
}

/// Escape a value as a single-quoted SQL string literal.
///
/// Backslashes are escape characters inside Snowflake literals, so both
/// they and embedded quotes are doubled up.
pub fn quote_sql_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("''"),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');
    quoted
}

pub struct ControlPlane<'a> {
    config: &'a DeployConfig,
    runner: &'a dyn CommandRunner,
    program: OnceCell<Program>,
    debug: bool,
}

impl<'a> ControlPlane<'a> {
    pub fn new(config: &'a DeployConfig, runner: &'a dyn CommandRunner, debug: bool) -> Self {
        Self {
            config,
            runner,
            program: OnceCell::new(),
            debug: debug || config.snow_debug,
        }
    }

    /// Skip resolution and use `program` directly.
    #[cfg(test)]
    pub fn with_program(
        config: &'a DeployConfig,
        runner: &'a dyn CommandRunner,
        program: Program,
        debug: bool,
    ) -> Self {
        let plane = Self::new(config, runner, debug);
        let _ = plane.program.set(program);
        plane
    }

    fn program(&self) -> Result<&Program, DeployError> {
        if let Some(program) = self.program.get() {
            return Ok(program);
        }
        let program = resolve_snow(self.config.root())?;
        Ok(self.program.get_or_init(|| program))
    }

    /// Final argv for a subcommand: debug flag and connection applied.
    pub fn build_args(&self, args: &[&str]) -> Vec<String> {
        let mut argv: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
        if self.debug {
            inject_debug_flag(&mut argv);
        }
        if let Some(connection) = &self.config.connection {
            argv.push("--connection".to_string());
            argv.push(connection.clone());
        }
        argv
    }

    fn invoke(
        &self,
        args: &[&str],
        io: Io,
        stdin: Option<String>,
    ) -> Result<CommandOutput, DeployError> {
        let program = self.program()?.clone();
        let mut envs = self.config.child_env().clone();
        if let Some(dir) = self.config.snow_config_dir() {
            secure_config_dir(&dir);
            envs.insert("SNOWFLAKE_HOME".to_string(), dir.display().to_string());
        }
        let request = CommandRequest {
            args: self.build_args(args),
            program,
            envs,
            stdin,
            io,
        };
        let output = self.runner.run(&request)?;
        if !output.success {
            return Err(failure_error(&request.program.label, &output));
        }
        Ok(output)
    }

    /// Run a subcommand, capturing its output.
    pub fn run(&self, args: &[&str]) -> Result<CommandOutput, DeployError> {
        self.invoke(args, Io::Capture, None)
    }

    /// Run a subcommand and echo its output to the operator.
    pub fn run_forwarded(&self, args: &[&str]) -> Result<CommandOutput, DeployError> {
        self.invoke(args, Io::Forward, None)
    }

    /// Execute one administrative SQL statement.
    pub fn sql(&self, statement: &str) -> Result<CommandOutput, DeployError> {
        self.invoke(&["sql", "-q", statement], Io::Capture, None)
    }

    /// Execute a statement fed on stdin so its text never appears in argv or logs.
    pub fn sql_confidential(&self, statement: String) -> Result<CommandOutput, DeployError> {
        self.invoke(&["sql", "--stdin"], Io::Capture, Some(statement))
    }

    /// Execute a statement and parse the JSON result rows.
    pub fn sql_json(&self, statement: &str) -> Result<Value, DeployError> {
        let output = self.invoke(
            &["sql", "-q", statement, "--format", "json"],
            Io::Capture,
            None,
        )?;
        serde_json::from_str(output.stdout.trim()).map_err(|err| DeployError::ExternalCommand {
            program: "snow".to_string(),
            status: "exit 0".to_string(),
            detail: format!("unparseable JSON output: {err}"),
        })
    }
}

/// Restrict the repo-local connection config to the current user.
///
/// Best-effort: the CLI raises its own clear error if permissions are still
/// too open.
fn secure_config_dir(dir: &Path) {
    #[cfg(unix)]
    {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let targets = [
            (dir.to_path_buf(), 0o700),
            (dir.join("config.toml"), 0o600),
            (dir.join("connections.toml"), 0o600),
        ];
        for (path, mode) in targets {
            if !path.exists() {
                continue;
            }
            if let Err(err) = fs::set_permissions(&path, fs::Permissions::from_mode(mode)) {
                tracing::debug!(path = %path.display(), error = %err, "could not tighten permissions");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
