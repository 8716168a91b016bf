//! Tool invocation types.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Binary used when no explicit tool path is configured.
pub const DEFAULT_TOOL: &str = "terraform";

/// A single "run this command in this directory" request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Program to execute
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Working directory for the process
    pub working_dir: PathBuf,
    /// Extra environment variables
    pub env: HashMap<String, String>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &HashMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Same invocation relocated to another working directory.
    pub fn in_dir(&self, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            ..self.clone()
        }
    }

    /// The wrapped subcommand (first argument), if any.
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(|s| s.as_str())
    }

    /// Human-readable command line for logging and error messages.
    pub fn command_line(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            if arg.contains(' ') {
                cmd.push_str(&format!(" '{}'", arg));
            } else {
                cmd.push_str(&format!(" {}", arg));
            }
        }
        cmd
    }
}

/// Run configuration with timeouts and output handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Timeout in seconds (0 = no timeout)
    pub timeout_seconds: u64,
    /// Whether to stream output lines through the log as they arrive
    pub stream_logs: bool,
    /// Prefix for streamed lines (usually the module path)
    pub log_prefix: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 0,
            stream_logs: false,
            log_prefix: None,
        }
    }
}

impl RunConfig {
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn stream(mut self) -> Self {
        self.stream_logs = true;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = Some(prefix.into());
        self
    }
}
