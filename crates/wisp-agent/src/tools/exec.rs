//! `exec` tool — one-shot shell command with a filtered environment and a
//! process-group kill on timeout.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{Danger, Tool, ToolResult};

/// Maximum characters of combined output returned to the model.
const MAX_OUTPUT_CHARS: usize = 30_000;

/// Env var name prefix that always gets stripped — the daemon's own
/// configuration must never leak into a subprocess the model controls.
const DAEMON_ENV_PREFIX: &str = "WISP_";

/// Decide whether an environment variable survives into a tool subprocess.
///
/// Strips everything carrying the daemon's own prefix and every name ending
/// in one of the configured secret suffixes (`_KEY`, `_TOKEN`, …), compared
/// case-insensitively.
pub fn env_allowed(name: &str, secret_suffixes: &[String]) -> bool {
    let upper = name.to_uppercase();
    if upper.starts_with(DAEMON_ENV_PREFIX) {
        return false;
    }
    !secret_suffixes
        .iter()
        .any(|suffix| upper.ends_with(&suffix.to_uppercase()))
}

/// The filtered environment for tool subprocesses.
pub fn filtered_env(secret_suffixes: &[String]) -> HashMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| env_allowed(name, secret_suffixes))
        .collect()
}

pub struct ExecTool {
    secret_suffixes: Vec<String>,
    timeout: Duration,
    workdir: std::path::PathBuf,
}

impl ExecTool {
    pub fn new(secret_suffixes: Vec<String>, timeout: Duration, workdir: std::path::PathBuf) -> Self {
        Self {
            secret_suffixes,
            timeout,
            workdir,
        }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout and stderr. Runs in \
         the workspace directory with a filtered environment. Default \
         timeout kills the whole process tree."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute via sh -c."
                }
            },
            "required": ["command"]
        })
    }

    fn danger(&self) -> Danger {
        Danger::Critical
    }

    async fn execute(&self, input: serde_json::Value, cancel: &CancellationToken) -> ToolResult {
        let command = match input.get("command").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.to_string(),
            _ => return ToolResult::error("missing required parameter: command"),
        };

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&self.workdir)
            .env_clear()
            .envs(filtered_env(&self.secret_suffixes))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        // Fresh process group so a timeout can terminate the whole tree,
        // not just the immediate shell.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to spawn: {e}")),
        };

        #[cfg(unix)]
        let pgid = child.id().map(|id| id as i32);

        let wait = child.wait_with_output();
        let output = tokio::select! {
            _ = cancel.cancelled() => {
                #[cfg(unix)]
                kill_group(pgid);
                return ToolResult::error("command cancelled");
            }
            _ = tokio::time::sleep(self.timeout) => {
                warn!(timeout_secs = self.timeout.as_secs(), "exec timed out, killing process group");
                #[cfg(unix)]
                kill_group(pgid);
                return ToolResult::error(format!(
                    "command timed out after {}s",
                    self.timeout.as_secs()
                ));
            }
            out = wait => match out {
                Ok(o) => o,
                Err(e) => return ToolResult::error(format!("wait failed: {e}")),
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = String::new();
        if !stdout.is_empty() {
            text.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("[stderr]\n");
            text.push_str(&stderr);
        }
        let code = output.status.code().unwrap_or(-1);
        if code != 0 {
            text.push_str(&format!("\n[exit code: {code}]"));
        }
        if text.is_empty() {
            text = "(no output)".to_string();
        }
        if text.len() > MAX_OUTPUT_CHARS {
            let cut: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
            text = format!("{cut}\n\n[output truncated at {MAX_OUTPUT_CHARS} characters]");
        }
        ToolResult::success(text)
    }
}

/// Kill an entire process group. The negative pid addresses the group.
#[cfg(unix)]
fn kill_group(pgid: Option<i32>) {
    if let Some(pgid) = pgid {
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
}
