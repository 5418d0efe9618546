pub mod producer;
pub mod silence;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{Error, Result};

/// Captured output of a finished external tool.
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run an external tool to completion with a wall-clock timeout.
///
/// `kill_on_drop` reaps the child if the timeout fires. A non-zero exit is an
/// error carrying the tool name and its stderr.
pub async fn run_tool(program: &Path, args: &[&str], timeout: Duration) -> Result<ToolOutput> {
    let tool = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    log::debug!("running {} {}", tool, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::ToolTimedOut {
                tool,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        return Err(Error::tool_failed(
            &tool,
            output.status.code().unwrap_or(-1),
            &stderr,
        ));
    }
    Ok(ToolOutput { stdout, stderr })
}

/// Millisecond offset as an ffmpeg `HH:MM:SS.mmm` timecode.
pub fn millis_to_timecode(ms: i64) -> String {
    let total_secs = ms / 1000;
    let millis = ms % 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}
