//! Invocation of external programs such as `yt-dlp`.
use crate::prelude::*;
use crate::{err, err_ctx, Result};
use std::process::{ExitStatus, Stdio};
use thiserror::Error;

/// The tail of stderr worth showing in the error message
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Couldn't spawn the program. Command:\n`{cmd}`")]
    Spawn { cmd: String, source: std::io::Error },

    #[error("Program exited with {status}. Command:\n`{cmd}`\nStderr:\n{stderr}")]
    ExitStatus {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Bad output (invalid UTF-8). Command:\n`{cmd}`")]
    InvalidUtf8 {
        cmd: String,
        source: std::string::FromUtf8Error,
    },

    #[error("Bad output (invalid JSON). Command:\n`{cmd}`\nOutput:\n{output}")]
    InvalidJson {
        cmd: String,
        output: String,
        source: serde_json::Error,
    },
}

pub(crate) async fn run(program: &str, args: &[String]) -> Result<Vec<u8>> {
    let cmd = display_cmd(program, args)?;

    debug!(%cmd, "Running program");

    let (output, duration) = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .with_duration()
        .await;

    let output = output.map_err(err_ctx!(ProcessError::Spawn { cmd: cmd.clone() }))?;

    let status = output.status;

    debug!(%cmd, %status, duration = tracing_duration(duration), "Program finished");

    if !status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(err!(ProcessError::ExitStatus {
            cmd,
            status,
            stderr: stderr.trim().tail_chars(MAX_STDERR_CHARS),
        }));
    }

    Ok(output.stdout)
}

pub(crate) async fn run_utf8(program: &str, args: &[String]) -> Result<String> {
    let bytes = run(program, args).await?;
    String::from_utf8(bytes).map_err(|source| {
        err!(ProcessError::InvalidUtf8 {
            cmd: display_cmd_lossy(program, args),
            source,
        })
    })
}

pub(crate) async fn run_json<T: serde::de::DeserializeOwned>(
    program: &str,
    args: &[String],
) -> Result<T> {
    let output = run_utf8(program, args).await?;
    serde_json::from_str(&output).map_err(|source| {
        err!(ProcessError::InvalidJson {
            cmd: display_cmd_lossy(program, args),
            output: output.tail_chars(MAX_STDERR_CHARS),
            source,
        })
    })
}

fn display_cmd(program: &str, args: &[String]) -> Result<String> {
    let display_args = shlex::try_join(args.iter().map(String::as_str)).fatal_ctx(|| {
        format!("Couldn't run program that contains a nul byte: {program:?} {args:?}")
    })?;

    Ok(format!("{program} {display_args}"))
}

fn display_cmd_lossy(program: &str, args: &[String]) -> String {
    display_cmd(program, args).unwrap_or_else(|_| format!("{program} {args:?}"))
}
