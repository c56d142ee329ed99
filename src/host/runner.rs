//! Bridge subprocess execution

use crate::error::{Result, SegmentError};
use crate::protocol::SegmentCommand;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

/// Name of the bridge binary when no explicit path is configured
pub const BRIDGE_BINARY: &str = "segany-bridge";

/// Captured result of a successful bridge run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeOutput {
    pub stdout_lines: Vec<String>,
    pub stderr: String,
}

impl BridgeOutput {
    /// Last non-empty stdout line, normally the status line
    #[must_use]
    pub fn status_line(&self) -> Option<&str> {
        self.stdout_lines
            .iter()
            .rev()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct BridgeRunner {
    program: PathBuf,
    /// Options placed before the positional arguments
    leading_args: Vec<String>,
}

impl BridgeRunner {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Resolve the bridge: explicit path, else a sibling of the current executable, else `PATH`
    #[must_use]
    pub fn locate(configured: Option<&str>) -> Self {
        if let Some(path) = configured.filter(|p| !p.trim().is_empty()) {
            return Self::new(path);
        }
        let sibling = std::env::current_exe().ok().and_then(|exe| {
            exe.parent()
                .map(|dir| dir.join(format!("{BRIDGE_BINARY}{}", std::env::consts::EXE_SUFFIX)))
        });
        match sibling {
            Some(path) if path.exists() => Self::new(path),
            _ => Self::new(BRIDGE_BINARY),
        }
    }

    #[must_use]
    pub fn with_leading_arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.leading_args.push(arg.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Full argument vector passed to the bridge
    #[must_use]
    pub fn args_for(&self, command: &SegmentCommand) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend(command.to_args());
        args
    }

    /// Run the bridge to completion, streaming its stdout into the log
    ///
    /// # Errors
    /// `SubprocessFailure` with the captured stderr when the bridge exits non-zero,
    /// `Io` when it cannot be spawned.
    pub fn run(&self, command: &SegmentCommand) -> Result<BridgeOutput> {
        let args = self.args_for(command);
        tracing::info!(program = %self.program.display(), args = ?args, "launching segmentation bridge");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SegmentError::file_io_error("spawn bridge", &self.program, e))?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut text = String::new();
                stderr.read_to_string(&mut text).map(|_| text)
            })
        });

        let stdout_lines = match child.stdout.take().map(forward_lines).transpose() {
            Ok(lines) => lines.unwrap_or_default(),
            Err(e) => {
                reap(&mut child);
                return Err(e.into());
            },
        };

        let status = child.wait()?;
        let stderr = match stderr_reader.map(std::thread::JoinHandle::join) {
            Some(Ok(Ok(text))) => text,
            Some(Ok(Err(e))) => {
                tracing::warn!(error = %e, "could not read bridge stderr");
                String::new()
            },
            Some(Err(_)) => {
                tracing::warn!("bridge stderr reader panicked");
                String::new()
            },
            None => String::new(),
        };

        if !status.success() {
            tracing::error!(%status, "segmentation bridge failed");
            return Err(SegmentError::SubprocessFailure {
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(BridgeOutput { stdout_lines, stderr })
    }
}

/// Read `reader` line by line, forwarding each line to the log
fn forward_lines<R: Read>(reader: R) -> std::io::Result<Vec<String>> {
    let mut lines = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        tracing::info!(target: "segany::bridge", "{}", line);
        lines.push(line);
    }
    Ok(lines)
}

/// Kill and wait for a child whose output can no longer be read
fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "bridge already exited");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(error = %e, "could not reap bridge process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModelTypeRequest;

    #[test]
    fn test_leading_args_precede_command() {
        let runner = BridgeRunner::new("/opt/segany-bridge")
            .with_leading_arg("--runtime")
            .with_leading_arg("mock");
        let command = SegmentCommand::self_test(ModelTypeRequest::Auto, "/m/sam_vit_b_01ec64.onnx");
        assert_eq!(
            runner.args_for(&command),
            vec!["--runtime", "mock", "auto", "/m/sam_vit_b_01ec64.onnx"]
        );
    }

    #[test]
    fn test_locate_prefers_configured_path() {
        let runner = BridgeRunner::locate(Some("/custom/bridge"));
        assert_eq!(runner.program(), Path::new("/custom/bridge"));
        let runner = BridgeRunner::locate(Some("  "));
        assert_ne!(runner.program(), Path::new("  "));
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let runner = BridgeRunner::new("/nonexistent/segany-bridge-missing");
        let command = SegmentCommand::self_test(ModelTypeRequest::Auto, "x.onnx");
        assert!(matches!(runner.run(&command), Err(SegmentError::Io(_))));
    }

    #[test]
    fn test_forward_lines_rejects_invalid_utf8() {
        let lines = forward_lines(&b"Loading model\nDone!\n"[..]).unwrap();
        assert_eq!(lines, vec!["Loading model", "Done!"]);
        assert!(forward_lines(&b"ok\n\xff\xfe\n"[..]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_stdout_reaps_child() {
        let runner = BridgeRunner::new("sh")
            .with_leading_arg("-c")
            .with_leading_arg("printf 'bad \\377\\n'; exec sleep 30");
        let command = SegmentCommand::self_test(ModelTypeRequest::Auto, "x.onnx");

        let started = std::time::Instant::now();
        assert!(matches!(runner.run(&command), Err(SegmentError::Io(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
    }

    #[test]
    fn test_status_line_skips_blank_lines() {
        let output = BridgeOutput {
            stdout_lines: vec!["Done!".into(), "   ".into()],
            stderr: String::new(),
        };
        assert_eq!(output.status_line(), Some("Done!"));
    }
}
