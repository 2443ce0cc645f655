//! Subprocess processor.
//!
//! Runs `<command...> <input> -o <output> [--model <model>]` and waits for it
//! with a timeout. The child is killed if the attempt is abandoned.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use super::{ProcessingError, Processor};

/// Longest stderr tail kept in an error message
const STDERR_LIMIT: usize = 500;

/// Processor that shells out to a CLI tool
#[derive(Debug, Clone)]
pub struct CommandProcessor {
    /// Program to run (first element of the configured command)
    program: String,

    /// Arguments placed before the input path
    leading_args: Vec<String>,

    /// Model passed via `--model`, omitted when empty
    model: Option<String>,
}

impl CommandProcessor {
    /// Build from a command line such as `["aster"]` or
    /// `["uv", "run", "aster"]`. Returns `None` for an empty command.
    pub fn from_command(command: &[String], model: Option<String>) -> Option<Self> {
        let (program, rest) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            leading_args: rest.to_vec(),
            model: model.filter(|m| !m.trim().is_empty()),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Full argument list for one invocation
    pub fn args_for(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.push(input.to_string_lossy().to_string());
        args.push("-o".to_string());
        args.push(output.to_string_lossy().to_string());

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        args
    }
}

#[async_trait]
impl Processor for CommandProcessor {
    fn name(&self) -> &str {
        &self.program
    }

    async fn process(
        &self,
        input: &Path,
        output: &Path,
        step_timeout: Duration,
    ) -> Result<(), ProcessingError> {
        let args = self.args_for(input, output);
        tracing::debug!("Running {} {:?}", self.program, args);

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessingError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // On timeout the child is dropped, and kill_on_drop terminates it
        let result = timeout(step_timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessingError::Timeout {
                secs: step_timeout.as_secs(),
            })??;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ProcessingError::ExitFailure {
                code: result.status.code().unwrap_or(-1),
                stderr: tail(stderr.trim(), STDERR_LIMIT),
            });
        }

        Ok(())
    }
}

/// Last `limit` bytes of `text`, cut on a char boundary
fn tail(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn strings(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_args_layout() {
        let processor =
            CommandProcessor::from_command(&strings(&["aster"]), Some("llama3.2:1b".into()))
                .unwrap();

        let args = processor.args_for(Path::new("/p/in.pdf"), Path::new("/o/in.md"));
        assert_eq!(processor.program(), "aster");
        assert_eq!(args, strings(&["/p/in.pdf", "-o", "/o/in.md", "--model", "llama3.2:1b"]));
    }

    #[test]
    fn test_leading_args_and_no_model() {
        let processor =
            CommandProcessor::from_command(&strings(&["uv", "run", "aster"]), Some("  ".into()))
                .unwrap();

        let args = processor.args_for(Path::new("in.txt"), Path::new("out.md"));
        assert_eq!(processor.program(), "uv");
        assert_eq!(args, strings(&["run", "aster", "in.txt", "-o", "out.md"]));
    }

    #[test]
    fn test_empty_command() {
        assert!(CommandProcessor::from_command(&[], None).is_none());
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let processor =
            CommandProcessor::from_command(&strings(&["/nonexistent/processor-bin"]), None)
                .unwrap();

        let result = processor
            .process(Path::new("in"), Path::new("out"), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ProcessingError::Spawn { .. })));
    }

    #[cfg(unix)]
    fn shell(script: &str) -> CommandProcessor {
        // `sh -c script sh <input> -o <output>` makes them $1 $2 $3
        CommandProcessor::from_command(&strings(&["sh", "-c", script, "sh"]), None).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_writes_output() {
        let temp = tempfile::TempDir::new().unwrap();
        let input = temp.path().join("note.txt");
        let output: PathBuf = temp.path().join("note.md");
        std::fs::write(&input, b"hello").unwrap();

        shell(r#"cp "$1" "$3""#)
            .process(&input, &output, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr() {
        let result = shell("echo boom >&2; exit 7")
            .process(Path::new("in"), Path::new("out"), Duration::from_secs(5))
            .await;

        match result {
            Err(ProcessingError::ExitFailure { code, stderr }) => {
                assert_eq!(code, 7);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected exit failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let started = std::time::Instant::now();
        let result = shell("sleep 10")
            .process(Path::new("in"), Path::new("out"), Duration::from_millis(200))
            .await;

        assert!(matches!(result, Err(ProcessingError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
