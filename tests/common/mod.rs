//! Scripted command runner shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use azexport::services::{CommandError, CommandOutput, CommandRunner, CommandSpec, StreamedOutput};
use camino::Utf8PathBuf;
use std::fs;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

type OutputScript = Box<dyn Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync>;
type StreamScript = Box<dyn Fn(&CommandSpec) -> Result<StreamedOutput, CommandError> + Send + Sync>;

/// Answers every command from closures and records what was run.
pub struct ScriptedRunner {
    output: OutputScript,
    stream: StreamScript,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new<O, S>(output: O, stream: S) -> Self
    where
        O: Fn(&CommandSpec) -> Result<CommandOutput, CommandError> + Send + Sync + 'static,
        S: Fn(&CommandSpec) -> Result<StreamedOutput, CommandError> + Send + Sync + 'static,
    {
        Self {
            output: Box::new(output),
            stream: Box::new(stream),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every recorded command line as `program arg arg ...`.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|spec| format!("{} {}", spec.program, spec.args.join(" ")))
            .collect()
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.output)(spec)
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        _limit: Duration,
    ) -> Result<StreamedOutput, CommandError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.stream)(spec)
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(1),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

pub fn exited(code: i32) -> StreamedOutput {
    StreamedOutput {
        code: Some(code),
        lines: vec![format!("exit {}", code)],
    }
}

/// Value following `flag` in the command's arguments.
pub fn flag_value<'a>(spec: &'a CommandSpec, flag: &str) -> Option<&'a str> {
    spec.args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| spec.args.get(i + 1))
        .map(String::as_str)
}

/// Export tool stand-in: writes a `main.tf` into `--output-dir` and exits 0.
pub fn export_writes_tf(spec: &CommandSpec) -> Result<StreamedOutput, CommandError> {
    if let Some(dir) = flag_value(spec, "--output-dir") {
        let dir = Utf8PathBuf::from(dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("main.tf"), "resource \"azurerm_resource_group\" \"rg\" {}\n").unwrap();
    }
    Ok(exited(0))
}

pub fn temp_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, path)
}
