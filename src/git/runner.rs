//! Narrow command-execution seam over the `git` binary.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{DevlogError, Result};

/// Captured result of one git invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs `git <args>` in a working directory. A non-zero exit is reported in
/// `GitOutput::success`, not as an error; only failing to spawn is an error.
#[async_trait]
pub trait GitCommandRunner: Send + Sync {
    async fn run(&self, dir: &Path, args: &[String]) -> Result<GitOutput>;
}

/// Real runner spawning the `git` process.
#[derive(Debug, Clone, Default)]
pub struct ProcessGitRunner;

#[async_trait]
impl GitCommandRunner for ProcessGitRunner {
    async fn run(&self, dir: &Path, args: &[String]) -> Result<GitOutput> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .await
            .map_err(|e| DevlogError::BackendUnavailable(format!("Failed to execute git: {}", e)))?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Scripted runner for tests: records every call and answers from rules
/// matched by argument prefix. Unmatched calls succeed with empty output.
#[derive(Debug, Default)]
pub struct MockGitRunner {
    rules: Mutex<Vec<(Vec<String>, GitOutput)>>,
    calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl MockGitRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer calls whose args start with `prefix`. Later rules win.
    pub fn respond(&self, prefix: &[&str], output: GitOutput) -> &Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.insert(0, (prefix.iter().map(|s| s.to_string()).collect(), output));
        }
        self
    }

    pub fn calls(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Joined argument lists, e.g. `"commit -m msg"`.
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|(_, args)| args.join(" ")).collect()
    }
}

#[async_trait]
impl GitCommandRunner for MockGitRunner {
    async fn run(&self, dir: &Path, args: &[String]) -> Result<GitOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((dir.to_path_buf(), args.to_vec()));
        }
        let rules = self
            .rules
            .lock()
            .map_err(|_| DevlogError::BackendUnavailable("mock runner poisoned".to_string()))?;
        let matched = rules
            .iter()
            .find(|(prefix, _)| args.len() >= prefix.len() && args[..prefix.len()] == prefix[..])
            .map(|(_, output)| output.clone());
        Ok(matched.unwrap_or_else(|| GitOutput::ok("")))
    }
}
