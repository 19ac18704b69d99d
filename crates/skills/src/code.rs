//! Code skill: allowlisted command execution and workspace file access.
//!
//! The task context selects the operation via `type`:
//! `command` (default), `file_read`, `file_write`, or `git`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use skillbus_core::{
    Capability, ExecutionResult, Skill, SkillContext, SkillError, SkillMetadata, TaskContext,
    handler_fn,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::parse_config;
use crate::workspace::resolve_in_workspace;

/// Characters that would let one allowlisted command chain into another.
const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '>', '<', '\n'];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    pub safe_mode: bool,
    pub allowed_commands: Vec<String>,
    /// Defaults to the process working directory
    pub workspace_path: Option<PathBuf>,
    pub timeout_secs: u64,
    pub max_history: usize,
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            allowed_commands: ["ls", "pwd", "echo", "cat", "git"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            workspace_path: None,
            timeout_secs: 30,
            max_history: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub task: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct CodeSkill {
    config: CodeConfig,
    workspace: PathBuf,
    history: Arc<Mutex<VecDeque<HistoryEntry>>>,
}

impl CodeSkill {
    pub fn new(config: CodeConfig) -> Self {
        let workspace = config
            .workspace_path
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            config,
            workspace,
            history: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn from_config(config: &serde_json::Value) -> Result<Self, SkillError> {
        Ok(Self::new(parse_config("code", config)?))
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Recent executions, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Decide how `command` runs. Outside safe mode it goes to `sh -c`.
    /// In safe mode it is split into argv and spawned directly, and only
    /// if its first word is allowlisted and it carries no shell
    /// metacharacters. `git` is further limited to read-only subcommands
    /// without global options.
    fn check_command(&self, command: &str) -> Result<Invocation, String> {
        if !self.config.safe_mode {
            return Ok(Invocation::Shell(command.to_string()));
        }
        if command.contains(SHELL_METACHARACTERS) {
            return Err("Command contains shell metacharacters not allowed in safe mode".into());
        }
        let argv = split_args(command)?;
        let Some(base) = argv.first() else {
            return Err("Empty command".into());
        };
        if !self.config.allowed_commands.iter().any(|a| a == base) {
            return Err(format!("Command \"{base}\" not allowed in safe mode"));
        }
        if base == "git" {
            check_git_args(&argv[1..])?;
        }
        Ok(Invocation::Direct(argv))
    }

    async fn run_command(&self, command: &str, context: &TaskContext) -> serde_json::Value {
        let command = command.trim();
        if command.is_empty() {
            return op_failure("Empty command");
        }
        let invocation = match self.check_command(command) {
            Ok(invocation) => invocation,
            Err(reason) => {
                warn!(command = %command, "Command rejected");
                return op_failure(reason);
            }
        };

        let cwd = match context.get_str("cwd") {
            Some(cwd) => match resolve_in_workspace(&self.workspace, cwd) {
                Ok(path) => path,
                Err(e) => return op_failure(e.to_string()),
            },
            None => self.workspace.clone(),
        };
        let timeout_secs = context.get_u64("timeout").unwrap_or(self.config.timeout_secs);

        info!(command = %command, cwd = %cwd.display(), "Executing command");
        let mut cmd = match &invocation {
            Invocation::Shell(command) => {
                let mut child = Command::new("sh");
                child.args(["-c", command]);
                child
            }
            Invocation::Direct(argv) => {
                let mut child = Command::new(&argv[0]);
                child.args(&argv[1..]);
                child
            }
        };
        let child = cmd
            .current_dir(&cwd)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(Ok(output)) => {
                let return_code = output.status.code().unwrap_or(-1);
                if !output.status.success() {
                    debug!(command = %command, return_code, "Command exited with failure");
                }
                json!({
                    "success": output.status.success(),
                    "output": String::from_utf8_lossy(&output.stdout),
                    "error": String::from_utf8_lossy(&output.stderr),
                    "return_code": return_code,
                })
            }
            Ok(Err(e)) => op_failure(format!("Failed to run command: {e}")),
            Err(_) => {
                warn!(command = %command, timeout_secs, "Command timed out");
                op_failure(format!("Command execution timed out after {timeout_secs}s"))
            }
        }
    }

    async fn read_file(&self, file_path: &str) -> serde_json::Value {
        let path = match resolve_in_workspace(&self.workspace, file_path) {
            Ok(path) => path,
            Err(e) => return op_failure(e.to_string()),
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => json!({
                "success": true,
                "size": content.len(),
                "content": content,
                "path": path.display().to_string(),
            }),
            Err(e) => op_failure(format!("Failed to read {}: {e}", path.display())),
        }
    }

    async fn write_file(&self, file_path: &str, content: &str) -> serde_json::Value {
        let path = match resolve_in_workspace(&self.workspace, file_path) {
            Ok(path) => path,
            Err(e) => return op_failure(e.to_string()),
        };
        // Repository config and hooks decide what git executes.
        if self.config.safe_mode && path.components().any(|c| c.as_os_str() == ".git") {
            return op_failure("Writing inside .git is not allowed in safe mode");
        }
        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return op_failure(format!("Failed to create directory: {e}"));
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => json!({
                "success": true,
                "path": path.display().to_string(),
                "bytes_written": content.len(),
            }),
            Err(e) => op_failure(format!("Failed to write {}: {e}", path.display())),
        }
    }

    async fn git_operation(&self, operation: &str, context: &TaskContext) -> serde_json::Value {
        let operation = operation.trim();
        let command = if operation.starts_with("git ") {
            operation.to_string()
        } else {
            format!("git {operation}")
        };
        let mut outcome = self.run_command(&command, context).await;
        outcome["operation"] = json!(operation);
        outcome
    }

    fn record(&self, task: &str, kind: &str, success: bool) {
        let mut history = lock(&self.history);
        history.push_back(HistoryEntry {
            task: task.to_string(),
            kind: kind.to_string(),
            success,
            timestamp: Utc::now(),
        });
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }
}

#[async_trait]
impl Skill for CodeSkill {
    fn describe(&self) -> SkillMetadata {
        SkillMetadata::new(
            "code",
            "1.0.0",
            "Code execution, file operations, and development tools integration",
        )
        .with_capabilities([Capability::Code, Capability::System])
        .with_dependencies(&["git"])
    }

    async fn initialize(&self, ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        if !self.workspace.is_dir() {
            return Err(SkillError::InitializationFailed(format!(
                "workspace '{}' is not a directory",
                self.workspace.display()
            )));
        }

        let executor = ctx.executor();
        let publisher = ctx.publisher();
        ctx.subscribe(
            "code.execute",
            handler_fn("code.execute", move |event| {
                let executor = executor.clone();
                let publisher = publisher.clone();
                async move {
                    debug!(source = %event.source, "Code execute event");
                    let task = event.payload["task"].as_str().unwrap_or_default();
                    let context =
                        TaskContext::from_value(event.payload["context"].clone()).unwrap_or_default();
                    let result = executor.execute(task, &context).await;
                    publisher.publish("code.result", serde_json::to_value(&result).unwrap_or_default());
                    Ok(())
                }
            }),
        );

        let executor = ctx.executor();
        let publisher = ctx.publisher();
        ctx.subscribe(
            "code.file_operation",
            handler_fn("code.file_operation", move |event| {
                let executor = executor.clone();
                let publisher = publisher.clone();
                async move {
                    let payload = &event.payload;
                    let file_path = payload["file_path"].as_str().unwrap_or_default();
                    let kind = match payload["operation"].as_str().unwrap_or("read") {
                        "read" => "file_read",
                        "write" => "file_write",
                        other => {
                            let result = ExecutionResult::failure(format!(
                                "Unknown file operation: {other}"
                            ));
                            publisher.publish(
                                "code.file_result",
                                serde_json::to_value(&result).unwrap_or_default(),
                            );
                            return Ok(());
                        }
                    };
                    let context = TaskContext::new()
                        .with("type", kind)
                        .with("file_path", file_path)
                        .with("content", payload["content"].as_str().unwrap_or_default());
                    let result = executor.execute(file_path, &context).await;
                    publisher.publish(
                        "code.file_result",
                        serde_json::to_value(&result).unwrap_or_default(),
                    );
                    Ok(())
                }
            }),
        );

        Ok(())
    }

    async fn execute(
        &self,
        task: &str,
        context: &TaskContext,
    ) -> Result<ExecutionResult, SkillError> {
        let kind = context.get_str("type").unwrap_or("command");
        let outcome = match kind {
            "command" => self.run_command(task, context).await,
            "file_read" => {
                self.read_file(context.get_str("file_path").unwrap_or_default())
                    .await
            }
            "file_write" => {
                self.write_file(
                    context.get_str("file_path").unwrap_or_default(),
                    context.get_str("content").unwrap_or_default(),
                )
                .await
            }
            "git" | "github" => self.git_operation(task, context).await,
            other => op_failure(format!("Unknown task type: {other}")),
        };

        let success = outcome["success"].as_bool().unwrap_or(false);
        self.record(task, kind, success);

        if success {
            return Ok(ExecutionResult::ok(outcome));
        }
        let error = match outcome["error"].as_str() {
            Some(e) if !e.is_empty() => e.to_string(),
            _ => format!("{kind} failed"),
        };
        let mut result = ExecutionResult::failure(error);
        result.result = outcome;
        Ok(result)
    }

    async fn cleanup(&self, _ctx: &SkillContext<'_>) -> Result<(), SkillError> {
        lock(&self.history).clear();
        Ok(())
    }
}

/// How an admitted command is spawned.
#[derive(Debug, PartialEq)]
enum Invocation {
    Shell(String),
    Direct(Vec<String>),
}

/// Split a command line into words. Single quotes are literal, double
/// quotes allow `\"` and `\\` escapes, and a bare backslash escapes the
/// next character.
fn split_args(command: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => word.push(c),
                        None => return Err("Unterminated quote in command".into()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(c @ ('"' | '\\')) => word.push(c),
                            Some(c) => {
                                word.push('\\');
                                word.push(c);
                            }
                            None => return Err("Unterminated quote in command".into()),
                        },
                        Some(c) => word.push(c),
                        None => return Err("Unterminated quote in command".into()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(c) = chars.next() {
                    word.push(c);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}

/// Git subcommands safe mode will run.
const GIT_SUBCOMMANDS: &[&str] = &[
    "status", "log", "diff", "show", "branch", "tag", "rev-parse", "ls-files", "blame",
    "shortlog", "describe",
];

/// Options that make git load extra config, write files or spawn programs.
const GIT_DENIED_OPTIONS: &[&str] = &[
    "--config-env",
    "--output",
    "--ext-diff",
    "--exec",
    "--upload-pack",
    "--receive-pack",
];

/// `args` are the words after `git`. The subcommand must come first so no
/// global option (`-c`, `-C`, `--git-dir`, `--exec-path`, ...) gets through.
fn check_git_args(args: &[String]) -> Result<(), String> {
    let Some(subcommand) = args.first() else {
        return Err("Missing git subcommand".into());
    };
    if !GIT_SUBCOMMANDS.contains(&subcommand.as_str()) {
        return Err(format!("git {subcommand} not allowed in safe mode"));
    }
    for arg in &args[1..] {
        let denied = GIT_DENIED_OPTIONS.iter().any(|option| {
            arg == option || arg.strip_prefix(option).is_some_and(|rest| rest.starts_with('='))
        });
        if denied || arg.starts_with("-c") {
            return Err(format!("git option \"{arg}\" not allowed in safe mode"));
        }
    }
    Ok(())
}

fn op_failure(error: impl Into<String>) -> serde_json::Value {
    json!({
        "success": false,
        "output": "",
        "error": error.into(),
    })
}

fn lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
