use std::collections::HashMap;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use scheduler_config::JobDefinition;
use scheduler_core::{JobContext, JobHandler};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Shell 命令描述
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl From<&JobDefinition> for ShellCommand {
    fn from(definition: &JobDefinition) -> Self {
        Self {
            command: definition.command.clone(),
            args: definition.args.clone(),
            working_dir: definition.working_dir.clone(),
            env: definition.env.clone(),
        }
    }
}

/// 运行外部命令的任务处理器，非零退出码视为失败
///
/// 子进程设置了 `kill_on_drop`，超时或取消导致任务被中止时进程也会被杀掉。
#[derive(Debug, Clone)]
pub struct ShellHandler {
    command: ShellCommand,
}

impl ShellHandler {
    pub fn new(command: ShellCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &ShellCommand {
        &self.command
    }
}

#[async_trait]
impl JobHandler for ShellHandler {
    async fn run(&self, context: JobContext) -> anyhow::Result<Value> {
        let shell = &self.command;
        info!(
            job_id = %context.job_id,
            execution_id = %context.execution_id,
            attempt = context.attempt,
            "执行Shell任务: command={}, args={:?}",
            shell.command,
            shell.args
        );

        let mut cmd = Command::new(&shell.command);
        cmd.args(&shell.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("SCHEDULER_JOB_ID", &context.job_id)
            .env("SCHEDULER_EXECUTION_ID", &context.execution_id)
            .env("SCHEDULER_ATTEMPT", context.attempt.to_string());
        if let Some(dir) = &shell.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &shell.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("启动Shell命令失败: {}", shell.command))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("无法获取stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("无法获取stderr"))?;

        let (stdout_lines, stderr_lines) =
            tokio::join!(collect_lines(stdout), collect_lines(stderr));

        let status = child.wait().await.context("等待进程结束失败")?;
        let exit_code = status.code();
        debug!(job_id = %context.job_id, ?exit_code, "Shell任务进程结束");

        if !status.success() {
            let detail = if stderr_lines.is_empty() {
                String::new()
            } else {
                format!(": {}", stderr_lines.join("\n"))
            };
            return Err(anyhow!("命令执行失败，退出码: {exit_code:?}{detail}"));
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": stdout_lines.join("\n"),
            "stderr": stderr_lines.join("\n"),
        }))
    }
}

async fn collect_lines<R>(reader: R) -> Vec<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    let mut reader = BufReader::new(reader).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        lines.push(line);
    }
    lines
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use chrono::Utc;

    fn context() -> JobContext {
        JobContext {
            job_id: "shell-job".to_string(),
            job_name: "shell".to_string(),
            execution_id: "exec-1".to_string(),
            attempt: 1,
            start_time: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_shell_handler_captures_stdout() {
        let handler = ShellHandler::new(ShellCommand {
            command: "echo".to_string(),
            args: vec!["hello".to_string()],
            ..Default::default()
        });
        let value = handler.run(context()).await.unwrap();
        assert_eq!(value["exit_code"], 0);
        assert_eq!(value["stdout"], "hello");
    }

    #[tokio::test]
    async fn test_shell_handler_fails_on_non_zero_exit() {
        let handler = ShellHandler::new(ShellCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            ..Default::default()
        });
        let err = handler.run(context()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Some(3)"));
        assert!(message.contains("oops"));
    }

    #[tokio::test]
    async fn test_shell_handler_passes_env() {
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hi".to_string());
        let handler = ShellHandler::new(ShellCommand {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo $GREETING $SCHEDULER_JOB_ID".to_string()],
            env,
            ..Default::default()
        });
        let value = handler.run(context()).await.unwrap();
        assert_eq!(value["stdout"], "hi shell-job");
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let handler = ShellHandler::new(ShellCommand {
            command: "/definitely/not/a/binary".to_string(),
            ..Default::default()
        });
        assert!(handler.run(context()).await.is_err());
    }

    #[test]
    fn test_from_job_definition() {
        let definition = JobDefinition {
            name: "cleanup".to_string(),
            command: "rm".to_string(),
            args: vec!["-rf".to_string(), "/tmp/x".to_string()],
            ..Default::default()
        };
        let command = ShellCommand::from(&definition);
        assert_eq!(command.command, "rm");
        assert_eq!(command.args.len(), 2);
    }
}
