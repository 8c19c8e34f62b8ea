//! `wsk` command-line adapter

use super::{ActionRequest, ActionRuntime, ActionSpec, PingReply, RuntimeError, RuntimeFuture};
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Where to find the platform CLI and its credentials
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Path of the `wsk` binary
    pub wsk: PathBuf,
    /// Properties file exported as `WSK_CONFIG_FILE`
    pub config_file: Option<PathBuf>,
    /// Bound on a single ping invocation
    pub ping_timeout: Duration,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            wsk: PathBuf::from("wsk"),
            config_file: None,
            ping_timeout: Duration::from_secs(60),
        }
    }
}

/// [`ActionRuntime`] that shells out to `wsk`.
#[derive(Debug, Clone)]
pub struct CliRuntime {
    config: CliConfig,
}

impl CliRuntime {
    pub fn new(config: CliConfig) -> Self {
        Self { config }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.config.wsk);
        cmd.arg("-i").args(args).kill_on_drop(true);
        if let Some(file) = &self.config.config_file {
            cmd.env("WSK_CONFIG_FILE", file);
        }
        cmd
    }

    /// Run `wsk` and return its stdout
    async fn run(&self, args: Vec<String>) -> Result<String, RuntimeError> {
        let rendered = format!("{} -i {}", self.config.wsk.display(), args.join(" "));
        tracing::debug!(command = %rendered, "running platform command");

        let output = self.command(&args).output().await?;
        if !output.status.success() {
            return Err(RuntimeError::Command {
                command: rendered,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn invoke_args(name: &str, request: &ActionRequest) -> Vec<String> {
        let mut args: Vec<String> = ["action", "invoke", "--result", "--blocking", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut param = |key: &str, value: String| {
            args.push("--param".to_string());
            args.push(key.to_string());
            args.push(value);
        };
        param("op", request.op().to_string());
        match request {
            ActionRequest::Ping => {}
            ActionRequest::Create { key, size } => {
                param("key", key.to_string());
                param("size", size.to_string());
            }
            ActionRequest::Destroy { key } => param("key", key.to_string()),
        }
        args
    }
}

impl ActionRuntime for CliRuntime {
    fn provision<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let args = vec![
                "action".to_string(),
                "update".to_string(),
                spec.name.clone(),
                spec.artifact.code_path.display().to_string(),
                "--docker".to_string(),
                spec.artifact.image.clone(),
                "-m".to_string(),
                spec.memory_mb.to_string(),
                "-t".to_string(),
                spec.timeout_ms.to_string(),
            ];
            self.run(args).await.map(|_| ())
        })
    }

    fn update_memory<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let args = vec![
                "action".to_string(),
                "update".to_string(),
                spec.name.clone(),
                "-m".to_string(),
                spec.memory_mb.to_string(),
            ];
            self.run(args).await.map(|_| ())
        })
    }

    fn ping<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, PingReply> {
        Box::pin(async move {
            let args = Self::invoke_args(name, &ActionRequest::Ping);
            let out = tokio::time::timeout(self.config.ping_timeout, self.run(args))
                .await
                .map_err(|_| RuntimeError::Timeout)??;
            PingReply::parse(&out)
        })
    }

    fn invoke<'a>(
        &'a self,
        name: &'a str,
        request: &'a ActionRequest,
    ) -> RuntimeFuture<'a, String> {
        Box::pin(self.run(Self::invoke_args(name, request)))
    }

    fn delete<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            let args = vec!["action".to_string(), "delete".to_string(), name.to_string()];
            self.run(args).await.map(|_| ())
        })
    }

    fn kind(&self) -> &'static str {
        "cli"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_args_create() {
        let args = CliRuntime::invoke_args(
            "StateFunction-2",
            &ActionRequest::Create { key: 42, size: 4096 },
        );
        assert_eq!(
            args.join(" "),
            "action invoke --result --blocking StateFunction-2 \
             --param op create --param key 42 --param size 4096"
        );
    }

    #[test]
    fn test_invoke_args_ping() {
        let args = CliRuntime::invoke_args("a", &ActionRequest::Ping);
        assert_eq!(args.join(" "), "action invoke --result --blocking a --param op ping");
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let runtime = CliRuntime::new(CliConfig {
            wsk: PathBuf::from("/nonexistent/wsk"),
            ..CliConfig::default()
        });
        let err = runtime.delete("a").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_reports_status() {
        let runtime = CliRuntime::new(CliConfig {
            wsk: PathBuf::from("false"),
            ..CliConfig::default()
        });
        let err = runtime.delete("a").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Command { .. }));
    }
}
