//! REST control-plane adapter

use super::{ActionRequest, ActionRuntime, ActionSpec, PingReply, RuntimeError, RuntimeFuture};
use reqwest::{Client as HttpClient, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Connection settings for the control plane.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Host, optionally with scheme; `https://` is assumed when missing
    pub api_host: String,
    /// Platform namespace actions live in
    pub namespace: String,
    /// Basic-auth user
    pub auth_user: String,
    /// Basic-auth password
    pub auth_password: String,
    /// Accept self-signed control-plane certificates
    pub accept_invalid_certs: bool,
    /// Bound on a single ping request
    pub ping_timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            api_host: "localhost".to_string(),
            namespace: "guest".to_string(),
            auth_user: String::new(),
            auth_password: String::new(),
            accept_invalid_certs: true,
            ping_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct Exec<'a> {
    kind: &'static str,
    code: String,
    image: &'a str,
    binary: bool,
}

#[derive(Serialize)]
struct Annotation {
    key: &'static str,
    value: serde_json::Value,
}

#[derive(Serialize)]
struct Limits {
    timeout: u64,
    memory: u32,
    logs: u32,
    concurrency: u32,
}

#[derive(Serialize)]
struct PutActionBody<'a> {
    namespace: &'a str,
    name: &'a str,
    exec: Exec<'a>,
    annotations: Vec<Annotation>,
    limits: Limits,
    publish: bool,
}

/// [`ActionRuntime`] over the platform's REST API.
#[derive(Debug, Clone)]
pub struct RestRuntime {
    config: RestConfig,
    http: HttpClient,
}

impl RestRuntime {
    /// Create an adapter
    pub fn new(config: RestConfig) -> Result<Self, RuntimeError> {
        let http = HttpClient::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        Ok(Self { config, http })
    }

    fn action_url(&self, name: &str) -> String {
        let host = self.config.api_host.trim_end_matches('/');
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };
        format!(
            "{}/api/v1/namespaces/{}/actions/{}",
            base, self.config.namespace, name
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.config.auth_user, Some(&self.config.auth_password))
    }

    /// Send and return the body of a 200 answer
    async fn send(&self, request: RequestBuilder) -> Result<String, RuntimeError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RuntimeError::Timeout
            } else {
                RuntimeError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        if status == StatusCode::OK {
            Ok(body)
        } else {
            Err(RuntimeError::Status {
                code: status.as_u16(),
                body,
            })
        }
    }

    async fn put_action(&self, spec: &ActionSpec) -> Result<(), RuntimeError> {
        let started = Instant::now();
        let code = tokio::fs::read_to_string(&spec.artifact.code_path).await?;
        let body = PutActionBody {
            namespace: &self.config.namespace,
            name: &spec.name,
            exec: Exec {
                kind: "blackbox",
                code,
                image: &spec.artifact.image,
                binary: false,
            },
            annotations: vec![
                Annotation {
                    key: "provide-api-key",
                    value: serde_json::Value::Bool(false),
                },
                Annotation {
                    key: "exec",
                    value: serde_json::Value::from("blackbox"),
                },
            ],
            limits: Limits {
                timeout: spec.timeout_ms,
                memory: spec.memory_mb,
                logs: 10,
                concurrency: 1,
            },
            publish: false,
        };

        let url = format!("{}?overwrite=true", self.action_url(&spec.name));
        self.send(self.request(Method::PUT, &url).json(&body))
            .await?;
        tracing::debug!(
            action = %spec.name,
            memory_mb = spec.memory_mb,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "action definition written"
        );
        Ok(())
    }

    async fn post_request(
        &self,
        name: &str,
        request: &ActionRequest,
        timeout: Option<Duration>,
    ) -> Result<String, RuntimeError> {
        let url = format!("{}?blocking=true&result=true", self.action_url(name));
        let mut builder = self.request(Method::POST, &url).json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        self.send(builder).await
    }
}

impl ActionRuntime for RestRuntime {
    fn provision<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(self.put_action(spec))
    }

    fn update_memory<'a>(&'a self, spec: &'a ActionSpec) -> RuntimeFuture<'a, ()> {
        Box::pin(self.put_action(spec))
    }

    fn ping<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, PingReply> {
        Box::pin(async move {
            let out = self
                .post_request(name, &ActionRequest::Ping, Some(self.config.ping_timeout))
                .await?;
            PingReply::parse(&out)
        })
    }

    fn invoke<'a>(
        &'a self,
        name: &'a str,
        request: &'a ActionRequest,
    ) -> RuntimeFuture<'a, String> {
        Box::pin(self.post_request(name, request, None))
    }

    fn delete<'a>(&'a self, name: &'a str) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.send(self.request(Method::DELETE, &self.action_url(name)))
                .await
                .map(|_| ())
        })
    }

    fn kind(&self) -> &'static str {
        "rest"
    }
}
