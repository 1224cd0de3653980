//! Answer Kernel Boundary
//!
//! The engine never generates answers itself. It consumes one collaborator
//! call, `answer(prompt, mode, context) -> text`, and wraps it into the
//! [`FallbackResolver`] that the local fallback strategy plays back.
//!
//! # Available Kernels
//!
//! - [`StaticKernel`]: a fixed answer (tests, offline demos)
//! - [`HttpKernel`]: an inference service reached over HTTP

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::builder::{build_fallback_snapshot, FallbackSnapshotOptions};
use crate::error::StreamError;
use crate::request::{FallbackResolver, Snippet, StreamRequest};
use crate::snapshot::StreamSnapshot;

/// Default request timeout for [`HttpKernel`]
pub const DEFAULT_KERNEL_TIMEOUT: Duration = Duration::from_secs(30);

/// Produces a complete answer for a prompt
#[async_trait]
pub trait Kernel: Send + Sync {
    /// Answer `prompt` in `mode` using the retrieved `context`
    async fn answer(&self, prompt: &str, mode: &str, context: &[Snippet]) -> anyhow::Result<String>;
}

/// Kernel that always returns the same answer
#[derive(Debug, Clone)]
pub struct StaticKernel {
    answer: String,
}

impl StaticKernel {
    /// Create a kernel answering `answer`
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
        }
    }
}

#[async_trait]
impl Kernel for StaticKernel {
    async fn answer(&self, _prompt: &str, _mode: &str, _context: &[Snippet]) -> anyhow::Result<String> {
        Ok(self.answer.clone())
    }
}

#[derive(Serialize)]
struct KernelRequest<'a> {
    prompt: &'a str,
    mode: &'a str,
    context: &'a [Snippet],
}

/// Kernel backed by an HTTP inference endpoint
#[derive(Clone)]
pub struct HttpKernel {
    endpoint: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpKernel {
    /// Create a kernel posting to `endpoint`
    #[must_use]
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// The endpoint requests go to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpKernel")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Pull the answer text out of an inference response
///
/// Accepts `{response}`, OpenAI-style `choices[0].message.content` or
/// `choices[0].text`, and `{content}`.
#[must_use]
pub fn extract_answer(body: &Value) -> Option<String> {
    let first_choice = body.get("choices").and_then(|c| c.get(0));
    [
        body.get("response"),
        first_choice.and_then(|c| c.pointer("/message/content")),
        first_choice.and_then(|c| c.get("text")),
        body.get("content"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(str::to_string)
}

#[async_trait]
impl Kernel for HttpKernel {
    async fn answer(&self, prompt: &str, mode: &str, context: &[Snippet]) -> anyhow::Result<String> {
        let mut request = self.http_client.post(&self.endpoint).json(&KernelRequest {
            prompt,
            mode,
            context,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("kernel request to {} failed", self.endpoint))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("kernel answered {status}: {body}");
        }

        let body: Value = response.json().await.context("kernel response is not JSON")?;
        let answer = extract_answer(&body).ok_or_else(|| anyhow!("kernel response carried no answer text"))?;
        debug!(chars = answer.chars().count(), "Kernel answered");
        Ok(answer)
    }
}

/// Adapt an async closure into a [`FallbackResolver`]
pub fn fallback_resolver<F, Fut>(resolve: F) -> FallbackResolver
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StreamSnapshot, StreamError>> + Send + 'static,
{
    Arc::new(move || resolve().boxed())
}

/// Wrap `kernel` into the resolver for `request`
///
/// The resolver asks the kernel for an answer and builds a fallback snapshot
/// from it. Kernel failures become [`StreamError::Resolver`].
#[must_use]
pub fn create_fallback_resolver(
    kernel: Arc<dyn Kernel>,
    request: &StreamRequest,
    options: FallbackSnapshotOptions,
) -> FallbackResolver {
    let request = Arc::new(request.clone());
    fallback_resolver(move || {
        let kernel = Arc::clone(&kernel);
        let request = Arc::clone(&request);
        let options = options.clone();
        async move {
            let answer = kernel
                .answer(&request.prompt, &request.mode, &request.context)
                .await
                .map_err(|e| StreamError::Resolver(format!("{e:#}")))?;
            Ok(build_fallback_snapshot(&answer, &options))
        }
    })
}
