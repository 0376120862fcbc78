//! Upload stage: hand the encoded artifact to an external collaborator.
//!
//! The wizard never talks to a backend itself. It calls whatever
//! [`Uploader`] the caller injected, and (optionally) a [`Remover`] for the
//! image already stored in the slot. Both return boxed `'static` futures so
//! the wizard can hand the in-flight call out to its caller without holding
//! a borrow on itself.
//!
//! [`HttpUploader`] and [`HttpRemover`] are ready-made collaborators for
//! the usual backend shape: a multipart endpoint taking a single file
//! field, and JSON error bodies carrying a human-readable `message`.

use crate::config::{WizardConfig, UPLOAD_URL_ENV};
use crate::error::{UploadError, WizardError};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// The encoded artifact, presented as a file.
#[derive(Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl std::fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Receives the confirmed artifact. A rejected future sends the wizard
/// back to the preview.
pub trait Uploader: Send + Sync {
    fn upload(&self, file: UploadFile) -> BoxFuture<'static, Result<(), UploadError>>;
}

/// Removes the image currently stored for the slot.
pub trait Remover: Send + Sync {
    fn remove(&self) -> BoxFuture<'static, Result<(), UploadError>>;
}

struct FnUploader<F>(F);

impl<F, Fut> Uploader for FnUploader<F>
where
    F: Fn(UploadFile) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), UploadError>> + Send + 'static,
{
    fn upload(&self, file: UploadFile) -> BoxFuture<'static, Result<(), UploadError>> {
        Box::pin((self.0)(file))
    }
}

struct FnRemover<F>(F);

impl<F, Fut> Remover for FnRemover<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), UploadError>> + Send + 'static,
{
    fn remove(&self) -> BoxFuture<'static, Result<(), UploadError>> {
        Box::pin((self.0)())
    }
}

/// Wrap an async closure as an [`Uploader`].
///
/// ```rust
/// use proofcrop::{upload_fn, UploadError};
///
/// let uploader = upload_fn(|file| async move {
///     if file.bytes.is_empty() {
///         return Err(UploadError::new("empty file"));
///     }
///     Ok(())
/// });
/// # let _ = uploader;
/// ```
pub fn upload_fn<F, Fut>(f: F) -> Arc<dyn Uploader>
where
    F: Fn(UploadFile) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), UploadError>> + Send + 'static,
{
    Arc::new(FnUploader(f))
}

/// Wrap an async closure as a [`Remover`].
pub fn remove_fn<F, Fut>(f: F) -> Arc<dyn Remover>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), UploadError>> + Send + 'static,
{
    Arc::new(FnRemover(f))
}

/// JSON error body returned by the backend.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client, WizardError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| WizardError::InvalidConfig(format!("HTTP client: {}", e)))
}

fn request_error(url: &str, timeout_secs: u64, e: reqwest::Error) -> UploadError {
    if e.is_timeout() {
        UploadError::with_source(format!("request to {} timed out after {}s", url, timeout_secs), e)
    } else {
        UploadError::with_source(format!("request to {} failed", url), e)
    }
}

/// Turn a non-2xx response into an [`UploadError`], preferring the
/// backend's own `message`.
async fn error_from_response(response: reqwest::Response) -> UploadError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) if !body.message.trim().is_empty() => UploadError::new(body.message),
        _ => UploadError::new(format!("HTTP {}", status)),
    }
}

/// Multipart uploader for a backend endpoint.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: Arc<str>,
    field: Arc<str>,
    timeout_secs: u64,
}

impl HttpUploader {
    pub fn new(
        endpoint: impl Into<String>,
        field: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, WizardError> {
        let endpoint: String = endpoint.into();
        let field: String = field.into();
        if !crate::config::is_http_url(&endpoint) {
            return Err(WizardError::InvalidConfig(format!(
                "upload endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }
        Ok(Self {
            client: build_client(timeout_secs)?,
            endpoint: endpoint.into(),
            field: field.into(),
            timeout_secs,
        })
    }

    /// Build from the endpoint, field and timeout in `config`.
    pub fn from_config(endpoint: &str, config: &WizardConfig) -> Result<Self, WizardError> {
        Self::new(endpoint, config.upload_field.clone(), config.upload_timeout_secs)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Uploader for HttpUploader {
    fn upload(&self, file: UploadFile) -> BoxFuture<'static, Result<(), UploadError>> {
        let this = self.clone();
        Box::pin(async move {
            info!(
                "Uploading {} ({} bytes) to {}",
                file.file_name,
                file.bytes.len(),
                this.endpoint
            );

            let part = reqwest::multipart::Part::bytes(file.bytes.to_vec())
                .file_name(file.file_name.clone())
                .mime_str(&file.mime_type)
                .map_err(|e| UploadError::with_source("invalid MIME type for upload", e))?;
            let form = reqwest::multipart::Form::new().part(this.field.to_string(), part);

            let response = this
                .client
                .post(&*this.endpoint)
                .multipart(form)
                .send()
                .await
                .map_err(|e| request_error(&this.endpoint, this.timeout_secs, e))?;

            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            debug!("Upload accepted: HTTP {}", response.status());
            Ok(())
        })
    }
}

/// Deletes the stored image with an HTTP `DELETE`.
#[derive(Debug, Clone)]
pub struct HttpRemover {
    client: reqwest::Client,
    url: Arc<str>,
    timeout_secs: u64,
}

impl HttpRemover {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, WizardError> {
        let url: String = url.into();
        if !crate::config::is_http_url(&url) {
            return Err(WizardError::InvalidConfig(format!(
                "remove URL must be an http(s) URL, got '{}'",
                url
            )));
        }
        Ok(Self {
            client: build_client(timeout_secs)?,
            url: url.into(),
            timeout_secs,
        })
    }
}

impl Remover for HttpRemover {
    fn remove(&self) -> BoxFuture<'static, Result<(), UploadError>> {
        let this = self.clone();
        Box::pin(async move {
            info!("Removing {}", this.url);
            let response = this
                .client
                .delete(&*this.url)
                .send()
                .await
                .map_err(|e| request_error(&this.url, this.timeout_secs, e))?;
            if !response.status().is_success() {
                return Err(error_from_response(response).await);
            }
            Ok(())
        })
    }
}

/// Pick the uploader for `config`.
///
/// Priority: an injected uploader, then `upload_endpoint`, then the
/// `PROOFCROP_UPLOAD_URL` environment variable.
pub fn resolve_uploader(config: &WizardConfig) -> Result<Arc<dyn Uploader>, WizardError> {
    // 1) Caller-provided collaborator
    if let Some(ref uploader) = config.uploader {
        return Ok(Arc::clone(uploader));
    }

    // 2) Configured endpoint
    if let Some(ref endpoint) = config.upload_endpoint {
        return Ok(Arc::new(HttpUploader::from_config(endpoint, config)?));
    }

    // 3) Environment
    if let Ok(endpoint) = std::env::var(UPLOAD_URL_ENV) {
        if !endpoint.trim().is_empty() {
            debug!("Using upload endpoint from {}", UPLOAD_URL_ENV);
            return Ok(Arc::new(HttpUploader::from_config(endpoint.trim(), config)?));
        }
    }

    Err(WizardError::UploaderNotConfigured)
}
