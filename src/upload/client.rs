//! Upload endpoint and HTTP transport.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use url::Url;

use crate::error::PipelineError;
use crate::upload::payload::MultipartPayload;

/// Path appended to the base URL.
pub const UPLOAD_PATH: &str = "api/image/";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_ERROR_BODY: usize = 200;

/// Parse and normalize a user-supplied base URL.
pub fn parse_base_url(raw: &str) -> Result<Url, PipelineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidEndpoint("base url is empty".to_string()));
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash)
        .map_err(|err| PipelineError::InvalidEndpoint(format!("{}: {}", trimmed, err)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PipelineError::InvalidEndpoint(format!(
                "unsupported scheme '{}' (expected http or https)",
                other
            )))
        }
    }
    if url.host_str().is_none() {
        return Err(PipelineError::InvalidEndpoint(format!("{}: missing host", trimmed)));
    }
    Ok(url)
}

/// Base URL shared between the interactive thread (writer) and the uploader.
#[derive(Clone, Debug, Default)]
pub struct UploadTarget {
    base: Arc<RwLock<Option<Url>>>,
}

impl UploadTarget {
    /// Target with no base URL yet. Uploads fail until one is set.
    pub fn unset() -> Self {
        Self::default()
    }

    pub fn new(base_url: &str) -> Result<Self, PipelineError> {
        let target = Self::unset();
        target.set_base_url(base_url)?;
        Ok(target)
    }

    pub fn set_base_url(&self, base_url: &str) -> Result<(), PipelineError> {
        let url = parse_base_url(base_url)?;
        log::info!("upload endpoint set to {}{}", url, UPLOAD_PATH);
        *self
            .base
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(url);
        Ok(())
    }

    pub fn base_url(&self) -> Option<Url> {
        self.base
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// `base_url + "api/image/"`.
    pub fn endpoint(&self) -> Result<Url, PipelineError> {
        let base = self
            .base_url()
            .ok_or_else(|| PipelineError::InvalidEndpoint("no base url configured".to_string()))?;
        base.join(UPLOAD_PATH)
            .map_err(|err| PipelineError::InvalidEndpoint(err.to_string()))
    }
}

/// Server answer to a successful upload. The body is opaque.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadReceipt {
    pub status: u16,
    pub body: String,
}

pub trait ImageUploader: Send + Sync {
    fn upload(
        &self,
        endpoint: &Url,
        payload: &MultipartPayload,
    ) -> Result<UploadReceipt, PipelineError>;
}

/// Blocking multipart POST over `ureq`.
pub struct HttpUploader {
    agent: ureq::Agent,
}

impl HttpUploader {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }
}

impl Default for HttpUploader {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

impl ImageUploader for HttpUploader {
    fn upload(
        &self,
        endpoint: &Url,
        payload: &MultipartPayload,
    ) -> Result<UploadReceipt, PipelineError> {
        let response = self
            .agent
            .post(endpoint.as_str())
            .set("Content-Type", &payload.content_type())
            .send_bytes(payload.body());
        match response {
            Ok(response) => {
                let status = response.status();
                let body = response
                    .into_string()
                    .map_err(|err| PipelineError::UploadFailure(format!("read response: {}", err)))?;
                Ok(UploadReceipt { status, body })
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(PipelineError::UploadFailure(format!(
                    "server responded {}: {}",
                    code,
                    truncate(&body, MAX_ERROR_BODY)
                )))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(PipelineError::UploadFailure(transport.to_string()))
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
