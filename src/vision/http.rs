//! HTTP client for the vision service.
//!
//! Endpoints are resolved relative to a base URL such as
//! `http://127.0.0.1:80/v1/`:
//! - `vision/face`            detection, multipart `image`
//! - `vision/face/recognize`  recognition, multipart `image` + `min_confidence`
//! - `vision/face/register`   enrollment, multipart `image` + `userid`
//!
//! Every response is JSON with an optional `success` flag and a `predictions`
//! list. Non-2xx statuses, unparseable bodies and `"success": false` are errors.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{BoundingBox, Candidate, VisionService};

const DETECT_PATH: &str = "vision/face";
const RECOGNIZE_PATH: &str = "vision/face/recognize";
const REGISTER_PATH: &str = "vision/face/register";
const MAX_ERROR_DETAIL: usize = 200;

/// Configuration for `HttpVisionClient`.
#[derive(Clone, Debug)]
pub struct VisionClientConfig {
    /// Base URL the endpoint paths are joined onto.
    pub base_url: String,
    /// Per-request timeout (connect + read + write).
    pub timeout: Duration,
}

impl Default for VisionClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:80/v1/".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Blocking vision service client. One connection pool is shared by all threads.
pub struct HttpVisionClient {
    client: Client,
    detect_url: Url,
    recognize_url: Url,
    register_url: Url,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    predictions: Option<Vec<BoundingBox>>,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    predictions: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpVisionClient {
    pub fn new(config: VisionClientConfig) -> Result<Self> {
        let base = parse_base_url(&config.base_url)?;
        // The service sits on the local network; environment proxies do not apply.
        let client = Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()
            .context("build vision http client")?;
        Ok(Self {
            client,
            detect_url: base.join(DETECT_PATH).context("join detection path")?,
            recognize_url: base.join(RECOGNIZE_PATH).context("join recognition path")?,
            register_url: base.join(REGISTER_PATH).context("join registration path")?,
        })
    }

    pub fn detect_url(&self) -> &Url {
        &self.detect_url
    }

    fn post_form<T: DeserializeOwned>(&self, url: &Url, form: Form) -> Result<T> {
        let response = self
            .client
            .post(url.as_str())
            .multipart(form)
            .send()
            .map_err(|e| anyhow!("vision service {} unreachable: {}", url.path(), e))?;
        let status = response.status();
        let text = response
            .text()
            .with_context(|| format!("read vision response from {}", url.path()))?;
        if !status.is_success() {
            return Err(anyhow!(
                "vision service {} returned HTTP {}: {}",
                url.path(),
                status.as_u16(),
                truncate(&text)
            ));
        }
        serde_json::from_str(&text).map_err(|e| {
            anyhow!(
                "malformed vision response from {}: {} ({})",
                url.path(),
                e,
                truncate(&text)
            )
        })
    }
}

fn jpeg_part(jpeg: &[u8], file_name: &'static str) -> Result<Part> {
    Part::bytes(jpeg.to_vec())
        .file_name(file_name)
        .mime_str("image/jpeg")
        .context("jpeg part content type")
}

impl VisionService for HttpVisionClient {
    fn detect_faces(&self, jpeg: &[u8]) -> Result<Vec<BoundingBox>> {
        let form = Form::new().part("image", jpeg_part(jpeg, "frame.jpg")?);
        let response: DetectResponse = self.post_form(&self.detect_url, form)?;
        check_success(response.success, response.error.as_deref(), "detection")?;
        Ok(response.predictions.unwrap_or_default())
    }

    fn recognize_face(&self, jpeg: &[u8], min_confidence: f32) -> Result<Vec<Candidate>> {
        let form = Form::new()
            .part("image", jpeg_part(jpeg, "face.jpg")?)
            .text("min_confidence", min_confidence.to_string());
        let response: RecognizeResponse = self.post_form(&self.recognize_url, form)?;
        check_success(response.success, response.error.as_deref(), "recognition")?;
        Ok(response.predictions.unwrap_or_default())
    }

    fn register_face(&self, jpeg: &[u8], userid: &str) -> Result<()> {
        let form = Form::new()
            .part("image", jpeg_part(jpeg, "face.jpg")?)
            .text("userid", userid.to_string());
        let response: RegisterResponse = self.post_form(&self.register_url, form)?;
        check_success(response.success, response.error.as_deref(), "registration")
    }
}

/// Parse a base URL, forcing a trailing slash so relative joins append.
pub(crate) fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash)
        .with_context(|| format!("invalid vision service url '{}'", raw))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "unsupported vision service scheme '{}'; expected http(s)",
            other
        )),
    }
}

fn check_success(success: Option<bool>, error: Option<&str>, what: &str) -> Result<()> {
    if success == Some(false) {
        return Err(anyhow!(
            "vision {} failed: {}",
            what,
            error.unwrap_or("no error message")
        ));
    }
    Ok(())
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_ERROR_DETAIL).collect()
}
