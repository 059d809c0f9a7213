//! One-shot HTTP submission of a captured still.
//!
//! Wire contract: `POST <destination>` with a multipart body holding a
//! single field `document`, a JPEG named `image.jpg`. Any success status
//! with a JSON object body resolves to that object; everything else is an
//! `UploadError`. No retries happen here.

use crate::error::UploadError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Url};
use serde_json::Value;

/// Multipart field carrying the image.
pub const FIELD_NAME: &str = "document";

/// File name attached to the image part.
pub const FILE_NAME: &str = "image.jpg";

const IMAGE_MIME: &str = "image/jpeg";

/// Submits an encoded image and returns the parsed response.
#[async_trait]
pub trait UploadGateway: Send + Sync {
    async fn submit(&self, image: Bytes, destination: &Url) -> Result<Value, UploadError>;
}

/// `UploadGateway` over reqwest. Sends no cookies or credentials.
#[derive(Debug, Clone, Default)]
pub struct HttpGateway {
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UploadGateway for HttpGateway {
    #[tracing::instrument(skip(self, image), fields(bytes = image.len(), url = %destination))]
    async fn submit(&self, image: Bytes, destination: &Url) -> Result<Value, UploadError> {
        let part = Part::bytes(image.to_vec())
            .file_name(FILE_NAME)
            .mime_str(IMAGE_MIME)?;
        let form = Form::new().part(FIELD_NAME, part);

        let response = self
            .client
            .post(destination.clone())
            .header(header::CACHE_CONTROL, "no-cache")
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }

        let body = response.bytes().await?;
        parse_body(&body)
    }
}

fn parse_body(body: &[u8]) -> Result<Value, UploadError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| UploadError::UnexpectedBody(e.to_string()))?;
    if !value.is_object() {
        return Err(UploadError::UnexpectedBody(format!(
            "expected an object, got {}",
            json_kind(&value)
        )));
    }
    Ok(value)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
