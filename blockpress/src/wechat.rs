//! # WeChat official-account target
//!
//! [`WeChatClient`] implements both [`MediaStore`] and [`Publisher`]:
//!
//! - covers become permanent image material (`material/add_material`), referenced by `media_id`
//! - inline images go through `media/uploadimg`, referenced by the returned URL
//! - articles are created with `draft/add` and, unless disabled, submitted with
//!   `freepublish/submit`
//!
//! Every response is checked for a non-zero `errcode`. Throttling, server errors
//! and the "system busy" errcode are reported as transient so the pipeline retries
//! them; everything else is a rejection.

use async_trait::async_trait;
use blockpress_core::contract::{
    FetchedMedia, MediaStore, PublishError, PublishPayload, PublishReceipt, Publisher,
    RemoteError,
};
use blockpress_core::model::MediaKind;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::load_config::PublishSection;

#[derive(Clone)]
pub struct WeChatClient {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
    submit: bool,
}

#[derive(Debug, Serialize)]
struct DraftArticle<'a> {
    title: &'a str,
    author: &'a str,
    digest: &'a str,
    content: &'a str,
    content_source_url: &'a str,
    thumb_media_id: &'a str,
    need_open_comment: u8,
    only_fans_can_comment: u8,
}

impl WeChatClient {
    pub fn new(section: &PublishSection) -> Self {
        tracing::info!(
            api_base = %section.api_base,
            submit = section.submit,
            access_token_set = !section.access_token.is_empty(),
            "Initialised WeChat client"
        );
        Self {
            http: reqwest::Client::new(),
            api_base: section.api_base.trim_end_matches('/').to_string(),
            access_token: section.access_token.clone(),
            submit: section.submit,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/cgi-bin/{}", self.api_base, path)
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, PublishError> {
        let response = self
            .http
            .post(self.url(path))
            .query(&[("access_token", self.access_token.as_str())])
            .json(body)
            .send()
            .await
            .map_err(PublishError::transient)?;
        checked(path, response).await
    }

    async fn upload(&self, path: &str, extra_query: &[(&str, &str)], media: &FetchedMedia) -> Result<Value, PublishError> {
        let file_name = media_file_name(media);
        let mut part = Part::bytes(media.bytes.to_vec()).file_name(file_name.clone());
        if let Some(content_type) = &media.content_type {
            part = part.mime_str(content_type).map_err(PublishError::rejected)?;
        }
        let response = self
            .http
            .post(self.url(path))
            .query(&[("access_token", self.access_token.as_str())])
            .query(extra_query)
            .multipart(Form::new().part("media", part))
            .send()
            .await
            .map_err(PublishError::transient)?;
        tracing::debug!(path, file_name = %file_name, size = media.bytes.len(), "Uploaded media");
        checked(path, response).await
    }
}

/// `errcode` values WeChat uses for "busy" and quota throttling.
const TRANSIENT_ERRCODES: [i64; 3] = [-1, 45009, 45011];

/// Parse the response body and turn a non-zero `errcode` into an error.
///
/// Server errors, throttling and the busy/quota errcodes are transient; any other
/// failure, including a success status with an unreadable body, is a rejection.
async fn checked(path: &str, response: reqwest::Response) -> Result<Value, PublishError> {
    let status = response.status();
    let text = response.text().await.map_err(PublishError::transient)?;
    let body: Value = match serde_json::from_str(&text) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(path, status = status.as_u16(), error = %e, "WeChat response body is not JSON");
            let message = format!("WeChat {path} returned an unreadable body (HTTP {}): {e}", status.as_u16());
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                PublishError::transient(message)
            } else {
                PublishError::rejected(message)
            });
        }
    };
    let errcode = body.get("errcode").and_then(Value::as_i64).unwrap_or(0);
    if !status.is_success() || errcode != 0 {
        let errmsg = body.get("errmsg").and_then(Value::as_str).unwrap_or("unknown");
        tracing::error!(path, status = status.as_u16(), errcode, errmsg, "WeChat API returned an error");
        let message = format!("WeChat {path} failed (HTTP {}, errcode {errcode}): {errmsg}", status.as_u16());
        let transient = status.is_server_error()
            || status.as_u16() == 429
            || TRANSIENT_ERRCODES.contains(&errcode);
        return Err(if transient {
            PublishError::transient(message)
        } else {
            PublishError::rejected(message)
        });
    }
    Ok(body)
}

fn string_field(body: &Value, field: &str, path: &str) -> Result<String, PublishError> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PublishError::rejected(format!("WeChat {path} response has no {field}")))
}

/// SHA-256 of the bytes plus an extension derived from the content type.
pub fn media_file_name(media: &FetchedMedia) -> String {
    let digest = format!("{:x}", Sha256::digest(&media.bytes));
    let essence = media
        .content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());
    let extension = match essence.as_deref() {
        Some("image/jpeg") | Some("image/jpg") => "jpg",
        Some("image/png") => "png",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/bmp") => "bmp",
        _ => "bin",
    };
    format!("{digest}.{extension}")
}

#[async_trait]
impl MediaStore for WeChatClient {
    async fn store(&self, media: &FetchedMedia, kind: MediaKind) -> Result<String, RemoteError> {
        match kind {
            MediaKind::Cover => {
                let path = "material/add_material";
                let body = self.upload(path, &[("type", "image")], media).await?;
                Ok(string_field(&body, "media_id", path)?)
            }
            MediaKind::InlineImage => {
                let path = "media/uploadimg";
                let body = self.upload(path, &[], media).await?;
                Ok(string_field(&body, "url", path)?)
            }
        }
    }
}

#[async_trait]
impl Publisher for WeChatClient {
    async fn create_draft(&self, payload: &PublishPayload) -> Result<String, PublishError> {
        let article = DraftArticle {
            title: &payload.title,
            author: &payload.author,
            digest: &payload.digest,
            content: &payload.content,
            content_source_url: &payload.content_source_url,
            thumb_media_id: &payload.cover_reference,
            need_open_comment: 0,
            only_fans_can_comment: 0,
        };
        let draft = self
            .post_json("draft/add", &json!({ "articles": [article] }))
            .await?;
        let draft_id = string_field(&draft, "media_id", "draft/add")?;
        tracing::info!(draft_id = %draft_id, title = %payload.title, "Draft created");
        Ok(draft_id)
    }

    /// Submit `draft_id` with `freepublish/submit`. With submission turned off the
    /// draft stays unpublished and its id is the receipt.
    async fn submit(&self, draft_id: &str) -> Result<PublishReceipt, PublishError> {
        if !self.submit {
            tracing::info!(draft_id, "Submission disabled, leaving draft unpublished");
            return Ok(PublishReceipt {
                publish_id: draft_id.to_string(),
            });
        }
        let submitted = self
            .post_json("freepublish/submit", &json!({ "media_id": draft_id }))
            .await?;
        let publish_id = match submitted.get("publish_id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(PublishError::rejected(
                    "WeChat freepublish/submit response has no publish_id",
                ))
            }
        };
        tracing::info!(draft_id, publish_id = %publish_id, "Draft submitted for publication");
        Ok(PublishReceipt { publish_id })
    }
}
