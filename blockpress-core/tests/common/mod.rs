#![allow(dead_code)]

use std::time::Duration;

use blockpress_core::backoff::BackoffPolicy;
use blockpress_core::config::SyncConfig;
use serde_json::{json, Value};

/// A policy that retries `attempts` times without sleeping.
pub fn instant_policy(attempts: u32) -> BackoffPolicy {
    BackoffPolicy::new(attempts, Duration::ZERO, Duration::ZERO)
}

/// Default configuration with every delay removed.
pub fn instant_config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.inter_document_delay = Duration::ZERO;
    config.inter_page_delay = Duration::ZERO;
    config.listing_policy = instant_policy(3);
    config.publish_policy = instant_policy(2);
    config.checkpoint_policy = instant_policy(2);
    config.tree.inter_page_delay = Duration::ZERO;
    config.tree.policy = instant_policy(3);
    config.media.download_policy = instant_policy(2);
    config.media.upload_policy = instant_policy(2);
    config.media.cover_fallback = "fallback-cover".to_string();
    config
}

pub fn text(content: &str) -> Value {
    json!({
        "type": "text",
        "text": { "content": content, "link": null },
        "plain_text": content,
        "annotations": {
            "bold": false, "italic": false, "strikethrough": false,
            "underline": false, "code": false, "color": "default"
        },
        "href": null
    })
}

pub fn block(id: &str, block_type: &str, content: &str) -> Value {
    json!({
        "object": "block",
        "id": id,
        "type": block_type,
        "has_children": false,
        block_type: { "rich_text": [text(content)] }
    })
}

pub fn parent_block(id: &str, block_type: &str, content: &str) -> Value {
    let mut value = block(id, block_type, content);
    value["has_children"] = json!(true);
    value
}

pub fn image_block(id: &str, url: &str) -> Value {
    json!({
        "object": "block",
        "id": id,
        "type": "image",
        "has_children": false,
        "image": { "type": "external", "external": { "url": url }, "caption": [] }
    })
}

pub fn document_record(id: &str, title: &str) -> Value {
    json!({
        "object": "page",
        "id": id,
        "url": format!("https://www.notion.so/{id}"),
        "cover": null,
        "properties": {
            "Name": { "id": "title", "type": "title", "title": [text(title)] },
            "Author": { "id": "a", "type": "rich_text", "rich_text": [text("Ada")] },
            "Summary": { "id": "s", "type": "rich_text", "rich_text": [] },
            "Synced": { "id": "c", "type": "checkbox", "checkbox": false }
        }
    })
}
