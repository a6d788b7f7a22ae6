use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes as BodyBytes;
use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use blockpress::load_config::PublishSection;
use blockpress::wechat::WeChatClient;
use blockpress_core::backoff::BackoffPolicy;
use blockpress_core::config::SyncConfig;
use blockpress_core::contract::{
    FetchedMedia, MediaStore, MockContentSource, MockMediaFetcher, MockMediaStore, PublishPayload,
    Publisher,
};
use blockpress_core::model::{MediaKind, Page};
use blockpress_core::synchronise::Synchroniser;
use bytes::Bytes;
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Recorded {
    calls: Arc<Mutex<Vec<(String, HashMap<String, String>, Value)>>>,
    /// Number of upcoming `freepublish/submit` calls answered with "system busy".
    busy_submits: Arc<AtomicU32>,
}

impl Recorded {
    fn paths(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }
}

fn record(recorded: &Recorded, path: &str, query: HashMap<String, String>, body: Value) {
    recorded
        .calls
        .lock()
        .unwrap()
        .push((path.to_string(), query, body));
}

async fn spawn_wechat(draft_reply: Value) -> (String, Recorded) {
    let recorded = Recorded::default();
    let draft_reply = Arc::new(draft_reply);
    let app = Router::new()
        .route(
            "/cgi-bin/draft/add",
            post(
                move |State(recorded): State<Recorded>,
                      Query(query): Query<HashMap<String, String>>,
                      Json(body): Json<Value>| {
                    let reply = draft_reply.clone();
                    async move {
                        record(&recorded, "draft/add", query, body);
                        Json((*reply).clone())
                    }
                },
            ),
        )
        .route(
            "/cgi-bin/freepublish/submit",
            post(
                |State(recorded): State<Recorded>,
                 Query(query): Query<HashMap<String, String>>,
                 Json(body): Json<Value>| async move {
                    record(&recorded, "freepublish/submit", query, body);
                    let busy = recorded
                        .busy_submits
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                        .is_ok();
                    if busy {
                        Json(json!({ "errcode": -1, "errmsg": "system error" }))
                    } else {
                        Json(json!({ "errcode": 0, "errmsg": "ok", "publish_id": 2247483_u64 }))
                    }
                },
            ),
        )
        .route(
            "/cgi-bin/material/add_material",
            post(
                |State(recorded): State<Recorded>,
                 Query(query): Query<HashMap<String, String>>,
                 _body: BodyBytes| async move {
                    record(&recorded, "material/add_material", query, Value::Null);
                    Json(json!({ "media_id": "cover-media-1", "url": "http://mmbiz/cover" }))
                },
            ),
        )
        .route(
            "/cgi-bin/media/uploadimg",
            post(
                |State(recorded): State<Recorded>,
                 Query(query): Query<HashMap<String, String>>,
                 _body: BodyBytes| async move {
                    record(&recorded, "media/uploadimg", query, Value::Null);
                    Json(json!({ "url": "http://mmbiz.qpic.cn/inline.png" }))
                },
            ),
        )
        .with_state(recorded.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), recorded)
}

fn section(api_base: String, submit: bool) -> PublishSection {
    PublishSection {
        api_base,
        submit,
        access_token: "wx-token".to_string(),
    }
}

fn payload() -> PublishPayload {
    PublishPayload {
        title: "Hello".to_string(),
        author: "Ada".to_string(),
        digest: "A short digest".to_string(),
        content: "<p>Body</p>".to_string(),
        content_source_url: "https://www.notion.so/doc-1".to_string(),
        cover_reference: "cover-media-1".to_string(),
    }
}

fn png() -> FetchedMedia {
    FetchedMedia {
        source_url: "https://files.example/a.png".to_string(),
        content_type: Some("image/png".to_string()),
        bytes: Bytes::from_static(b"\x89PNG fake"),
    }
}

#[tokio::test]
async fn publish_creates_a_draft_then_submits_it() {
    let (base, recorded) = spawn_wechat(json!({ "media_id": "draft-1" })).await;
    let client = WeChatClient::new(&section(base, true));

    let draft_id = client.create_draft(&payload()).await.unwrap();
    let receipt = client.submit(&draft_id).await.unwrap();

    assert_eq!(receipt.publish_id, "2247483");
    assert_eq!(recorded.paths(), vec!["draft/add", "freepublish/submit"]);
    let calls = recorded.calls.lock().unwrap();
    assert_eq!(calls[0].1["access_token"], "wx-token");
    let article = &calls[0].2["articles"][0];
    assert_eq!(article["title"], "Hello");
    assert_eq!(article["author"], "Ada");
    assert_eq!(article["digest"], "A short digest");
    assert_eq!(article["content"], "<p>Body</p>");
    assert_eq!(article["content_source_url"], "https://www.notion.so/doc-1");
    assert_eq!(article["thumb_media_id"], "cover-media-1");
    assert_eq!(calls[1].2, json!({ "media_id": "draft-1" }));
}

#[tokio::test]
async fn drafts_stay_unsubmitted_when_submission_is_off() {
    let (base, recorded) = spawn_wechat(json!({ "media_id": "draft-2" })).await;
    let client = WeChatClient::new(&section(base, false));

    let draft_id = client.create_draft(&payload()).await.unwrap();
    let receipt = client.submit(&draft_id).await.unwrap();

    assert_eq!(receipt.publish_id, "draft-2");
    assert_eq!(recorded.paths(), vec!["draft/add"]);
}

#[tokio::test]
async fn nonzero_errcode_is_a_rejection() {
    let (base, recorded) =
        spawn_wechat(json!({ "errcode": 40007, "errmsg": "invalid media_id" })).await;
    let client = WeChatClient::new(&section(base, true));

    let err = client.create_draft(&payload()).await.unwrap_err();

    assert!(!err.is_transient());
    let message = err.to_string();
    assert!(message.contains("40007"), "{message}");
    assert!(message.contains("invalid media_id"), "{message}");
    assert_eq!(recorded.paths(), vec!["draft/add"]);
}

#[tokio::test]
async fn covers_become_material_and_inline_images_become_urls() {
    let (base, recorded) = spawn_wechat(json!({})).await;
    let client = WeChatClient::new(&section(base, true));

    let cover = client.store(&png(), MediaKind::Cover).await.unwrap();
    let inline = client.store(&png(), MediaKind::InlineImage).await.unwrap();

    assert_eq!(cover, "cover-media-1");
    assert_eq!(inline, "http://mmbiz.qpic.cn/inline.png");
    assert_eq!(recorded.paths(), vec!["material/add_material", "media/uploadimg"]);
    let calls = recorded.calls.lock().unwrap();
    assert_eq!(calls[0].1["type"], "image");
    assert_eq!(calls[0].1["access_token"], "wx-token");
}

#[tokio::test]
async fn busy_errcode_is_transient() {
    let (base, recorded) = spawn_wechat(json!({ "media_id": "draft-3" })).await;
    recorded.busy_submits.store(1, Ordering::SeqCst);
    let client = WeChatClient::new(&section(base, true));

    let err = client.submit("draft-3").await.unwrap_err();

    assert!(err.is_transient(), "{err}");
    assert!(client.submit("draft-3").await.is_ok());
}

#[tokio::test]
async fn failed_submission_is_retried_without_a_second_draft() {
    let (base, recorded) = spawn_wechat(json!({ "media_id": "draft-4" })).await;
    recorded.busy_submits.store(1, Ordering::SeqCst);
    let client = WeChatClient::new(&section(base, true));

    let mut source = MockContentSource::new();
    source.expect_query_documents().returning(|_, _| {
        Ok(Page::last(vec![json!({
            "id": "doc-1",
            "url": "https://www.notion.so/doc-1",
            "properties": {
                "Name": { "type": "title", "title": [{ "plain_text": "Hello" }] },
                "Synced": { "type": "checkbox", "checkbox": false }
            }
        })]))
    });
    source
        .expect_list_children()
        .returning(|_, _| Ok(Page::last(vec![])));
    source.expect_mark_synced().times(1).returning(|_, _| Ok(()));

    let instant = BackoffPolicy::new(3, Duration::ZERO, Duration::ZERO);
    let mut config = SyncConfig::default();
    config.inter_document_delay = Duration::ZERO;
    config.inter_page_delay = Duration::ZERO;
    config.listing_policy = instant;
    config.publish_policy = instant;
    config.checkpoint_policy = instant;
    config.tree.inter_page_delay = Duration::ZERO;
    config.tree.policy = instant;
    config.media.cover_fallback = "fallback-cover".to_string();

    let report = Synchroniser::new(
        &source,
        &MockMediaFetcher::new(),
        &MockMediaStore::new(),
        &client,
        &config,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.processed(), 1);
    assert_eq!(report.published[0].publish_id, "2247483");
    assert_eq!(
        recorded.paths(),
        vec!["draft/add", "freepublish/submit", "freepublish/submit"]
    );
}
