mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use blockpress_core::config::SyncConfig;
use blockpress_core::contract::{
    FetchedMedia, MockContentSource, MockMediaFetcher, MockMediaStore, MockPublisher,
    PublishError, PublishPayload, PublishReceipt, RemoteError,
};
use blockpress_core::error::{SkipStage, SyncError};
use blockpress_core::model::{MediaKind, Page};
use blockpress_core::synchronise::{SynchroniseReport, Synchroniser};
use bytes::Bytes;
use serde_json::{json, Value};

use common::{block, document_record, instant_config};

type Published = Arc<Mutex<Vec<PublishPayload>>>;
type Synced = Arc<Mutex<Vec<String>>>;

/// Every block lists a single paragraph child, except those in `failing`.
fn expect_bodies(source: &mut MockContentSource, failing: &'static [&'static str]) {
    source.expect_list_children().returning(move |block_id, _| {
        if failing.contains(&block_id) {
            Err(RemoteError::from("HTTP 502 from block listing"))
        } else {
            Ok(Page::last(vec![block(
                &format!("{block_id}-p"),
                "paragraph",
                &format!("Body of {block_id}"),
            )]))
        }
    });
}

fn expect_checkpoints(source: &mut MockContentSource) -> Synced {
    let synced: Synced = Arc::default();
    let recorder = synced.clone();
    source
        .expect_mark_synced()
        .withf(|_, property| property == "Synced")
        .returning(move |document_id, _| {
            recorder.lock().unwrap().push(document_id.to_string());
            Ok(())
        });
    synced
}

fn recording_publisher(failing_titles: &'static [&'static str]) -> (MockPublisher, Published) {
    let published: Published = Arc::default();
    let recorder = published.clone();
    let mut publisher = MockPublisher::new();
    publisher.expect_create_draft().returning(move |payload| {
        if failing_titles.contains(&payload.title.as_str()) {
            return Err(PublishError::transient("errcode 45009: api freq out of limit"));
        }
        let mut published = recorder.lock().unwrap();
        published.push(payload.clone());
        Ok(format!("draft-{}", published.len()))
    });
    publisher.expect_submit().returning(|draft_id| {
        Ok(PublishReceipt {
            publish_id: draft_id.replace("draft", "publish"),
        })
    });
    (publisher, published)
}

fn cover_relay() -> (MockMediaFetcher, MockMediaStore) {
    let mut fetcher = MockMediaFetcher::new();
    fetcher.expect_fetch().returning(|url, _| {
        Ok(FetchedMedia {
            source_url: url.to_string(),
            content_type: Some("image/jpeg".to_string()),
            bytes: Bytes::from_static(b"jpeg"),
        })
    });
    let mut store = MockMediaStore::new();
    store
        .expect_store()
        .returning(|media, kind| Ok(format!("{kind:?}:{}", media.source_url)));
    (fetcher, store)
}

async fn run(
    source: &MockContentSource,
    fetcher: &MockMediaFetcher,
    store: &MockMediaStore,
    publisher: &MockPublisher,
    config: &SyncConfig,
) -> Result<SynchroniseReport, SyncError> {
    Synchroniser::new(source, fetcher, store, publisher, config)
        .run()
        .await
}

#[tokio::test]
async fn publishes_and_checkpoints_every_unsynced_document() {
    let mut with_cover = document_record("doc-1", "First");
    with_cover["cover"] = json!({ "type": "external", "external": { "url": "https://img/1.jpg" } });
    let records = vec![with_cover, document_record("doc-2", "Second")];

    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .withf(|filter, page| filter.synced_property == "Synced" && page.cursor.is_none())
        .times(1)
        .returning(move |_, _| Ok(Page::last(records.clone())));
    expect_bodies(&mut source, &[]);
    let synced = expect_checkpoints(&mut source);
    let (fetcher, store) = cover_relay();
    let (publisher, published) = recording_publisher(&[]);
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(report.processed(), 2);
    assert!(report.skipped.is_empty());
    assert_eq!(report.published[0].document_id, "doc-1");
    assert_eq!(report.published[0].publish_id, "publish-1");
    assert_eq!(*synced.lock().unwrap(), ["doc-1", "doc-2"]);

    let published = published.lock().unwrap();
    assert_eq!(published[0].title, "First");
    assert_eq!(published[0].author, "Ada");
    assert_eq!(published[0].content, "<p>Body of doc-1</p>");
    assert_eq!(published[0].digest, "Body of doc-1");
    assert_eq!(published[0].content_source_url, "https://www.notion.so/doc-1");
    assert_eq!(
        published[0].cover_reference,
        format!("{:?}:https://img/1.jpg", MediaKind::Cover)
    );
    assert_eq!(published[1].cover_reference, "fallback-cover");
}

#[tokio::test]
async fn one_failing_document_does_not_stop_the_batch() {
    let records = vec![
        document_record("doc-1", "Broken body"),
        document_record("doc-2", "Fine"),
    ];
    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .returning(move |_, _| Ok(Page::last(records.clone())));
    expect_bodies(&mut source, &["doc-1"]);
    let synced = expect_checkpoints(&mut source);
    let (fetcher, store) = cover_relay();
    let (publisher, published) = recording_publisher(&[]);
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(report.processed(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].document_id, "doc-1");
    assert_eq!(report.skipped[0].stage, SkipStage::Fetch);
    assert_eq!(*synced.lock().unwrap(), ["doc-2"]);
    assert_eq!(published.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn publish_failure_leaves_the_checkpoint_unset() {
    let records = vec![
        document_record("doc-1", "Rejected"),
        document_record("doc-2", "Accepted"),
    ];
    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .returning(move |_, _| Ok(Page::last(records.clone())));
    expect_bodies(&mut source, &[]);
    let synced = expect_checkpoints(&mut source);
    let (fetcher, store) = cover_relay();
    let (publisher, _) = recording_publisher(&["Rejected"]);
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].stage, SkipStage::Publish);
    assert!(
        report.skipped[0].reason.contains("2 attempt"),
        "publishing is retried under its policy: {}",
        report.skipped[0].reason
    );
    assert_eq!(*synced.lock().unwrap(), ["doc-2"]);
}

fn single_document_source() -> (MockContentSource, Synced) {
    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .returning(|_, _| Ok(Page::last(vec![document_record("doc-1", "Only")])));
    expect_bodies(&mut source, &[]);
    let synced = expect_checkpoints(&mut source);
    (source, synced)
}

#[tokio::test]
async fn submit_retry_reuses_the_existing_draft() {
    let (source, synced) = single_document_source();
    let (fetcher, store) = cover_relay();
    let submits = Arc::new(AtomicU32::new(0));
    let counter = submits.clone();
    let mut publisher = MockPublisher::new();
    publisher
        .expect_create_draft()
        .times(1)
        .returning(|_| Ok("draft-7".to_string()));
    publisher
        .expect_submit()
        .withf(|draft_id| draft_id == "draft-7")
        .returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PublishError::transient("errcode -1: system error"))
            } else {
                Ok(PublishReceipt {
                    publish_id: "publish-7".to_string(),
                })
            }
        });
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(report.processed(), 1);
    assert_eq!(report.published[0].publish_id, "publish-7");
    assert_eq!(submits.load(Ordering::SeqCst), 2);
    assert_eq!(*synced.lock().unwrap(), ["doc-1"]);
}

#[tokio::test]
async fn rejected_draft_is_not_retried() {
    let (source, synced) = single_document_source();
    let (fetcher, store) = cover_relay();
    let mut publisher = MockPublisher::new();
    publisher
        .expect_create_draft()
        .times(1)
        .returning(|_| Err(PublishError::rejected("errcode 40007: invalid media_id")));
    publisher.expect_submit().never();
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(report.processed(), 0);
    assert_eq!(report.skipped[0].stage, SkipStage::Publish);
    assert!(
        report.skipped[0].reason.contains("1 attempt"),
        "{}",
        report.skipped[0].reason
    );
    assert!(synced.lock().unwrap().is_empty());
}

#[tokio::test]
async fn checkpoint_failure_skips_the_document_after_publishing() {
    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .returning(|_, _| Ok(Page::last(vec![document_record("doc-1", "Only")])));
    expect_bodies(&mut source, &[]);
    source
        .expect_mark_synced()
        .returning(|_, _| Err(RemoteError::from("conflict")));
    let (fetcher, store) = cover_relay();
    let (publisher, published) = recording_publisher(&[]);
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(report.processed(), 0);
    assert_eq!(report.skipped[0].stage, SkipStage::Checkpoint);
    assert_eq!(published.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_records_are_skipped_before_fetching() {
    let records = vec![
        document_record("doc-1", "   "),
        json!({ "object": "page", "properties": {} }),
        document_record("doc-3", "Valid"),
    ];
    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .returning(move |_, _| Ok(Page::last(records.clone())));
    source
        .expect_list_children()
        .withf(|block_id, _| block_id == "doc-3")
        .times(1)
        .returning(|_, _| Ok(Page::last(vec![block("p", "paragraph", "text")])));
    let synced = expect_checkpoints(&mut source);
    let (fetcher, store) = cover_relay();
    let (publisher, _) = recording_publisher(&[]);
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    let stages: Vec<(String, SkipStage)> = report
        .skipped
        .iter()
        .map(|s| (s.document_id.clone(), s.stage))
        .collect();
    assert_eq!(
        stages,
        [
            ("doc-1".to_string(), SkipStage::Validate),
            ("<unknown>".to_string(), SkipStage::Validate),
        ]
    );
    assert_eq!(*synced.lock().unwrap(), ["doc-3"]);
}

#[tokio::test]
async fn every_page_of_the_listing_is_processed() {
    let mut source = MockContentSource::new();
    source.expect_query_documents().times(3).returning(|_, page| {
        Ok(match page.cursor.as_deref() {
            None => Page::more(
                vec![document_record("doc-1", "One"), document_record("doc-2", "Two")],
                "cursor-2",
            ),
            Some("cursor-2") => Page::more(vec![document_record("doc-3", "Three")], "cursor-3"),
            Some(_) => Page::last(vec![
                document_record("doc-4", "Four"),
                document_record("doc-5", "Five"),
            ]),
        })
    });
    expect_bodies(&mut source, &[]);
    let synced = expect_checkpoints(&mut source);
    let (fetcher, store) = cover_relay();
    let (publisher, _) = recording_publisher(&[]);
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(report.processed(), 5);
    assert_eq!(
        *synced.lock().unwrap(),
        ["doc-1", "doc-2", "doc-3", "doc-4", "doc-5"]
    );
}

#[tokio::test]
async fn a_second_run_publishes_nothing_new() {
    let all: Vec<Value> = vec![
        document_record("doc-1", "One"),
        document_record("doc-2", "Two"),
    ];
    let flags: Arc<Mutex<HashSet<String>>> = Arc::default();

    let mut source = MockContentSource::new();
    let query_flags = flags.clone();
    source.expect_query_documents().returning(move |_, _| {
        let flags = query_flags.lock().unwrap();
        let unsynced = all
            .iter()
            .filter(|record| !flags.contains(record["id"].as_str().unwrap_or_default()))
            .cloned()
            .collect();
        Ok(Page::last(unsynced))
    });
    expect_bodies(&mut source, &[]);
    let mark_flags = flags.clone();
    source.expect_mark_synced().returning(move |document_id, _| {
        mark_flags.lock().unwrap().insert(document_id.to_string());
        Ok(())
    });
    let (fetcher, store) = cover_relay();
    let (publisher, published) = recording_publisher(&[]);
    let config = instant_config();

    let first = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();
    let second = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();

    assert_eq!(first.processed(), 2);
    assert_eq!(second.processed(), 0);
    assert!(second.skipped.is_empty());
    assert_eq!(published.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn listing_failure_aborts_the_run() {
    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .times(3)
        .returning(|_, _| Err(RemoteError::from("HTTP 503")));
    source.expect_list_children().never();
    let fetcher = MockMediaFetcher::new();
    let store = MockMediaStore::new();
    let mut publisher = MockPublisher::new();
    publisher.expect_create_draft().never();
    let config = instant_config();

    let err = run(&source, &fetcher, &store, &publisher, &config)
        .await
        .unwrap_err();

    let SyncError::Listing(retry) = err;
    assert_eq!(retry.attempts, 3);
}

#[tokio::test]
async fn report_serialises_for_the_trigger_endpoint() {
    let mut source = MockContentSource::new();
    source
        .expect_query_documents()
        .returning(|_, _| Ok(Page::last(vec![document_record("doc-1", "   ")])));
    let fetcher = MockMediaFetcher::new();
    let store = MockMediaStore::new();
    let publisher = MockPublisher::new();
    let config = instant_config();

    let report = run(&source, &fetcher, &store, &publisher, &config).await.unwrap();
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["published"], json!([]));
    assert_eq!(value["skipped"][0]["document_id"], "doc-1");
    assert_eq!(value["skipped"][0]["stage"], "validate");
}
