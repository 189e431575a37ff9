use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use entities::{
    is_temp_id,
    models::{
        message::Message,
        notification::{Notification, NotificationKind},
    },
};
use futures::future::join_all;
use remote::{
    Query, RemoteError,
    memory::{Failure, InMemoryCollection, Operation},
};
use services::{
    FetchOutcome, FetchScheduler, MutationOutcome, SharedCache, SuppressReason, SyncConfig,
    services::{chat::ConversationView, notification_feed::NotificationFeed},
};
use tokio_util::sync::CancellationToken;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("services=debug")
        .with_test_writer()
        .try_init();
}

fn offline_chat_config() -> SyncConfig {
    SyncConfig {
        max_jitter_ms: 0,
        ..SyncConfig::chat()
    }
}

fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        user_email: "ada@example.com".into(),
        title: id.to_string(),
        message: String::new(),
        kind: NotificationKind::Message,
        link: None,
        read,
        created_date: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
    }
}

async fn open_chat(remote: &Arc<InMemoryCollection<Message>>) -> ConversationView {
    let view = ConversationView::with_config(
        remote.clone(),
        "C123",
        "ada@example.com",
        offline_chat_config(),
    );
    view.subscription().changes().changed().await.unwrap();
    view
}

#[tokio::test(start_paused = true)]
async fn chat_send_offline_leaves_no_phantom() {
    init_tracing();
    let remote: Arc<InMemoryCollection<Message>> = Arc::new(InMemoryCollection::new());
    let view = open_chat(&remote).await;
    remote.fail_always(Operation::Create, Failure::Reject(RemoteError::RateLimited));

    let ticket = view.send("hello").unwrap();
    let shown = view.messages();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].content, "hello");
    assert_eq!(shown[0].sender_email, "ada@example.com");
    assert!(is_temp_id(&shown[0].id));

    assert_eq!(
        ticket.outcome().await,
        MutationOutcome::Reconciled {
            error: RemoteError::RateLimited
        }
    );
    assert_eq!(remote.calls(Operation::Create), 3);
    assert!(view.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn chat_send_with_lost_response_leaves_no_duplicate() {
    init_tracing();
    let remote: Arc<InMemoryCollection<Message>> = Arc::new(InMemoryCollection::new());
    let view = open_chat(&remote).await;
    // the first attempt is stored but its response is lost, later ones are throttled
    remote.fail_next(
        Operation::Create,
        1,
        Failure::AcceptThenFail(RemoteError::RateLimited),
    );

    let ticket = view.send("hello").unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    remote.fail_always(Operation::Create, Failure::Reject(RemoteError::RateLimited));

    assert!(matches!(
        ticket.outcome().await,
        MutationOutcome::Reconciled { .. }
    ));
    let shown = view.messages();
    assert_eq!(shown.len(), 1);
    assert_eq!(shown[0].content, "hello");
    assert!(!is_temp_id(&shown[0].id));
    assert_eq!(remote.items().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_during_pending_write_keeps_optimistic_state() {
    init_tracing();
    let remote = Arc::new(InMemoryCollection::with_items(vec![notification("a", false)]));
    remote.set_latency(Operation::Update, Duration::from_secs(40));
    let feed = NotificationFeed::open(
        remote.clone(),
        "ada@example.com",
        20,
        SyncConfig::notification_bell(),
    );
    feed.subscription().changes().changed().await.unwrap();

    let ticket = feed.mark_read("a").unwrap();
    // the 30s poll lands while the write is still on the wire
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(remote.calls(Operation::Fetch), 2);
    assert!(feed.notifications()[0].read);
    assert_eq!(feed.unread_count(), 0);

    assert!(ticket.outcome().await.is_confirmed());
    assert_eq!(feed.unread_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_fetch() {
    init_tracing();
    let remote = Arc::new(InMemoryCollection::with_items(vec![notification("a", false)]));
    remote.set_latency(Operation::Fetch, Duration::from_millis(200));
    let scheduler = FetchScheduler::<Notification>::new(
        remote.clone(),
        Query::new(),
        Arc::new(SharedCache::new()),
        &SyncConfig::default(),
        CancellationToken::new(),
    );

    let outcomes = join_all((0..10).map(|i| scheduler.request_fetch(i % 2 == 0))).await;

    let applied = outcomes
        .iter()
        .filter(|o| matches!(o, Ok(FetchOutcome::Applied { .. })))
        .count();
    let coalesced = outcomes
        .iter()
        .filter(|o| **o == Ok(FetchOutcome::Suppressed(SuppressReason::InFlight)))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(coalesced, 9);
    assert_eq!(remote.calls(Operation::Fetch), 1);
}

#[tokio::test(start_paused = true)]
async fn unread_count_stays_consistent_through_mark_all() {
    init_tracing();
    let remote = Arc::new(InMemoryCollection::with_items(
        (0..4).map(|i| notification(&format!("n{i}"), i % 2 == 0)).collect(),
    ));
    let feed = NotificationFeed::page(remote.clone(), "ada@example.com");
    let mut changes = feed.subscription().changes();
    changes.changed().await.unwrap();
    assert_eq!(feed.unread_count(), 2);

    remote.fail_next(
        Operation::Update,
        1,
        Failure::Reject(RemoteError::Invalid("read is immutable".into())),
    );
    let report = feed.mark_all_read().await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 1);
    let expected = remote.items().iter().filter(|n| !n.read).count();
    assert_eq!(feed.unread_count(), expected);
    assert_eq!(expected, 1);
}
