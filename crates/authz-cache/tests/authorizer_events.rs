//! Authorizer wired to an event source: pushed events evict cached decisions.

use async_trait::async_trait;
use authz_cache::{
    AuthorizationRequest, Authorizer, AuthorizerConfig, CacheError, Context, DecisionProvider,
    EntitlementQuery, Entitlements, EventSource, EventStream, ProviderDecision, Result,
    SubscriberPhase,
};
use futures::channel::mpsc;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl DecisionProvider for CountingProvider {
    async fn authorize(&self, _request: &AuthorizationRequest) -> Result<ProviderDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProviderDecision {
            decision: "allow".to_string(),
            reasons: Vec::new(),
        })
    }

    async fn entitlements(&self, _query: &EntitlementQuery) -> Result<Entitlements> {
        Ok(Entitlements::default())
    }
}

/// One session whose body is fed by the test
struct ChannelSource {
    body: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn connect(&self) -> Result<EventStream> {
        match self.body.lock().take() {
            Some(rx) => Ok(rx.map(Ok).boxed()),
            None => Err(CacheError::stream_disconnected("already consumed")),
        }
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}

async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn policy_event_evicts_and_next_check_refetches() {
    let (tx, rx) = mpsc::unbounded();
    let source = Arc::new(ChannelSource {
        body: Mutex::new(Some(rx)),
    });
    let provider = Arc::new(CountingProvider::default());
    let config = AuthorizerConfig {
        app_id: 9,
        ..AuthorizerConfig::default()
    };
    let authorizer = Authorizer::with_event_source(config, provider.clone(), source).unwrap();

    until(|| authorizer.subscriber_phase() == Some(SubscriberPhase::Streaming)).await;

    assert!(authorizer.authorize_tool("search", "alice", Context::new()).await);
    assert!(authorizer.authorize_tool("search", "alice", Context::new()).await);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

    // An event for another application leaves the entry alone.
    tx.unbounded_send(b"event: policy_updated\ndata: {\"app_id\": 3}\n\n".to_vec())
        .unwrap();
    until(|| authorizer.stats().invalidations == 1).await;
    assert_eq!(authorizer.stats().size, 1);

    tx.unbounded_send(b"event: entity_updated\ndata: {\"app_id\": 9}\n\n".to_vec())
        .unwrap();
    until(|| authorizer.stats().invalidations == 2).await;
    assert_eq!(authorizer.stats().size, 0);

    assert!(authorizer.authorize_tool("search", "alice", Context::new()).await);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);

    authorizer.close().await;
    assert_eq!(
        authorizer.subscriber_phase(),
        Some(SubscriberPhase::Disconnected)
    );

    // Nothing reaches the cache once closed.
    let _ = tx.unbounded_send(b"data: {\"type\": \"policy_updated\"}\n\n".to_vec());
    tokio::task::yield_now().await;
    assert_eq!(authorizer.stats().size, 1);
    assert_eq!(authorizer.stats().invalidations, 2);
}

#[tokio::test]
async fn disabled_events_start_no_subscriber() {
    let (_tx, rx) = mpsc::unbounded();
    let source = Arc::new(ChannelSource {
        body: Mutex::new(Some(rx)),
    });
    let config = AuthorizerConfig {
        enable_events: false,
        ..AuthorizerConfig::default()
    };
    let authorizer =
        Authorizer::with_event_source(config, Arc::new(CountingProvider::default()), source)
            .unwrap();
    assert_eq!(authorizer.subscriber_phase(), None);
}
