use crate::item::FeedEvent;
use crate::player::PlayerLookup;
use crate::registry::FilterRegistry;
use crate::webhook::{Alert, AlertSink, Embed, EmbedImage};
use anyhow::Context;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Sentinel frame shared by both directions of the heartbeat protocol.
pub const HEARTBEAT_FRAME: &str = "3";

/// The single tag marking an ownership-transfer notification.
const OWNER_TRANSFER_TAG: &str = "owner";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

fn transition(state: &mut ConnectionState, next: ConnectionState) {
    log::debug!("connection state: {:?} -> {:?}", *state, next);
    *state = next;
}

/// Everything known about an alert before enrichment runs.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub content: String,
    pub owner: String,
    pub tags: Vec<String>,
    pub passed: Vec<String>,
    pub item_id: String,
}

/// Drop heartbeat echoes and decode the rest; a frame that fails to decode is
/// a dropped event, never a dropped connection.
pub fn decode_frame(text: &str) -> Option<FeedEvent> {
    if text == HEARTBEAT_FRAME {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(event) => Some(event),
        Err(e) => {
            log::debug!("dropping malformed frame: {e}");
            None
        }
    }
}

/// Render the final alert once the owner label is resolved.
pub fn build_alert(
    draft: AlertDraft,
    owner_label: &str,
    player_page_url: &str,
    image_api_url: &str,
) -> Alert {
    let backticked = |values: &[String]| {
        values
            .iter()
            .map(|v| format!("`{v}`"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let description = [
        format!(
            "Owner: [{}]({}/{})",
            owner_label, player_page_url, draft.owner
        ),
        format!("Events: {}", backticked(&draft.tags)),
        format!("Passed filters: {}", backticked(&draft.passed)),
    ]
    .join("\n");

    Alert {
        content: draft.content,
        embeds: vec![Embed {
            title: "New Mystic!".to_string(),
            description,
            image: EmbedImage {
                url: format!("{}/{}", image_api_url, draft.item_id),
            },
            timestamp: Utc::now(),
        }],
    }
}

async fn enrich_and_deliver<S: AlertSink>(
    lookup: &PlayerLookup,
    sink: &S,
    draft: AlertDraft,
    player_page_url: &str,
    image_api_url: &str,
) {
    let label = match lookup.display_label(&draft.owner).await {
        Some(label) => label,
        None => draft.owner.clone(),
    };
    let alert = build_alert(draft, &label, player_page_url, image_api_url);
    if let Err(e) = sink.deliver(alert).await {
        log::warn!("alert delivery failed: {e:#}");
    }
}

/// Owns the feed connection lifecycle: connects, heartbeats, decodes frames,
/// consults the registry, and hands matching events to the delivery sink.
pub struct EventPipeline<S: AlertSink> {
    registry: FilterRegistry,
    lookup: Arc<PlayerLookup>,
    sink: Arc<S>,
}

impl<S: AlertSink + 'static> EventPipeline<S> {
    pub fn new(registry: FilterRegistry, lookup: PlayerLookup, sink: S) -> Self {
        EventPipeline {
            registry,
            lookup: Arc::new(lookup),
            sink: Arc::new(sink),
        }
    }

    /// Drive the connection state machine forever. Disconnects and handshake
    /// failures are recoverable: after the fixed delay the pipeline always
    /// tries to return to Connected.
    pub async fn run(&self) -> anyhow::Result<()> {
        let feed_url = self.registry.settings().feed_url.clone();
        let heartbeat_period = Duration::from_secs(self.registry.settings().heartbeat_secs);
        let reconnect_delay = Duration::from_secs(self.registry.settings().reconnect_secs);
        let mut state = ConnectionState::Disconnected;

        loop {
            transition(&mut state, ConnectionState::Connecting);
            match connect_async(feed_url.as_str()).await {
                Ok((socket, _)) => {
                    transition(&mut state, ConnectionState::Connected);
                    log::info!("connected to feed at {feed_url}");
                    match self.run_connection(socket, heartbeat_period).await {
                        Ok(()) => log::info!("feed connection closed"),
                        Err(e) => log::warn!("feed connection lost: {e:#}"),
                    }
                }
                Err(e) => log::warn!("feed handshake failed: {e}"),
            }
            // The heartbeat timer lives inside the connection scope, so it is
            // already gone by the time we are back here.
            transition(&mut state, ConnectionState::Disconnected);
            log::info!("reconnecting in {}s", reconnect_delay.as_secs());
            tokio::time::sleep(reconnect_delay).await;
        }
    }

    async fn run_connection(
        &self,
        mut socket: WsStream,
        heartbeat_period: Duration,
    ) -> anyhow::Result<()> {
        let mut heartbeat = tokio::time::interval(heartbeat_period);
        heartbeat.tick().await; // the zeroth tick completes immediately

        loop {
            tokio::select! {
                frame = socket.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
                _ = heartbeat.tick() => {
                    socket
                        .send(Message::Text(HEARTBEAT_FRAME.to_string()))
                        .await
                        .context("heartbeat send failed")?;
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let Some(event) = decode_frame(text) else {
            return;
        };
        if !self.registry.settings().enabled {
            return;
        }
        if let Some(draft) = self.evaluate(&event) {
            self.spawn_dispatch(draft);
        }
    }

    /// Per-event filter evaluation. Returns the alert draft when at least one
    /// filter passes; dispatch happens at most once per event no matter how
    /// many filters matched.
    pub fn evaluate(&self, event: &FeedEvent) -> Option<AlertDraft> {
        if event.tags.len() == 1 && event.tags[0] == OWNER_TRANSFER_TAG {
            return None;
        }

        let passes = self.registry.matching(&event.item);
        if passes.is_empty() {
            return None;
        }

        let mut content = self.registry.settings().alert.clone();
        for filter in &passes {
            if let Some(alert) = &filter.alert {
                content.push('\n');
                content.push_str(alert);
            }
        }

        Some(AlertDraft {
            content,
            owner: event.item.owner.clone(),
            tags: event.tags.clone(),
            passed: passes.iter().map(|f| f.name.clone()).collect(),
            item_id: event.item.id.clone(),
        })
    }

    /// Enrichment is the only suspend point, so it runs off the read loop.
    /// Alerts may therefore deliver out of arrival order; each event is still
    /// processed independently and exactly once.
    fn spawn_dispatch(&self, draft: AlertDraft) {
        let lookup = self.lookup.clone();
        let sink = self.sink.clone();
        let player_page_url = self.registry.settings().player_page_url.clone();
        let image_api_url = self.registry.settings().image_api_url.clone();
        tokio::spawn(async move {
            enrich_and_deliver(&lookup, &*sink, draft, &player_page_url, &image_api_url).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::reference::ReferenceIndex;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockSink {
        delivered: Mutex<Vec<Alert>>,
    }

    impl MockSink {
        fn new() -> Self {
            MockSink {
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    impl AlertSink for MockSink {
        async fn deliver(&self, alert: Alert) -> anyhow::Result<()> {
            self.delivered.lock().unwrap().push(alert);
            Ok(())
        }
    }

    fn index() -> ReferenceIndex {
        let mut map = HashMap::new();
        map.insert("billionaire".to_string(), vec!["damage".to_string()]);
        ReferenceIndex::from_enchant_classes(map)
    }

    fn pipeline(dir: &tempfile::TempDir, filters: &[(&str, Option<&str>)]) -> EventPipeline<MockSink> {
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.enabled = true;
        settings.filters.clear();
        settings.alert = "base alert".to_string();
        let mut registry = FilterRegistry::new(settings, &path, &index());
        for (name, alert) in filters {
            registry.add(name, &index()).unwrap();
            if let Some(text) = alert {
                registry.set_alert(name, Some(text.to_string())).unwrap();
            }
        }
        EventPipeline::new(
            registry,
            PlayerLookup::new("not a url").unwrap(),
            MockSink::new(),
        )
    }

    fn event_frame(tags: &[&str], tokens: i64) -> String {
        serde_json::json!({
            "tags": tags,
            "item": {
                "_id": "item-9",
                "enchants": [{"key": "billionaire", "level": 2}],
                "flags": ["gem"],
                "item": {"id": 283, "name": "Sword"},
                "lives": 3,
                "maxLives": 4,
                "tokens": tokens,
                "nonce": 6,
                "owner": "owner-uuid",
                "lastseen": ""
            }
        })
        .to_string()
    }

    #[test]
    fn heartbeat_sentinel_is_not_an_event() {
        assert!(decode_frame(HEARTBEAT_FRAME).is_none());
    }

    #[test]
    fn malformed_frames_drop_without_panicking() {
        assert!(decode_frame("{ truncated").is_none());
        assert!(decode_frame("[1, 2, 3]").is_none());
        assert!(decode_frame("").is_none());
    }

    #[test]
    fn data_frames_decode() {
        let event = decode_frame(&event_frame(&["new"], 5)).unwrap();
        assert_eq!(event.tags, vec!["new"]);
        assert_eq!(event.item.tokens, 5);
    }

    #[test]
    fn ownership_transfer_events_are_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = pipeline(&dir, &[("tokens0+", None)]);
        let event = decode_frame(&event_frame(&["owner"], 5)).unwrap();
        assert!(pipe.evaluate(&event).is_none());
    }

    #[test]
    fn owner_among_other_tags_still_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = pipeline(&dir, &[("tokens0+", None)]);
        let event = decode_frame(&event_frame(&["owner", "enchant"], 5)).unwrap();
        assert!(pipe.evaluate(&event).is_some());
    }

    #[test]
    fn zero_passing_filters_means_no_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = pipeline(&dir, &[("tokens100+", None)]);
        let event = decode_frame(&event_frame(&["new"], 5)).unwrap();
        assert!(pipe.evaluate(&event).is_none());
    }

    #[test]
    fn draft_lists_every_passing_filter() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = pipeline(
            &dir,
            &[("sword", Some("a sword!")), ("tokens5+", None), ("bow", None)],
        );
        let event = decode_frame(&event_frame(&["new"], 5)).unwrap();

        let draft = pipe.evaluate(&event).unwrap();
        assert_eq!(draft.passed, vec!["sword", "tokens5+"]);
        assert_eq!(draft.content, "base alert\na sword!");
        assert_eq!(draft.owner, "owner-uuid");
        assert_eq!(draft.item_id, "item-9");
    }

    #[tokio::test]
    async fn dispatches_exactly_once_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let pipe = pipeline(&dir, &[("sword", None), ("gem", None)]);
        let event = decode_frame(&event_frame(&["new"], 5)).unwrap();

        let draft = pipe.evaluate(&event).unwrap();
        enrich_and_deliver(
            &pipe.lookup,
            &*pipe.sink,
            draft,
            "https://example.invalid/players",
            "https://example.invalid/api/images/item",
        )
        .await;

        let delivered = pipe.sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        let description = &delivered[0].embeds[0].description;
        assert!(description.contains("`sword`, `gem`"));
        // Enrichment failed (invalid lookup URL), so the raw owner id shows.
        assert!(description.contains("[owner-uuid]"));
        assert!(description
            .contains("https://example.invalid/players/owner-uuid"));
    }

    #[tokio::test]
    async fn reconnects_after_disconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let server_count = connections.clone();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                server_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                ws.close(None).await.ok();
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.feed_url = format!("ws://{addr}");
        settings.reconnect_secs = 1;
        let registry = FilterRegistry::new(settings, &path, &index());
        let pipe = EventPipeline::new(
            registry,
            PlayerLookup::new("not a url").unwrap(),
            MockSink::new(),
        );

        // Two connections within the window: the initial one plus exactly one
        // reconnect after the fixed delay.
        let _ = tokio::time::timeout(Duration::from_millis(2500), pipe.run()).await;
        assert!(connections.load(std::sync::atomic::Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn emits_heartbeat_while_connected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_text() {
                    let _ = tx.send(msg.into_text().unwrap());
                    break;
                }
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.feed_url = format!("ws://{addr}");
        settings.heartbeat_secs = 1;
        let registry = FilterRegistry::new(settings, &path, &index());
        let pipe = EventPipeline::new(
            registry,
            PlayerLookup::new("not a url").unwrap(),
            MockSink::new(),
        );

        let first_outbound = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::select! {
                _ = pipe.run() => panic!("pipeline exited"),
                msg = rx => msg.unwrap(),
            }
        })
        .await
        .unwrap();
        assert_eq!(first_outbound, HEARTBEAT_FRAME);
    }

    #[test]
    fn alert_body_links_image_to_the_item() {
        let draft = AlertDraft {
            content: "c".to_string(),
            owner: "o".to_string(),
            tags: vec!["new".to_string()],
            passed: vec!["tokens0+".to_string()],
            item_id: "item-42".to_string(),
        };
        let alert = build_alert(draft, "Steve", "https://p.example/players", "https://p.example/img");
        assert_eq!(alert.embeds[0].image.url, "https://p.example/img/item-42");
        assert!(alert.embeds[0].description.contains("Owner: [Steve]"));
        assert!(alert.embeds[0].description.contains("Events: `new`"));
    }
}
