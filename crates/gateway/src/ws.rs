//! WebSocket hub: per-connection fan-out with bounded queues.
//!
//! Flow:
//! 1. Client connects to `/api/ws` (the auth gate already ran).
//! 2. Client sends a JSON `subscribe` frame `{debate_id?, types?, cursor?}`.
//! 3. Hub replies with a `sync` snapshot (durable events after the cursor),
//!    then live events matching the subscription.
//!
//! Each connection owns a bounded outbound queue drained by its writer.
//! Back-pressure never reaches the orchestrator: when a queue fills, the
//! hub either coalesces adjacent `token_delta` events of the same agent
//! turn or drops the connection with a final `error:slow_consumer`,
//! according to the policy fixed at construction. A missed pong beyond the
//! configured window terminates the connection; it never cancels a debate.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{broadcast, oneshot, Notify};

use ag_domain::config::WsOverflowPolicy;
use ag_domain::event::{Event, EventPayload};
use ag_engine::bus::EventFilter;

use crate::api::debates::parse_kinds;
use crate::metrics::Metrics;
use crate::state::AppState;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscribe frame
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct SubscribeFrame {
    /// Restrict to one debate (by id or slug).
    pub debate_id: Option<String>,
    /// Restrict to an event-type set (snake_case names).
    pub types: Option<Vec<String>>,
    /// Resume after this durable sequence number.
    pub cursor: Option<u64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    Coalesced,
    Overflow,
}

/// Bounded per-connection event queue with the hub's overflow policy.
pub(crate) struct OutboundQueue {
    inner: Mutex<VecDeque<Arc<Event>>>,
    capacity: usize,
    policy: WsOverflowPolicy,
    notify: Notify,
}

impl OutboundQueue {
    pub(crate) fn new(capacity: usize, policy: WsOverflowPolicy) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            policy,
            notify: Notify::new(),
        }
    }

    pub(crate) fn push(&self, event: Arc<Event>) -> PushOutcome {
        let mut queue = self.inner.lock();
        if queue.len() < self.capacity {
            queue.push_back(event);
            drop(queue);
            self.notify.notify_one();
            return PushOutcome::Queued;
        }

        if self.policy == WsOverflowPolicy::Coalesce {
            if let Some(back) = queue.back() {
                if let (
                    EventPayload::TokenDelta { text: prev },
                    EventPayload::TokenDelta { text: next },
                ) = (&back.payload, &event.payload)
                {
                    let same_turn = back.debate_id == event.debate_id
                        && back.agent == event.agent
                        && back.round == event.round;
                    if same_turn {
                        let mut merged = (**back).clone();
                        merged.seq = event.seq;
                        merged.ts = event.ts;
                        merged.payload = EventPayload::TokenDelta {
                            text: format!("{prev}{next}"),
                        };
                        *queue.back_mut().unwrap() = Arc::new(merged);
                        drop(queue);
                        self.notify.notify_one();
                        return PushOutcome::Coalesced;
                    }
                }
            }
        }

        PushOutcome::Overflow
    }

    pub(crate) async fn pop(&self) -> Arc<Event> {
        loop {
            if let Some(event) = self.inner.lock().pop_front() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /api/ws — upgrade to WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let max_frame = state.config.server.ws.max_frame_bytes;
    ws.max_frame_size(max_frame)
        .max_message_size(max_frame)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    state.metrics.ws_connections.fetch_add(1, Ordering::Relaxed);
    let result = drive_socket(socket, &state).await;
    state.metrics.ws_connections.fetch_sub(1, Ordering::Relaxed);
    if let Err(reason) = result {
        tracing::debug!(reason, "subscriber connection closed");
    }
}

async fn drive_socket(socket: WebSocket, state: &AppState) -> Result<(), &'static str> {
    let ws_cfg = state.config.server.ws.clone();
    let (mut sink, mut stream) = socket.split();

    // 1. Subscribe frame.
    let sub = match wait_for_subscribe(&mut stream).await {
        Some(frame) => frame,
        None => return Err("no subscribe frame"),
    };

    // Accept a slug where an id is expected.
    let debate_id = match &sub.debate_id {
        Some(key) => match state.store.get_debate(key) {
            Ok(Some(debate)) => Some(debate.debate_id),
            _ => Some(key.clone()),
        },
        None => None,
    };
    let filter = EventFilter {
        debate_id,
        kinds: sub.types.as_deref().map(|t| parse_kinds(t)),
    };

    // 2. Subscribe to live events before building the snapshot so nothing
    //    falls between replay and the live stream; the sequence cursor
    //    deduplicates the overlap.
    let rx = state.bus.subscribe();

    // 3. Sync snapshot. Unscoped subscriptions with no cursor start live
    //    only; everything else replays the durable log.
    let replayed = if filter.debate_id.is_some() || sub.cursor.is_some() {
        state
            .bus
            .replay(&filter, sub.cursor, ws_cfg.sync_limit)
            .unwrap_or_default()
    } else {
        Vec::new()
    };
    let last_seq = replayed
        .last()
        .map(|e| e.seq)
        .unwrap_or(sub.cursor.unwrap_or(0));
    let debate = filter
        .debate_id
        .as_ref()
        .and_then(|id| state.store.get_debate(id).ok().flatten());

    let mut sync = Event::new(EventPayload::Sync {
        debate: debate.map(Box::new),
        events: replayed,
    });
    sync.seq = last_seq;
    sync.debate_id = filter.debate_id.clone();
    if send_event(&mut sink, &sync).await.is_err() {
        return Err("sync send failed");
    }

    // 4. Forwarding task feeds the bounded queue; the writer drains it.
    let queue = Arc::new(OutboundQueue::new(ws_cfg.outbound_queue, ws_cfg.overflow));
    let (overflow_tx, mut overflow_rx) = oneshot::channel::<&'static str>();
    let forward = tokio::spawn(forward_events(
        rx,
        filter,
        queue.clone(),
        last_seq,
        overflow_tx,
        state.metrics.clone(),
    ));

    // 5. Writer + heartbeat + inbound loop.
    let mut ping = tokio::time::interval(Duration::from_secs(ws_cfg.ping_interval_secs.max(1)));
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let pong_timeout = Duration::from_secs(ws_cfg.pong_timeout_secs.max(1));
    let mut last_pong = Instant::now();

    let outcome = loop {
        tokio::select! {
            event = queue.pop() => {
                if send_event(&mut sink, &event).await.is_err() {
                    break Err("send failed");
                }
            }
            reason = &mut overflow_rx => {
                match reason {
                    Ok(reason) => {
                        Metrics::incr(&state.metrics.ws_slow_drops);
                        let goodbye = Event::new(EventPayload::Error {
                            code: "slow_consumer".into(),
                            message: reason.to_string(),
                        });
                        let _ = send_event(&mut sink, &goodbye).await;
                        break Err("slow consumer");
                    }
                    Err(_) => break Ok(()),
                }
            }
            _ = ping.tick() => {
                if last_pong.elapsed() > pong_timeout {
                    break Err("pong timeout");
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break Err("ping failed");
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Close(_))) | None => break Ok(()),
                    Some(Ok(_)) => {
                        // Only one subscription per connection; later frames
                        // are ignored.
                    }
                    Some(Err(_)) => break Err("read error"),
                }
            }
        }
    };

    forward.abort();
    let _ = sink.close().await;
    outcome
}

async fn forward_events(
    mut rx: broadcast::Receiver<Arc<Event>>,
    filter: EventFilter,
    queue: Arc<OutboundQueue>,
    mut last_seq: u64,
    overflow_tx: oneshot::Sender<&'static str>,
    metrics: Arc<Metrics>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if event.seq <= last_seq || !filter.matches(&event) {
                    continue;
                }
                last_seq = event.seq;
                match queue.push(event) {
                    PushOutcome::Queued => {}
                    PushOutcome::Coalesced => {
                        Metrics::incr(&metrics.ws_coalesced);
                    }
                    PushOutcome::Overflow => {
                        let _ = overflow_tx.send("outbound queue overflow");
                        return;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // Falling behind the bus ring is the same offence as a full
                // queue: the viewer is too slow.
                tracing::debug!(missed, "subscriber lagged the event bus");
                let _ = overflow_tx.send("subscriber lagged the event bus");
                return;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn wait_for_subscribe(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<SubscribeFrame> {
    tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => {
                    match serde_json::from_str::<SubscribeFrame>(&text) {
                        Ok(frame) => return Some(frame),
                        Err(e) => {
                            tracing::debug!(error = %e, "ignoring unparseable subscribe frame");
                        }
                    }
                }
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    })
    .await
    .unwrap_or(None)
}

async fn send_event(
    sink: &mut (impl SinkExt<Message> + Unpin),
    event: &Event,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(seq: u64, agent: &str, text: &str) -> Arc<Event> {
        let mut e = Event::new(EventPayload::TokenDelta { text: text.into() })
            .for_debate("d1")
            .from_agent(agent)
            .in_round(1);
        e.seq = seq;
        Arc::new(e)
    }

    #[test]
    fn queue_accepts_until_capacity() {
        let q = OutboundQueue::new(2, WsOverflowPolicy::DropSlow);
        assert_eq!(q.push(delta(1, "a", "x")), PushOutcome::Queued);
        assert_eq!(q.push(delta(2, "a", "y")), PushOutcome::Queued);
        assert_eq!(q.push(delta(3, "a", "z")), PushOutcome::Overflow);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn coalesce_merges_adjacent_deltas_of_same_turn() {
        let q = OutboundQueue::new(2, WsOverflowPolicy::Coalesce);
        q.push(delta(1, "a", "hel"));
        q.push(delta(2, "a", "lo "));
        assert_eq!(q.push(delta(3, "a", "world")), PushOutcome::Coalesced);
        assert_eq!(q.len(), 2);

        let back = q.inner.lock().back().cloned().unwrap();
        match &back.payload {
            EventPayload::TokenDelta { text } => assert_eq!(text, "lo world"),
            _ => unreachable!(),
        }
        assert_eq!(back.seq, 3);
    }

    #[test]
    fn coalesce_refuses_across_agents() {
        let q = OutboundQueue::new(1, WsOverflowPolicy::Coalesce);
        q.push(delta(1, "a", "x"));
        assert_eq!(q.push(delta(2, "b", "y")), PushOutcome::Overflow);
    }

    #[test]
    fn coalesce_refuses_non_delta_events() {
        let q = OutboundQueue::new(1, WsOverflowPolicy::Coalesce);
        q.push(delta(1, "a", "x"));
        let mut end = Event::new(EventPayload::TokenEnd {
            partial: false,
            tokens: 3,
        })
        .for_debate("d1")
        .from_agent("a");
        end.seq = 2;
        assert_eq!(q.push(Arc::new(end)), PushOutcome::Overflow);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let q = Arc::new(OutboundQueue::new(4, WsOverflowPolicy::DropSlow));
        let q2 = q.clone();
        let popper = tokio::spawn(async move { q2.pop().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(delta(1, "a", "x"));
        let event = popper.await.unwrap();
        assert_eq!(event.seq, 1);
    }

    #[test]
    fn subscribe_frame_parses() {
        let frame: SubscribeFrame =
            serde_json::from_str(r#"{"debate_id":"d1","types":["token_delta"],"cursor":7}"#)
                .unwrap();
        assert_eq!(frame.debate_id.as_deref(), Some("d1"));
        assert_eq!(frame.cursor, Some(7));
        let kinds = parse_kinds(frame.types.as_deref().unwrap());
        assert!(kinds.contains(&ag_domain::event::EventKind::TokenDelta));

        let empty: SubscribeFrame = serde_json::from_str("{}").unwrap();
        assert!(empty.debate_id.is_none());
    }
}
