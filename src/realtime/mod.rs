//! Realtime channel client
//!
//! One Phoenix channel carries message inserts, receipt inserts and typing
//! presence. The connection runs on its own task and reconnects with
//! exponential backoff until the subscription is dropped.

pub mod frame;
pub mod presence;
pub mod socket;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::api::client::BackendClient;
use crate::config::Project;
use crate::models::TypingBeacon;
use crate::store::{FeedEvent, FeedSink, PresenceChannel, RealtimeFeed, Subscription};
use frame::{Frame, Inbound};
use presence::PresenceTracker;
use socket::RealtimeSocket;

pub const CHANNEL_TOPIC: &str = "realtime:gaivota-chat";

const HEARTBEAT: Duration = Duration::from_secs(30);
const STABLE_AFTER: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SECS: u64 = 64;

/// `wss://<host>/realtime/v1/websocket?apikey=<key>&vsn=1.0.0`
pub fn websocket_url(project: &Project) -> Result<String> {
    let mut url = url::Url::parse(&project.url).context("Invalid project URL")?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => bail!("Unsupported project URL scheme: {}", other),
    };
    if url.set_scheme(scheme).is_err() {
        bail!("Cannot derive WebSocket URL from {}", project.url);
    }
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", &project.anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url.to_string())
}

/// Presence handle bound to a live subscription.
struct RealtimePresence {
    tracks: mpsc::UnboundedSender<TypingBeacon>,
}

#[async_trait]
impl PresenceChannel for RealtimePresence {
    async fn track(&self, beacon: &TypingBeacon) -> Result<()> {
        if self.tracks.send(beacon.clone()).is_err() {
            bail!("Realtime channel is closed");
        }
        Ok(())
    }
}

impl RealtimeFeed for BackendClient {
    fn subscribe(&self, sink: FeedSink) -> Subscription {
        let (tracks_tx, tracks_rx) = mpsc::unbounded_channel();
        let presence = Arc::new(RealtimePresence { tracks: tracks_tx });

        let client = self.clone();
        let task = tokio::spawn(async move {
            match websocket_url(client.project()) {
                Ok(ws_url) => run(client, ws_url, sink, tracks_rx).await,
                Err(e) => tracing::error!("Realtime disabled: {:#}", e),
            }
        });

        Subscription::new(presence, task)
    }
}

/// How a connected session ended.
enum SessionEnd {
    /// The subscriber went away. Do not reconnect.
    Shutdown,
    /// Error or server-initiated close. Should reconnect.
    Dropped(anyhow::Error),
}

/// Connection loop with automatic reconnection.
///
/// Backoff doubles from 1s up to 64s and resets once a session has stayed
/// up for a minute. Every attempt asks the client for its token, so an
/// expired session is refreshed before rejoining.
async fn run(
    client: BackendClient,
    ws_url: String,
    sink: FeedSink,
    mut tracks: mpsc::UnboundedReceiver<TypingBeacon>,
) {
    let mut backoff = 1u64;
    let mut last_beacon: Option<TypingBeacon> = None;

    loop {
        let started = Instant::now();
        let session = run_session(&client, &ws_url, &sink, &mut tracks, &mut last_beacon);
        let error = match session.await {
            Ok(SessionEnd::Shutdown) => {
                tracing::debug!("Realtime subscription released");
                return;
            }
            Ok(SessionEnd::Dropped(e)) | Err(e) => e,
        };

        if started.elapsed() >= STABLE_AFTER {
            backoff = 1;
        }
        tracing::warn!(
            "Realtime disconnected: {:#}. Reconnecting in {}s...",
            error,
            backoff
        );

        tokio::select! {
            _ = time::sleep(Duration::from_secs(backoff)) => {}
            _ = sink.closed() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
    }
}

/// One connected session: join, then pump frames, heartbeats and tracks.
async fn run_session(
    client: &BackendClient,
    ws_url: &str,
    sink: &FeedSink,
    tracks: &mut mpsc::UnboundedReceiver<TypingBeacon>,
    last_beacon: &mut Option<TypingBeacon>,
) -> Result<SessionEnd> {
    let mut token = client.access_token().await?;
    let mut ws = RealtimeSocket::connect(ws_url).await?;
    let mut refs = 0u64;
    let mut next_ref = move || {
        refs += 1;
        refs.to_string()
    };

    let join_ref = next_ref();
    ws.send_frame(&Frame::join(
        CHANNEL_TOPIC,
        &join_ref,
        client.user_id(),
        &token,
    ))
    .await?;

    let mut joined = false;
    let mut tracker = PresenceTracker::default();
    let mut heartbeat = time::interval(HEARTBEAT);
    heartbeat.tick().await; // skip first immediate tick

    let end = loop {
        tokio::select! {
            frame = ws.recv_frame() => {
                let frame = match frame {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break SessionEnd::Dropped(anyhow::anyhow!("WebSocket closed by server")),
                    Err(e) => break SessionEnd::Dropped(e),
                };
                if frame.topic != CHANNEL_TOPIC && frame.topic != "phoenix" {
                    continue;
                }
                let inbound = match Inbound::from_frame(frame) {
                    Ok(inbound) => inbound,
                    Err(e) => {
                        tracing::warn!("Ignoring realtime frame: {:#}", e);
                        continue;
                    }
                };
                match inbound {
                    Inbound::Reply { reference, ok, response } if reference.as_deref() == Some(join_ref.as_str()) => {
                        if !ok {
                            break SessionEnd::Dropped(anyhow::anyhow!("Channel join rejected: {}", response));
                        }
                        tracing::info!("Joined {}", CHANNEL_TOPIC);
                        joined = true;
                        if let Some(beacon) = last_beacon.as_ref() {
                            ws.send_frame(&Frame::track(CHANNEL_TOPIC, &next_ref(), beacon)).await?;
                        }
                    }
                    Inbound::Reply { ok: false, response, .. } => {
                        tracing::warn!("Realtime request failed: {}", response);
                    }
                    Inbound::Reply { .. } | Inbound::Other => {}
                    Inbound::Insert(event) => {
                        if sink.send(event).is_err() {
                            break SessionEnd::Shutdown;
                        }
                    }
                    Inbound::PresenceState(state) => {
                        tracker.apply_state(state);
                        if sink.send(FeedEvent::PresenceSynced(tracker.snapshot())).is_err() {
                            break SessionEnd::Shutdown;
                        }
                    }
                    Inbound::PresenceDiff(diff) => {
                        tracker.apply_diff(diff);
                        if sink.send(FeedEvent::PresenceSynced(tracker.snapshot())).is_err() {
                            break SessionEnd::Shutdown;
                        }
                    }
                    Inbound::ChannelClosed(reason) => {
                        break SessionEnd::Dropped(anyhow::anyhow!("Channel {}", reason));
                    }
                }
            }
            beacon = tracks.recv() => {
                let Some(beacon) = beacon else {
                    break SessionEnd::Shutdown;
                };
                if joined {
                    ws.send_frame(&Frame::track(CHANNEL_TOPIC, &next_ref(), &beacon)).await?;
                }
                *last_beacon = Some(beacon);
            }
            _ = heartbeat.tick() => {
                if let Err(e) = ws.send_frame(&Frame::heartbeat(&next_ref())).await {
                    break SessionEnd::Dropped(e.context("Heartbeat send failed"));
                }
                // The server closes the channel once the joined token expires.
                match client.access_token().await {
                    Ok(fresh) if fresh != token => {
                        if joined {
                            ws.send_frame(&Frame::access_token(CHANNEL_TOPIC, &next_ref(), &fresh)).await?;
                            tracing::debug!("Pushed refreshed token to {}", CHANNEL_TOPIC);
                        }
                        token = fresh;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Realtime token refresh failed: {:#}", e),
                }
            }
            _ = sink.closed() => {
                break SessionEnd::Shutdown;
            }
        }
    };

    if matches!(end, SessionEnd::Shutdown) && joined {
        if let Err(e) = ws.send_frame(&Frame::leave(CHANNEL_TOPIC, &next_ref())).await {
            tracing::debug!("Leave failed: {:#}", e);
        }
    }
    ws.close().await;
    Ok(end)
}
