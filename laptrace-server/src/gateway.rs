//! Broadcast gateway - turns play-head changes into `update` messages for
//! every connected viewer.
//!
//! The gateway listens to the engine's frame-ready events, renders one frame
//! per event on the blocking pool, serializes the message once and fans the
//! shared text out to all viewers. When rendering falls behind, queued events
//! are coalesced and only the newest position is rendered.
//!
//! A new viewer subscribes to the fan-out before it reads the engine
//! snapshot, so it cannot miss a change; frames older than its snapshot are
//! dropped by revision.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::Utf8Bytes;
use log::{debug, info, trace, warn};
use miette::Result;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio_graceful_shutdown::SubsystemHandle;

use laptrace_core::{FrameRenderer, RenderError};

use crate::engine::{FrameReady, PlaybackEngine};
use crate::protocol::{ClientMessage, ServerMessage, SET_POSITION};

// Each update carries two encoded images; keep few in flight per viewer
const UPDATE_CAPACITY: usize = 4;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Cannot render frame: {0}")]
    Render(#[from] RenderError),
    #[error("Cannot encode update: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// One serialized `update` message, shared by all viewers
#[derive(Debug)]
pub struct Frame {
    pub index: usize,
    pub revision: u64,
    pub text: Utf8Bytes,
}

struct GatewayInner {
    engine: PlaybackEngine,
    renderer: Arc<FrameRenderer>,
    update_tx: broadcast::Sender<Arc<Frame>>,
    next_viewer: AtomicU64,
}

#[derive(Clone)]
pub struct BroadcastGateway {
    inner: Arc<GatewayInner>,
}

/// Per-connection delivery handle
pub struct ViewerSession {
    id: u64,
    updates: broadcast::Receiver<Arc<Frame>>,
    last_revision: u64,
}

impl ViewerSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next frame newer than anything this viewer has seen.
    ///
    /// Returns None once the gateway is gone. Cancel safe.
    pub async fn next_update(&mut self) -> Option<Arc<Frame>> {
        loop {
            match self.updates.recv().await {
                Ok(frame) => {
                    if frame.revision > self.last_revision {
                        self.last_revision = frame.revision;
                        return Some(frame);
                    }
                    trace!(
                        "Viewer {} drops stale frame revision {}",
                        self.id,
                        frame.revision
                    );
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("Viewer {} lagged, skipped {} updates", self.id, n);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl BroadcastGateway {
    pub fn new(engine: PlaybackEngine, renderer: Arc<FrameRenderer>) -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            inner: Arc::new(GatewayInner {
                engine,
                renderer,
                update_tx,
                next_viewer: AtomicU64::new(1),
            }),
        }
    }

    pub fn engine(&self) -> &PlaybackEngine {
        &self.inner.engine
    }

    /// Number of connected viewers
    pub fn viewer_count(&self) -> usize {
        self.inner.update_tx.receiver_count()
    }

    /// Render and serialize the frame for one play-head position
    pub async fn render(&self, event: FrameReady) -> Result<Arc<Frame>, GatewayError> {
        let renderer = self.inner.renderer.clone();
        let max_index = self.inner.engine.max_index();

        let frame = tokio::task::spawn_blocking(move || -> Result<Frame, GatewayError> {
            let rendered = renderer.render(event.index)?;
            let text = serde_json::to_string(&ServerMessage::update(&rendered, max_index))?;
            Ok(Frame {
                index: event.index,
                revision: event.revision,
                text: text.into(),
            })
        })
        .await??;

        Ok(Arc::new(frame))
    }

    /// Register a viewer.
    ///
    /// Starts playback if nobody has yet and returns the frame for the
    /// current position, which the caller sends before anything else.
    pub async fn connect(&self) -> Result<(ViewerSession, Arc<Frame>), GatewayError> {
        if self.inner.engine.start() {
            debug!("Playback started by first viewer");
        }

        let updates = self.inner.update_tx.subscribe();
        let snapshot = self.inner.engine.snapshot();
        let initial = self.render(snapshot).await?;

        let session = ViewerSession {
            id: self.inner.next_viewer.fetch_add(1, Ordering::Relaxed),
            updates,
            last_revision: snapshot.revision,
        };
        info!(
            "Viewer {} connected at index {} ({} viewers)",
            session.id,
            snapshot.index,
            self.viewer_count()
        );
        Ok((session, initial))
    }

    pub fn disconnect(&self, session: ViewerSession) {
        let id = session.id;
        drop(session);
        info!(
            "Viewer {} disconnected ({} viewers)",
            id,
            self.viewer_count()
        );
    }

    /// Handle a text message from a viewer.
    ///
    /// Returns a reply for that viewer alone. Accepted seeks reach every
    /// viewer, the requester included, through the normal update stream.
    pub fn handle_text(&self, session: &ViewerSession, text: &str) -> Option<ServerMessage> {
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!("Viewer {} sent malformed JSON: {}", session.id, e);
                return None;
            }
        };
        let event = value
            .get("event")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let message: ClientMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) if event.as_deref() == Some(SET_POSITION) => {
                warn!("Viewer {} sent malformed seek: {}", session.id, e);
                return Some(ServerMessage::error(format!("Malformed set_position: {}", e)));
            }
            Err(e) => {
                warn!("Viewer {} sent unsupported message: {}", session.id, e);
                return None;
            }
        };

        match message {
            ClientMessage::SetPosition(request) => {
                match self.inner.engine.seek(&request.index) {
                    Ok(event) => {
                        debug!(
                            "Viewer {} moved play-head to {}",
                            session.id, event.index
                        );
                        None
                    }
                    Err(e) => {
                        warn!("Viewer {} rejected seek: {}", session.id, e);
                        Some(ServerMessage::error(e.to_string()))
                    }
                }
            }
        }
    }

    /// The render and fan-out loop, running until `shutdown` completes.
    ///
    /// Subscribes to the engine before returning, so events emitted after
    /// this call are never missed.
    pub fn broadcast_until<F>(self, shutdown: F) -> impl Future<Output = ()>
    where
        F: Future<Output = ()>,
    {
        let mut events = self.inner.engine.subscribe();

        async move {
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        debug!("Broadcast loop stopped");
                        break;
                    },
                    r = events.recv() => match r {
                        Ok(event) => {
                            let event = coalesce(event, &mut events);
                            self.publish(event).await;
                        },
                        Err(RecvError::Lagged(n)) => {
                            warn!("Broadcast loop lagged, skipped {} frame events", n);
                        },
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn publish(&self, event: FrameReady) {
        if self.superseded(event) {
            return;
        }
        let started = Instant::now();
        match self.render(event).await {
            Ok(frame) => {
                let elapsed = started.elapsed();
                if elapsed > self.inner.engine.period() {
                    warn!(
                        "Rendering index {} took {}ms, longer than a tick",
                        event.index,
                        elapsed.as_millis()
                    );
                }
                // A seek landed while rendering; its own frame follows
                if self.superseded(event) {
                    return;
                }
                // No viewers is not an error
                let viewers = self.inner.update_tx.send(frame).unwrap_or(0);
                trace!(
                    "Sent index {} ({:?}) to {} viewers",
                    event.index,
                    event.cause,
                    viewers
                );
            }
            Err(e) => warn!("Skipping frame for index {}: {}", event.index, e),
        }
    }

    // Frames older than the latest seek would show a position viewers left
    fn superseded(&self, event: FrameReady) -> bool {
        let last_seek = self.inner.engine.last_seek_revision();
        if event.revision < last_seek {
            debug!(
                "Dropping frame for index {} (revision {}), seek at revision {}",
                event.index, event.revision, last_seek
            );
            return true;
        }
        false
    }

    /// Subsystem entry point
    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        self.broadcast_until(subsys.on_shutdown_requested()).await;
        Ok(())
    }
}

/// Drain whatever is queued and keep only the newest event
fn coalesce(mut event: FrameReady, events: &mut broadcast::Receiver<FrameReady>) -> FrameReady {
    let mut skipped = 0u64;
    loop {
        match events.try_recv() {
            Ok(next) => {
                skipped += 1;
                event = next;
            }
            Err(TryRecvError::Lagged(n)) => skipped += n,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
    if skipped > 0 {
        debug!(
            "Coalesced {} frame events, rendering index {}",
            skipped, event.index
        );
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FrameCause;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use laptrace_core::lap::{LapSource, SyntheticLap};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    // Long enough that the loop never ticks during a test
    const IDLE_PERIOD: Duration = Duration::from_secs(3600);
    const WAIT: Duration = Duration::from_secs(10);

    fn gateway(samples: usize) -> BroadcastGateway {
        let lap = Arc::new(SyntheticLap::new(samples).load().unwrap());
        let engine = PlaybackEngine::new(lap.len(), IDLE_PERIOD).unwrap();
        BroadcastGateway::new(engine, Arc::new(FrameRenderer::new(lap)))
    }

    fn spawn_loop(gateway: &BroadcastGateway) -> CancellationToken {
        let token = CancellationToken::new();
        tokio::spawn(gateway.clone().broadcast_until(token.clone().cancelled_owned()));
        token
    }

    fn decode(frame: &Frame) -> (usize, usize, Vec<u8>, Vec<u8>) {
        match serde_json::from_str::<ServerMessage>(frame.text.as_str()).unwrap() {
            ServerMessage::Update(u) => (
                u.index,
                u.max_index,
                STANDARD.decode(u.telemetry_image).unwrap(),
                STANDARD.decode(u.track_image).unwrap(),
            ),
            other => panic!("expected update, got {:?}", other),
        }
    }

    async fn next(session: &mut ViewerSession) -> Arc<Frame> {
        tokio::time::timeout(WAIT, session.next_update())
            .await
            .expect("no update in time")
            .expect("gateway closed")
    }

    #[tokio::test]
    async fn test_connect_sends_current_position() {
        let gateway = gateway(20);
        gateway.engine().seek_to(7);

        let (session, initial) = gateway.connect().await.unwrap();
        assert!(gateway.engine().is_started());
        assert_eq!(initial.index, 7);
        assert_eq!(session.last_revision, initial.revision);

        let (index, max_index, telemetry, track) = decode(&initial);
        assert_eq!(index, 7);
        assert_eq!(max_index, 19);
        assert!(telemetry.starts_with(b"\x89PNG"));
        assert!(track.starts_with(b"\x89PNG"));
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_images_belong_to_one_index() {
        let gateway = gateway(30);
        let frame = gateway
            .render(FrameReady {
                index: 12,
                revision: 1,
                cause: FrameCause::Seek,
            })
            .await
            .unwrap();

        let (_, _, telemetry, track) = decode(&frame);
        let expected = gateway.inner.renderer.render(12).unwrap();
        assert_eq!(telemetry, expected.telemetry_png);
        assert_eq!(track, expected.track_png);
    }

    #[tokio::test]
    async fn test_seek_reaches_every_viewer() {
        let gateway = gateway(20);
        let token = spawn_loop(&gateway);

        let (mut a, _) = gateway.connect().await.unwrap();
        let (mut b, _) = gateway.connect().await.unwrap();
        assert_eq!(gateway.viewer_count(), 2);

        let reply = gateway.handle_text(&a, r#"{"event":"set_position","data":{"index":2}}"#);
        assert!(reply.is_none());

        assert_eq!(next(&mut a).await.index, 2);
        assert_eq!(next(&mut b).await.index, 2);
        assert_eq!(gateway.engine().index(), 2);

        token.cancel();
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_clamped_seek_from_viewer() {
        let gateway = gateway(5);
        let token = spawn_loop(&gateway);
        let (mut viewer, _) = gateway.connect().await.unwrap();

        for _ in 0..3 {
            gateway.engine().tick();
        }
        assert_eq!(gateway.engine().index(), 3);

        gateway.handle_text(&viewer, r#"{"event":"set_position","data":{"index":10}}"#);

        // Tick frames may be coalesced; the last one delivered is the seek
        let mut frame = next(&mut viewer).await;
        while frame.index != 4 {
            frame = next(&mut viewer).await;
        }
        let (index, max_index, _, _) = decode(&frame);
        assert_eq!((index, max_index), (4, 4));

        token.cancel();
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_invalid_seek_replies_only_to_requester() {
        let gateway = gateway(10);
        let (viewer, _) = gateway.connect().await.unwrap();
        gateway.engine().seek_to(6);
        let mut events = gateway.engine().subscribe();

        let reply = gateway.handle_text(&viewer, r#"{"event":"set_position","data":{"index":"abc"}}"#);
        assert!(matches!(reply, Some(ServerMessage::Error(_))));
        let reply = gateway.handle_text(&viewer, r#"{"event":"set_position","data":{}}"#);
        assert!(matches!(reply, Some(ServerMessage::Error(_))));

        assert_eq!(gateway.engine().index(), 6);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_unknown_messages_are_dropped() {
        let gateway = gateway(10);
        let (viewer, _) = gateway.connect().await.unwrap();

        assert!(gateway.handle_text(&viewer, "hello").is_none());
        assert!(gateway
            .handle_text(&viewer, r#"{"event":"pause","data":{}}"#)
            .is_none());
        assert_eq!(gateway.engine().index(), 0);
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_stale_frames_are_dropped() {
        let gateway = gateway(10);
        let (mut viewer, initial) = gateway.connect().await.unwrap();

        let stale = Arc::new(Frame {
            index: 0,
            revision: initial.revision,
            text: "stale".into(),
        });
        let fresh = Arc::new(Frame {
            index: 1,
            revision: initial.revision + 1,
            text: "fresh".into(),
        });
        gateway.inner.update_tx.send(stale).unwrap();
        gateway.inner.update_tx.send(fresh).unwrap();

        assert_eq!(next(&mut viewer).await.text.as_str(), "fresh");
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_disconnect_releases_viewer() {
        let gateway = gateway(10);
        let (a, _) = gateway.connect().await.unwrap();
        let (b, _) = gateway.connect().await.unwrap();
        assert_ne!(a.id(), b.id());

        gateway.disconnect(a);
        assert_eq!(gateway.viewer_count(), 1);

        // Playback carries on without viewers
        gateway.disconnect(b);
        assert_eq!(gateway.viewer_count(), 0);
        assert_eq!(gateway.engine().tick().index, 1);
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_malformed_seek_replies_with_error() {
        let gateway = gateway(10);
        let (viewer, _) = gateway.connect().await.unwrap();
        gateway.engine().seek_to(3);
        let mut events = gateway.engine().subscribe();

        for text in [
            r#"{"event":"set_position","data":7}"#,
            r#"{"event":"set_position"}"#,
            r#"{"event":"set_position","data":"7"}"#,
        ] {
            match gateway.handle_text(&viewer, text) {
                Some(ServerMessage::Error(e)) => assert!(e.message.contains("set_position")),
                other => panic!("expected error reply for {}, got {:?}", text, other),
            }
        }

        assert_eq!(gateway.engine().index(), 3);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_failed_render_skips_one_frame() {
        let gateway = gateway(10);
        let (mut viewer, initial) = gateway.connect().await.unwrap();

        gateway
            .publish(FrameReady {
                index: 99,
                revision: initial.revision + 1,
                cause: FrameCause::Tick,
            })
            .await;
        assert!(matches!(viewer.updates.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(gateway.engine().index(), 0);

        gateway
            .publish(FrameReady {
                index: 3,
                revision: initial.revision + 2,
                cause: FrameCause::Tick,
            })
            .await;
        let frame = next(&mut viewer).await;
        assert_eq!(frame.index, 3);
        assert_eq!(frame.revision, initial.revision + 2);
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_connect_does_not_rebroadcast() {
        let gateway = gateway(10);
        let token = spawn_loop(&gateway);
        let (mut first, _) = gateway.connect().await.unwrap();
        let mut events = gateway.engine().subscribe();

        let (_second, initial) = gateway.connect().await.unwrap();
        assert_eq!(initial.index, 0);

        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        assert!(
            tokio::time::timeout(Duration::from_millis(200), first.next_update())
                .await
                .is_err()
        );

        token.cancel();
        gateway.engine().shutdown();
    }

    #[tokio::test]
    async fn test_frame_older_than_seek_is_dropped() {
        let gateway = gateway(10);
        let (mut viewer, _) = gateway.connect().await.unwrap();

        let tick = gateway.engine().tick();
        let seek = gateway.engine().seek_to(6);

        // The tick frame was in flight when the seek landed
        gateway.publish(tick).await;
        assert!(matches!(viewer.updates.try_recv(), Err(TryRecvError::Empty)));

        gateway.publish(seek).await;
        assert_eq!(next(&mut viewer).await.index, 6);

        // Ticks after the seek flow normally
        let later = gateway.engine().tick();
        gateway.publish(later).await;
        assert_eq!(next(&mut viewer).await.index, 7);
        gateway.engine().shutdown();
    }

    #[test]
    fn test_coalesce_keeps_newest() {
        let engine = PlaybackEngine::new(10, IDLE_PERIOD).unwrap();
        let mut events = engine.subscribe();
        let first = engine.tick();
        engine.tick();
        let last = engine.seek_to(8);

        let first_received = events.try_recv().unwrap();
        assert_eq!(first_received, first);
        assert_eq!(coalesce(first_received, &mut events), last);
    }
}
