//! Playback engine - owns the shared play-head and advances it on a timer.
//!
//! There is exactly one engine per process. Its index is mutated only by
//! [`PlaybackEngine::tick`] and [`PlaybackEngine::seek`], both under the same
//! lock, and every mutation emits a [`FrameReady`] event while that lock is
//! still held so subscribers see events in mutation order.
//!
//! The autonomous loop is started once; further [`PlaybackEngine::start`]
//! calls are no-ops, so the advance rate never doubles.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, trace};
use miette::Result;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;
use tokio_util::sync::CancellationToken;

use laptrace_core::{parse_seek_index, LapError, PlayHead, SeekError};

pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(500);

// Frame-ready events are tiny; the gateway coalesces anything it falls behind on
const FRAME_EVENT_CAPACITY: usize = 64;

/// What moved the play-head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCause {
    Tick,
    Seek,
    /// Not emitted; the current state read on behalf of a new viewer
    Snapshot,
}

/// The play-head position after a mutation.
///
/// `revision` increases by one on every tick or seek and orders events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReady {
    pub index: usize,
    pub revision: u64,
    pub cause: FrameCause,
}

struct EngineState {
    head: PlayHead,
    revision: u64,
    last_seek: u64,
    started: bool,
}

struct EngineInner {
    state: Mutex<EngineState>,
    frame_tx: broadcast::Sender<FrameReady>,
    period: Duration,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    /// Create an engine for a lap of `len` samples, play-head at 0, not running
    pub fn new(len: usize, period: Duration) -> Result<Self, LapError> {
        let head = PlayHead::new(len)?;
        let (frame_tx, _) = broadcast::channel(FRAME_EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    head,
                    revision: 0,
                    last_seek: 0,
                    started: false,
                }),
                frame_tx,
                period,
                shutdown: CancellationToken::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // The state is a plain index, still consistent if a holder panicked
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Receive every frame-ready event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<FrameReady> {
        self.inner.frame_tx.subscribe()
    }

    pub fn period(&self) -> Duration {
        self.inner.period
    }

    pub fn len(&self) -> usize {
        self.lock().head.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().head.is_empty()
    }

    /// Constant for the lifetime of the engine
    pub fn max_index(&self) -> usize {
        self.lock().head.max_index()
    }

    pub fn index(&self) -> usize {
        self.lock().head.index()
    }

    /// Current index and revision, read atomically
    pub fn snapshot(&self) -> FrameReady {
        let state = self.lock();
        FrameReady {
            index: state.head.index(),
            revision: state.revision,
            cause: FrameCause::Snapshot,
        }
    }

    /// Revision of the most recent seek, 0 if there was none
    pub fn last_seek_revision(&self) -> u64 {
        self.lock().last_seek
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    /// Start the autonomous advance loop.
    ///
    /// Returns true if this call started it, false if it was already running.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> bool {
        {
            let mut state = self.lock();
            if state.started {
                return false;
            }
            state.started = true;
        }

        info!(
            "Starting playback loop, period {}ms",
            self.inner.period.as_millis()
        );
        let engine = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move { engine.tick_loop(shutdown).await });
        true
    }

    /// Stop the autonomous loop. The play-head keeps its position.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Advance one sample, wrapping at the end of the lap
    pub fn tick(&self) -> FrameReady {
        let mut state = self.lock();
        let index = state.head.advance();
        self.emit(&mut state, index, FrameCause::Tick)
    }

    /// Seek to a viewer-supplied position.
    ///
    /// The value is coerced to an integer and clamped into range. On failure
    /// the play-head is left untouched and nothing is emitted.
    pub fn seek(&self, requested: &Value) -> Result<FrameReady, SeekError> {
        let requested = parse_seek_index(requested)?;
        Ok(self.seek_to(requested))
    }

    /// Seek to an integer position, clamped into range
    pub fn seek_to(&self, requested: i64) -> FrameReady {
        let mut state = self.lock();
        let index = state.head.seek(requested);
        debug!("Seek to {} (requested {})", index, requested);
        self.emit(&mut state, index, FrameCause::Seek)
    }

    // Called with the state lock held
    fn emit(&self, state: &mut EngineState, index: usize, cause: FrameCause) -> FrameReady {
        state.revision += 1;
        if cause == FrameCause::Seek {
            state.last_seek = state.revision;
        }
        let event = FrameReady {
            index,
            revision: state.revision,
            cause,
        };
        if let Err(e) = self.inner.frame_tx.send(event) {
            // No subscribers - the gateway is not running yet
            trace!("No receivers for frame event: {}", e);
        }
        event
    }

    async fn tick_loop(self, shutdown: CancellationToken) {
        let period = self.inner.period;
        let mut interval = interval_at(Instant::now() + period, period);
        // A stalled runtime skips ticks instead of bursting to catch up
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Playback loop stopped");
                    break;
                },
                _ = interval.tick() => {
                    let event = self.tick();
                    trace!("Tick to {} (revision {})", event.index, event.revision);
                }
            }
        }
    }

    /// Subsystem entry point: run the loop until shutdown is requested
    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        self.start();
        tokio::select! {
            _ = subsys.on_shutdown_requested() => {},
            _ = self.inner.shutdown.cancelled() => {},
        }
        self.shutdown();
        info!("Playback stopped at index {}", self.index());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    fn drain(rx: &mut broadcast::Receiver<FrameReady>) -> Vec<FrameReady> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(e) => events.push(e),
                Err(TryRecvError::Empty) => return events,
                Err(e) => panic!("unexpected receive error {:?}", e),
            }
        }
    }

    #[test]
    fn test_empty_lap_is_rejected() {
        assert!(matches!(
            PlaybackEngine::new(0, DEFAULT_TICK_PERIOD),
            Err(LapError::EmptySamples)
        ));
    }

    #[test]
    fn test_tick_wraps_and_emits() {
        let engine = PlaybackEngine::new(3, DEFAULT_TICK_PERIOD).unwrap();
        let mut rx = engine.subscribe();

        let indices: Vec<usize> = (0..4).map(|_| engine.tick().index).collect();
        assert_eq!(indices, vec![1, 2, 0, 1]);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.cause == FrameCause::Tick));
        let revisions: Vec<u64> = events.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_wrap_law() {
        let engine = PlaybackEngine::new(7, DEFAULT_TICK_PERIOD).unwrap();
        engine.seek_to(4);
        for _ in 0..7 {
            engine.tick();
        }
        assert_eq!(engine.index(), 4);
    }

    #[test]
    fn test_seek_sets_exact_index_and_emits() {
        let engine = PlaybackEngine::new(10, DEFAULT_TICK_PERIOD).unwrap();
        assert_eq!(engine.last_seek_revision(), 0);
        engine.tick();
        let mut rx = engine.subscribe();

        let event = engine.seek(&json!(7)).unwrap();
        assert_eq!(event.index, 7);
        assert_eq!(engine.last_seek_revision(), event.revision);
        assert_eq!(event.cause, FrameCause::Seek);
        assert_eq!(engine.index(), 7);
        assert_eq!(drain(&mut rx), vec![event]);
    }

    #[test]
    fn test_seek_clamps_out_of_range() {
        let engine = PlaybackEngine::new(5, DEFAULT_TICK_PERIOD).unwrap();
        assert_eq!(engine.seek(&json!(-1)).unwrap().index, 0);
        assert_eq!(engine.seek(&json!(5)).unwrap().index, 4);
        assert_eq!(engine.seek(&json!("10")).unwrap().index, 4);
    }

    #[test]
    fn test_invalid_seek_changes_nothing() {
        let engine = PlaybackEngine::new(5, DEFAULT_TICK_PERIOD).unwrap();
        engine.seek_to(2);
        let mut rx = engine.subscribe();
        let before = engine.snapshot();

        assert!(engine.seek(&json!("abc")).is_err());
        assert!(engine.seek(&json!(null)).is_err());

        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.last_seek_revision(), before.revision);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_index_stays_in_range() {
        // Deterministic pseudo-random mix of ticks and seeks
        for len in [1usize, 2, 5, 13] {
            let engine = PlaybackEngine::new(len, DEFAULT_TICK_PERIOD).unwrap();
            let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
            for _ in 0..500 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                if seed >> 63 == 0 {
                    engine.tick();
                } else {
                    let requested = (seed >> 32) as i64 % (len as i64 + 20) - 10;
                    engine.seek_to(requested);
                }
                assert!(engine.index() <= len - 1);
                assert_eq!(engine.max_index(), len - 1);
            }
        }
    }

    #[test]
    fn test_concurrent_mutations_keep_revision_order() {
        let engine = PlaybackEngine::new(50, DEFAULT_TICK_PERIOD).unwrap();
        let mut rx = engine.subscribe();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for n in 0..10 {
                        if (i + n) % 2 == 0 {
                            engine.tick();
                        } else {
                            engine.seek_to(n);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let events = drain(&mut rx);
        assert_eq!(events.len(), 40);
        assert!(events.windows(2).all(|w| w[1].revision == w[0].revision + 1));
        assert_eq!(events.last().unwrap().index, engine.index());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_advances_on_period() {
        let engine = PlaybackEngine::new(5, DEFAULT_TICK_PERIOD).unwrap();
        assert_eq!(engine.index(), 0);
        assert!(engine.start());

        // Ticks land at 500, 1000 and 1500ms
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(engine.index(), 3);
        assert_eq!(engine.max_index(), 4);

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let engine = PlaybackEngine::new(100, DEFAULT_TICK_PERIOD).unwrap();
        let mut rx = engine.subscribe();

        assert!(engine.start());
        assert!(!engine.start());
        assert!(!engine.clone().start());
        assert!(engine.is_started());

        tokio::time::sleep(Duration::from_millis(2250)).await;
        assert_eq!(engine.index(), 4);
        assert_eq!(drain(&mut rx).len(), 4);

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_does_not_reset_tick_phase() {
        let engine = PlaybackEngine::new(100, DEFAULT_TICK_PERIOD).unwrap();
        engine.start();

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(engine.index(), 1);
        engine.seek_to(50);

        // The next tick still fires at 1000ms, only 300ms after the seek
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(engine.index(), 51);

        engine.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_loop() {
        let engine = PlaybackEngine::new(100, DEFAULT_TICK_PERIOD).unwrap();
        engine.start();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        engine.shutdown();
        let stopped_at = engine.index();

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(engine.index(), stopped_at);
    }
}
