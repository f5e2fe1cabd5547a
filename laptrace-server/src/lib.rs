//! # Laptrace Server
//!
//! Synchronized lap replay over WebSocket.
//!
//! The server walks a single shared play-head through one recorded lap and
//! pushes a telemetry chart and a track map for the current sample to every
//! connected viewer. Any viewer can seek; everyone follows.
//!
//! ## Architecture
//!
//! The lap model and rendering live in [`laptrace_core`]; this crate adds the
//! tokio runtime around them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    laptrace-server                      │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐ │
//! │  │ Lap API     │  │ WebSocket   │  │ Page (static)    │ │
//! │  │ (axum)      │  │ (/ws)       │  │ (rust-embed)     │ │
//! │  └──────┬──────┘  └──────┬──────┘  └──────────────────┘ │
//! │         │                │                              │
//! │         ▼                ▼                              │
//! │  ┌─────────────────────────────────────────────────────┐│
//! │  │              BroadcastGateway                       ││
//! │  │  - Viewer registry                                  ││
//! │  │  - Render on the blocking pool, encode once         ││
//! │  └─────────────────────────────────────────────────────┘│
//! │         ▲ frame-ready events                            │
//! │  ┌──────┴──────────────────────────────────────────────┐│
//! │  │              PlaybackEngine                         ││
//! │  │  - Shared play-head, 500ms tick, seek               ││
//! │  └─────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`Session`] - The loaded lap plus engine and gateway
//! - [`engine::PlaybackEngine`] - Play-head owner and tick loop
//! - [`gateway::BroadcastGateway`] - Viewer fan-out
//! - [`web::Web`] - HTTP and WebSocket endpoints
//! - [`source::FileLapSource`] - Lap documents on disk
//!
//! ## Endpoints
//!
//! | Endpoint | Description |
//! |----------|-------------|
//! | `GET /` | Viewer page |
//! | `GET /api/lap` | Lap metadata and current position |
//! | `WS /ws` | `update` stream, accepts `set_position` |
//!
//! ## Example: Starting the Server
//!
//! ```rust,no_run
//! use clap::Parser;
//! use laptrace_server::{web::Web, Cli, Session};
//! use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let args = Cli::parse_from(["laptrace-server", "--demo", "-p", "8080"]);
//!     let lap = args.lap_source().load().unwrap();
//!     let session = Session::new(args, lap).unwrap();
//!
//!     Toplevel::new(move |s| async move {
//!         session.start(&s);
//!         s.start(SubsystemBuilder::new("Web", |subsys| Web::new(session).run(subsys)));
//!     })
//!     .catch_signals()
//!     .handle_shutdown_requests(Duration::from_secs(5))
//!     .await
//!     .unwrap();
//! }
//! ```

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

use laptrace_core::lap::{LapSource, SyntheticLap};
use laptrace_core::{FrameRenderer, Lap, LapError};

pub mod engine;
pub mod gateway;
pub mod protocol;
pub mod source;
pub mod web;

use engine::PlaybackEngine;
use gateway::BroadcastGateway;
use source::FileLapSource;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Clone, Debug)]
#[command(version, about = "Replay one lap to every connected viewer, in sync")]
pub struct Cli {
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Port for webserver
    #[arg(short, long, default_value_t = 5000)]
    pub port: u16,

    /// Address to listen on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Lap document (JSON) to replay
    #[arg(short, long, required_unless_present = "demo", conflicts_with = "demo")]
    pub lap: Option<PathBuf>,

    /// Replay a generated lap instead of a file
    #[arg(long, default_value_t = false)]
    pub demo: bool,

    /// Play-head advance period in milliseconds
    #[arg(long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,
}

impl Cli {
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Where the lap comes from
    pub fn lap_source(&self) -> Box<dyn LapSource> {
        match &self.lap {
            Some(path) if !self.demo => Box::new(FileLapSource::new(path.clone())),
            _ => Box::new(SyntheticLap::default()),
        }
    }
}

/// The loaded lap and the services built on it
#[derive(Clone)]
pub struct Session {
    pub args: Cli,
    pub lap: Arc<Lap>,
    pub engine: PlaybackEngine,
    pub gateway: BroadcastGateway,
}

impl Session {
    /// Build the engine and gateway. Nothing runs until [`Session::start`].
    pub fn new(args: Cli, lap: Lap) -> Result<Self, LapError> {
        let lap = Arc::new(lap);
        let engine = PlaybackEngine::new(lap.len(), args.tick_period())?;
        let renderer = Arc::new(FrameRenderer::new(lap.clone()));
        let gateway = BroadcastGateway::new(engine.clone(), renderer);

        Ok(Session {
            args,
            lap,
            engine,
            gateway,
        })
    }

    /// Start the broadcast loop and playback as subsystems of `subsystem`
    pub fn start(&self, subsystem: &SubsystemHandle) {
        let gateway = self.gateway.clone();
        subsystem.start(SubsystemBuilder::new("Broadcast", |subsys| {
            gateway.run(subsys)
        }));

        let engine = self.engine.clone();
        subsystem.start(SubsystemBuilder::new("Playback", |subsys| engine.run(subsys)));
    }
}
