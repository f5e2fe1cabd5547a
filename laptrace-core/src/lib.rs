//! # Laptrace Core
//!
//! Platform-independent lap replay logic.
//!
//! This crate contains the lap model, play-head arithmetic and frame rendering
//! with **zero I/O dependencies**: no tokio, no sockets, no file access. The
//! server crate supplies the I/O and the concurrency around it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  laptrace-core (no tokio/async deps)                        │
//! │  ├── lap/       (sample table, corners, lap documents)      │
//! │  ├── playhead   (wrap/clamp arithmetic, seek coercion)      │
//! │  └── render/    (telemetry + track PNG frames)              │
//! └─────────────────────────────────────────────────────────────┘
//!                 ▲
//!    ┌────────────┴────────────┐
//!    │  laptrace-server        │
//!    │  (engine, gateway, web) │
//!    └─────────────────────────┘
//! ```
//!
//! ## Key Modules
//!
//! - [`lap`] - Immutable sample store and its sources
//! - [`playhead`] - The index arithmetic behind ticks and seeks
//! - [`render`] - Frame rendering to PNG
//! - [`error`] - Error types
//!
//! ## Example: Stepping Through a Lap
//!
//! ```rust
//! use laptrace_core::lap::{LapSource, SyntheticLap};
//! use laptrace_core::PlayHead;
//!
//! let lap = SyntheticLap::new(5).load().unwrap();
//! let mut head = PlayHead::new(lap.len()).unwrap();
//!
//! head.advance();
//! head.advance();
//! assert_eq!(head.index(), 2);
//!
//! // Seeks past the end land on the last sample
//! assert_eq!(head.seek(10), 4);
//! ```

pub mod error;
pub mod lap;
pub mod playhead;
pub mod render;

// Re-export commonly used types
pub use error::{LapError, RenderError, SeekError};
pub use lap::{CornerAnnotation, Lap, LapInfo, LapSource, SampleTable};
pub use playhead::{parse_seek_index, PlayHead};
pub use render::{FrameRenderer, RenderedFrame};
