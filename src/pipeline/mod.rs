//! Ordered fragment playback.
//!
//! A streamed reply is cut into fragments at pause markers, the fragments are
//! rendered concurrently, and the rendered audio is released to the caller
//! strictly in fragment order:
//!
//! ```text
//! model deltas -> Fragmenter -> RenderPool -> PlaybackSequencer -> transport
//!                                                    |
//!                                    CompletionTracker <- marks
//! ```

pub mod fragmenter;
pub mod interruption;
pub mod marks;
pub mod renderer;
pub mod sequencer;
pub mod types;

pub use fragmenter::Fragmenter;
pub use interruption::InterruptionController;
pub use marks::CompletionTracker;
pub use renderer::RenderPool;
pub use sequencer::PlaybackSequencer;
pub use types::{Fragment, Release, RenderOutcome, RenderedFragment, SkipReason};
