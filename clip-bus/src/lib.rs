//! Dashcam clip library: groups clips into journeys and exports a journey as
//! one joined or re-encoded file.

/// Registers FFmpeg components. Call once at startup.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod clip;
pub mod composition;
pub mod compositor;
pub mod decoder;
pub mod discovery;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod hw;
pub mod input;
pub mod journey;
pub mod layout;
pub mod metadata;
pub mod names;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod progress;
pub mod reader;
pub mod registry;
pub mod resampler;
pub mod scaler;
pub mod stream;

pub use clip::{ClipFile, ClipProbe, ClipTiming, MediaClipProbe};
pub use composition::{Composition, CompositionBuilder, TimeRange};
pub use error::{CompositionError, PipelineError, ProbeError, RegistryError, SegmentError};
pub use journey::{DeleteMode, Journey, JourneySegmenter};
pub use names::{JourneyNames, JsonJourneyNames, MemoryJourneyNames};
pub use output::OutputContainer;
pub use pipeline::{ExportJob, ExportOutcome, ExportSettings, JobControl, JobHandle, JobState};
pub use progress::{ExportEvent, ExportEvents, ProgressCoordinator};
pub use registry::JobRegistry;
