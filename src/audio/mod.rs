//! Audio subsystem module

pub mod buffer;
pub mod decoder;
pub mod device;
pub mod playback;
pub mod resample;
pub mod source;

pub use buffer::{RenderBuffer, Renderer, SharedRenderBuffer};
pub use decoder::{FileSource, SymphoniaOpener};
pub use playback::AudioOutput;
pub use resample::Resampler;
pub use source::{AudioFormat, Playlist, SampleSource, SourceOpener, ToneSource};
