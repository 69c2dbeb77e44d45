//! Audio sources, decoding, device output and software sinks

pub mod decoder;
pub mod device;
pub mod output;
pub mod source;

pub use decoder::{SourceOpener, SymphoniaOpener};
pub use device::{device_session, list_devices, DeviceOptions, DeviceOutput};
pub use output::{spawn_render_thread, AudioSink, NullSink, RenderThread, WavCaptureSink};
pub use source::{AudioSource, FrameSource, PcmSource, SourceInfo, SourceState};
