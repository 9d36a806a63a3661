//! Streaming: direct live proxy and supervised HLS transcoding sessions

pub mod proxy;
pub mod session;
pub mod transcoder;

pub use proxy::{LiveProxy, LiveStream};
pub use session::{SessionDescriptor, StreamSession, StreamSessionManager, StreamingConfig};
pub use transcoder::{Transcoder, TranscoderConfig};
