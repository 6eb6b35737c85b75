pub mod client;
pub mod config;
pub mod delivery;
pub mod events;
pub mod format;
pub mod loopback;
pub mod queue;
pub mod session;
pub mod source;
pub mod state;
pub mod status;
pub mod uri;

#[cfg(any(test, feature = "test-support"))]
#[doc(hidden)]
pub mod test_support;

pub use source::{FlowError, Latency, SeekError, SpotifySrc, StartError};
