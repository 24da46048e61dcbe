//! Concrete adapters for the transport and media ports.
//!
//! Each backend is behind a cargo feature so hosts that bring their own
//! transport or audio stack do not pull in native dependencies.

#[cfg(feature = "local-audio")]
pub mod local;
#[cfg(feature = "webrtc")]
pub mod webrtc;

#[cfg(feature = "local-audio")]
pub use local::{AutoplayPolicy, LocalMediaDevices};
#[cfg(feature = "webrtc")]
pub use webrtc::WebRtcTransportFactory;
