//! Capture-loop controller: acquire a media source, classify frames with a
//! remote service on a timer, and hand filtered, sorted, annotated results to
//! a UI sink.

pub mod ai;
pub mod capture;
pub mod render;
pub mod session;
pub mod settings;
pub mod sink;
pub mod webhook;

pub use session::{CaptureLoopController, SessionConfig, SessionError, SessionState};

/// Initialise `env_logger`, defaulting to `info` when `RUST_LOG` is unset.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
