//! Interactive terminal bridge
//!
//! A throwaway container with an attached interactive exec, bridged to the
//! learner's browser over a WebSocket. The WebSocket wiring lives in the
//! router; this module owns container allocation, the byte plumbing and the
//! no-orphans teardown guarantee.

mod session;

pub use session::{chunk_text, ClientFrame, TerminalSession, OUTPUT_CHUNK};
