//! WebSocket endpoints

pub mod terminal;
