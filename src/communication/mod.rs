// src/communication/mod.rs - Line-oriented command transports
pub mod serial;

pub use serial::{open_serial, reply_line, serve_lines, serve_serial};
