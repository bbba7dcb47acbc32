//! Data plane for an FPGA audio modulator
//!
//! Captures 24-bit stereo samples streamed over raw Ethernet into per-channel
//! ring buffers, serves windowed spectra from them, and keeps the device's
//! twelve control registers in sync by broadcasting them every 50 ms.

pub mod audio;
pub mod config;
pub mod ingest;
pub mod link;
pub mod monitor;
pub mod registers;
pub mod service;
pub mod simulate;
pub mod transmit;
