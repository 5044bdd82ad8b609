//! Reelcast publisher
//!
//! Streams recorded media files into an SFU session at playback speed.
//! This module exposes the publisher components for testing and embedding.

pub mod config;
pub mod health;
pub mod publisher;
pub mod session;
pub mod signal;
