//! Utility module for softplayer
//!
//! This module provides common utilities used throughout the crate:
//! - Error handling with custom error types
//! - Configuration management
//! - Common helper functions

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{Config, DecoderConfig, GeneralConfig, PlaybackConfig};
pub use error::{DecodeCause, PlayerError, Result};

/// Format a duration for display
///
/// Returns "HH:MM:SS.mmm", or "MM:SS.mmm" for durations under an hour
pub fn format_duration(duration: std::time::Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = duration.subsec_millis();

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}
