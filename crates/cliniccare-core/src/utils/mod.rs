//! Utility functions for formatting records in table output.

pub mod format;

// Re-export commonly used functions at module level
pub use format::{format_date, format_datetime, format_optional, truncate_string};
