//! Watchpost: periodically checks web resources against threshold rules
//! and notifies configured providers when a rule is satisfied, with a
//! per-rule cooldown to avoid repeated alerts.

pub mod app;
pub mod config;
pub mod observer;
