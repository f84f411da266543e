//! Shared data model for the watchpost workspace.
//!
//! Rules, their stable [`fingerprint::Fingerprint`] identity, the alert
//! items a scan cycle produces and the payload rendered for delivery
//! providers all live here so the scanning and notification crates agree
//! on one vocabulary.

pub mod fingerprint;
pub mod payload;
pub mod types;
