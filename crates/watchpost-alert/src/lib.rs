//! Scan side of watchpost: turns configured [`Rule`]s into the ordered set
//! of [`AlertItem`]s that are allowed to notify this cycle.
//!
//! A cycle pulls one observation per rule from an [`observer::Observer`],
//! evaluates it with the restricted comparison grammar in [`condition`],
//! and filters satisfied rules through the persistent cooldown ledger in
//! [`cooldown`].
//!
//! [`Rule`]: watchpost_common::types::Rule
//! [`AlertItem`]: watchpost_common::types::AlertItem

pub mod condition;
pub mod cooldown;
pub mod error;
pub mod observer;
pub mod scan;

#[cfg(test)]
mod tests;

pub use error::{AlertError, Result};
