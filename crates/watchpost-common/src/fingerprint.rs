//! Stable identity of a monitored rule.
//!
//! A fingerprint is the lowercase hex SHA-256 digest of the rule's four
//! defining fields joined with [`FIELD_SEPARATOR`]. `enabled` is not part
//! of the identity, so toggling a rule keeps its cooldown history.

use crate::types::Rule;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const FIELD_SEPARATOR: char = '_';

/// 64-character lowercase hex digest identifying a [`Rule`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this looks like a digest produced by [`fingerprint`].
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == 64
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Derives the fingerprint of `rule`. Pure and deterministic across
/// process restarts.
///
/// # Examples
///
/// ```
/// use watchpost_common::fingerprint::fingerprint;
/// use watchpost_common::types::Rule;
///
/// let rule = Rule {
///     url: "https://example.com/item".into(),
///     selector: "//div".into(),
///     success_condition: ">0".into(),
///     cooldown_hours: 24.0,
///     enabled: true,
/// };
/// let fp = fingerprint(&rule);
/// assert!(fp.is_well_formed());
/// assert_eq!(fp, fingerprint(&rule.clone()));
/// ```
pub fn fingerprint(rule: &Rule) -> Fingerprint {
    // f64 Display prints `24` for 24.0, keeping digests stable for integral hours.
    let material = format!(
        "{url}{sep}{selector}{sep}{condition}{sep}{hours}",
        url = rule.url,
        selector = rule.selector,
        condition = rule.success_condition,
        hours = rule.cooldown_hours,
        sep = FIELD_SEPARATOR,
    );
    Fingerprint(hex::encode(Sha256::digest(material.as_bytes())))
}
