//! Free-text intent to capability matching.
//!
//! A capability scores one point for every whitespace-separated word of each
//! of its intent phrases that occurs as a substring of the lower-cased
//! intent. The strictly highest score wins; ties keep the earlier capability.

use tracing::debug;

use strata_core::error::{Result, StrataError};
use strata_core::types::AgentCapability;

/// Score one capability against an already lower-cased intent.
pub fn score_capability(intent_lower: &str, capability: &AgentCapability) -> usize {
    capability
        .intents
        .iter()
        .flat_map(|phrase| phrase.split_whitespace())
        .filter(|word| intent_lower.contains(word.to_lowercase().as_str()))
        .count()
}

/// Pick the best-matching capability for `intent`.
pub fn resolve<'a>(intent: &str, capabilities: &'a [AgentCapability]) -> Result<&'a AgentCapability> {
    let lowered = intent.to_lowercase();
    let mut best: Option<(&AgentCapability, usize)> = None;

    for capability in capabilities {
        let score = score_capability(&lowered, capability);
        debug!(capability = %capability.name, score, "Scored capability");
        if score > best.map_or(0, |(_, s)| s) {
            best = Some((capability, score));
        }
    }

    best.map(|(capability, _)| capability)
        .ok_or_else(|| StrataError::NoMatchingCapability(intent.to_string()))
}
