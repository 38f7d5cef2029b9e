//! Deterministic reconciliation of two ordered environments.

use crate::storage::EnvValue;
use std::collections::{HashMap, HashSet};

/// Which side wins when a key exists in both lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPriority {
    /// The incoming value replaces the base value.
    #[default]
    Incoming,
    /// The base value is kept.
    Current,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeConfig {
    /// Return the incoming list untouched, ignoring the base.
    pub replace: bool,
    pub conflict_priority: ConflictPriority,
}

impl MergeConfig {
    pub fn with_priority(conflict_priority: ConflictPriority) -> Self {
        Self {
            replace: false,
            conflict_priority,
        }
    }

    pub fn replacing() -> Self {
        Self {
            replace: true,
            conflict_priority: ConflictPriority::Incoming,
        }
    }
}

/// Merge `incoming` into `base`.
///
/// Base keys keep their base position (and base `order`). Keys only present
/// in `incoming` follow every base entry in their incoming relative order,
/// numbered from `base.len() + 1`.
///
/// A key repeated inside `incoming` is emitted once, at its first position,
/// carrying the value of its last occurrence.
pub fn merge(incoming: &[EnvValue], base: &[EnvValue], config: &MergeConfig) -> Vec<EnvValue> {
    if config.replace {
        return incoming.to_vec();
    }

    let mut latest: HashMap<&str, &EnvValue> = HashMap::with_capacity(incoming.len());
    for value in incoming {
        latest.insert(value.key.as_str(), value);
    }

    let mut merged = Vec::with_capacity(base.len() + incoming.len());
    let mut base_keys: HashSet<&str> = HashSet::with_capacity(base.len());

    for current in base {
        base_keys.insert(current.key.as_str());

        match (latest.get(current.key.as_str()), config.conflict_priority) {
            (Some(winner), ConflictPriority::Incoming) => merged.push(EnvValue {
                order: current.order,
                ..(*winner).clone()
            }),
            _ => merged.push(current.clone()),
        }
    }

    let mut appended: HashSet<&str> = HashSet::new();
    for value in incoming {
        let key = value.key.as_str();
        if base_keys.contains(key) || !appended.insert(key) {
            continue;
        }
        let winner = latest.get(key).copied().unwrap_or(value);
        merged.push(EnvValue {
            order: base.len() + appended.len(),
            ..winner.clone()
        });
    }

    merged
}
