//! Rule-set lookup for an Interface.

use std::collections::HashMap;

use crate::types::InterfaceRef;

use super::{Policy, RulesForInterface, ANY_INTERFACE_PATH};

/// Index of a Policy's rule-sets keyed by `"<path>:<revision>"` or `"<path>"`.
///
/// Building the index is cheap; it is kept as an explicit value so callers
/// can cache it next to the Policy it was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleIndex {
    by_key: HashMap<String, RulesForInterface>,
}

impl RuleIndex {
    /// Indexes every rule-set of `policy`. On duplicate keys the last entry wins.
    #[must_use]
    pub fn from_policy(policy: &Policy) -> Self {
        let by_key = policy
            .rules
            .iter()
            .map(|rules| {
                let key = match rules.interface.revision.as_deref() {
                    Some(rev) => format!("{}:{rev}", rules.interface.path),
                    None => rules.interface.path.clone(),
                };
                (key, rules.clone())
            })
            .collect();

        Self { by_key }
    }

    /// Finds the rule-set for an Interface.
    ///
    /// Lookup order: exact `path:revision`, then `path`, then the `cap.*` wildcard.
    #[must_use]
    pub fn find(&self, interface: &InterfaceRef) -> Option<&RulesForInterface> {
        if let Some(rev) = interface.revision() {
            if let Some(rules) = self.by_key.get(&format!("{}:{rev}", interface.path)) {
                return Some(rules);
            }
        }

        self.by_key
            .get(&interface.path)
            .or_else(|| self.by_key.get(ANY_INTERFACE_PATH))
    }

    /// Number of indexed rule-sets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Returns true if the index holds no rule-sets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// One-shot lookup: indexes `policy` and finds the rule-set for `interface`.
///
/// Returns the zero-value rule-set (empty path, no rules) when nothing matches.
#[must_use]
pub fn match_rules(policy: &Policy, interface: &InterfaceRef) -> RulesForInterface {
    RuleIndex::from_policy(policy)
        .find(interface)
        .cloned()
        .unwrap_or_default()
}
