use std::fmt;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use mir_core::Name;

use crate::error::{FwError, Result};
use crate::strategy::{create_strategy, Strategy};
use crate::trie::PrefixTrie;

/// Strategy chosen for a name prefix
#[derive(Clone)]
pub struct StrategyChoice {
    pub prefix: Name,
    pub strategy_name: String,
    pub strategy: Arc<dyn Strategy>,
}

impl fmt::Debug for StrategyChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyChoice")
            .field("prefix", &self.prefix)
            .field("strategy_name", &self.strategy_name)
            .finish()
    }
}

/// Listing row for management
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyListing {
    pub prefix: String,
    pub strategy: String,
}

/// Maps name prefixes to the strategy governing them.
///
/// The root prefix always carries a choice, so every name resolves.
pub struct StrategyTable {
    trie: PrefixTrie<StrategyChoice>,
    fallback: StrategyChoice,
}

impl StrategyTable {
    /// Table with `default_strategy` installed at the root.
    pub fn new(default_strategy: &str) -> Result<Self> {
        let strategy = create_strategy(default_strategy)?;
        let fallback = StrategyChoice {
            prefix: Name::new(),
            strategy_name: strategy.name().to_string(),
            strategy,
        };
        let table = Self {
            trie: PrefixTrie::new(),
            fallback,
        };
        table.set_instance(&Name::new(), Arc::clone(&table.fallback.strategy));
        Ok(table)
    }

    /// Choose the strategy named `strategy_name` for `prefix`.
    pub fn set(&self, prefix: &Name, strategy_name: &str) -> Result<()> {
        let strategy = create_strategy(strategy_name)?;
        self.set_instance(prefix, strategy);
        Ok(())
    }

    /// Install an already built strategy, replacing the previous choice.
    pub fn set_instance(&self, prefix: &Name, strategy: Arc<dyn Strategy>) {
        let strategy_name = strategy.name().to_string();
        info!("Strategy for {} set to {}", prefix, strategy_name);
        self.trie.insert(
            prefix.components(),
            StrategyChoice {
                prefix: prefix.clone(),
                strategy_name,
                strategy,
            },
        );
    }

    /// Remove the choice at `prefix`. The root choice cannot be removed.
    pub fn unset(&self, prefix: &Name) -> Result<StrategyChoice> {
        if prefix.is_empty() {
            return Err(FwError::InvalidConfiguration(
                "the root strategy choice cannot be removed".to_string(),
            ));
        }
        let removed = self
            .trie
            .delete(prefix.components())
            .ok_or_else(|| FwError::NotFound(prefix.to_string()))?;
        info!("Strategy choice for {} removed", prefix);
        Ok(removed)
    }

    /// Strategy governing `name`, by longest-prefix match.
    pub fn find_effective(&self, name: &Name) -> Arc<dyn Strategy> {
        self.find_effective_choice(name).strategy
    }

    pub fn find_effective_choice(&self, name: &Name) -> StrategyChoice {
        match self.trie.longest_prefix_match(name.components()) {
            Some((_, choice)) => choice,
            None => {
                warn!("No strategy choice covers {}, using {}", name, self.fallback.strategy_name);
                self.fallback.clone()
            }
        }
    }

    pub fn find_exact(&self, prefix: &Name) -> Option<StrategyChoice> {
        self.trie.exact_match(prefix.components()).into_value()
    }

    /// Every choice, sorted by prefix.
    pub fn list(&self) -> Vec<StrategyListing> {
        let mut listing = Vec::new();
        self.trie.traverse(|_, slot| {
            if let Some(choice) = slot.as_ref() {
                listing.push(StrategyListing {
                    prefix: choice.prefix.to_string(),
                    strategy: choice.strategy_name.clone(),
                });
            }
            0
        });
        listing.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        listing
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Length of the longest prefix carrying a choice
    pub fn depth(&self) -> usize {
        self.trie.depth()
    }
}
