//! Per-provider token ceilings.
//!
//! Rate-limited tiers get a hard ceiling on response tokens; unrestricted
//! providers pass the requested value through. Ceilings can be overridden
//! from configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{ProviderConfig, ProviderId};

/// Built-in ceilings. Providers not listed have no ceiling.
pub const KNOWN_PROVIDER_CEILINGS: &[(ProviderId, u32)] = &[(ProviderId::Groq, 500)];

/// Upper bound of the "safe" band for rate-limited providers.
pub const SAFE_TOKEN_THRESHOLD: u32 = 400;

/// A reduction applied by [`TokenBudgetController::clamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downgrade {
    pub provider_id: ProviderId,
    pub from: u32,
    pub to: u32,
}

/// Result of a clamp: the config to use and whether it was reduced.
#[derive(Debug, Clone, PartialEq)]
pub struct Clamped {
    pub config: ProviderConfig,
    pub downgrade: Option<Downgrade>,
}

/// How risky a token limit is with respect to provider rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAssessment {
    Safe,
    Moderate,
    Unsafe,
}

/// Clamps requested token limits to per-provider safe ceilings.
#[derive(Debug, Clone)]
pub struct TokenBudgetController {
    ceilings: HashMap<ProviderId, u32>,
}

impl Default for TokenBudgetController {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBudgetController {
    /// Controller with the built-in ceiling table.
    pub fn new() -> Self {
        Self {
            ceilings: KNOWN_PROVIDER_CEILINGS.iter().copied().collect(),
        }
    }

    /// Controller with user overrides layered over the built-in table.
    pub fn with_overrides(overrides: &HashMap<ProviderId, u32>) -> Self {
        let mut controller = Self::new();
        for (provider, ceiling) in overrides {
            controller.set_ceiling(*provider, *ceiling);
        }
        controller
    }

    pub fn set_ceiling(&mut self, provider: ProviderId, ceiling: u32) {
        self.ceilings.insert(provider, ceiling.max(1));
    }

    pub fn remove_ceiling(&mut self, provider: ProviderId) {
        self.ceilings.remove(&provider);
    }

    pub fn ceiling(&self, provider: ProviderId) -> Option<u32> {
        self.ceilings.get(&provider).copied()
    }

    /// Returns a config whose `max_tokens` respects the provider ceiling.
    ///
    /// Idempotent: clamping an already clamped config is a no-op.
    pub fn clamp(&self, config: &ProviderConfig) -> Clamped {
        let provider = config.provider_id();
        let requested = config.max_tokens();

        match self.ceiling(provider) {
            Some(ceiling) if requested > ceiling => {
                log::warn!(
                    "Token limit reduced for {}: {} -> {}",
                    provider,
                    requested,
                    ceiling
                );
                Clamped {
                    config: config.with_max_tokens(ceiling),
                    downgrade: Some(Downgrade {
                        provider_id: provider,
                        from: requested,
                        to: ceiling,
                    }),
                }
            }
            _ => Clamped {
                config: config.clone(),
                downgrade: None,
            },
        }
    }

    /// Rates the config's token limit against the provider's ceiling.
    pub fn assess(&self, config: &ProviderConfig) -> BudgetAssessment {
        let Some(ceiling) = self.ceiling(config.provider_id()) else {
            return BudgetAssessment::Safe;
        };
        let tokens = config.max_tokens();
        if tokens > ceiling {
            BudgetAssessment::Unsafe
        } else if tokens > SAFE_TOKEN_THRESHOLD.min(ceiling) {
            BudgetAssessment::Moderate
        } else {
            BudgetAssessment::Safe
        }
    }
}
