//! Token budget policy.
//!
//! Every provider call goes through [`TokenBudgetController::clamp`] first.
//! A changed result means dependent executor state must be rebuilt.

pub mod limits;

pub use limits::{
    BudgetAssessment, Clamped, Downgrade, TokenBudgetController, KNOWN_PROVIDER_CEILINGS,
    SAFE_TOKEN_THRESHOLD,
};
