//! Context accounting for Tether.
//!
//! - **`TokenCounter`**: model-aware token estimation (tiktoken `o200k_base`)
//! - **`UsageLedger`**: reported and estimated usage per response, reset on rollback

mod token_counter;
mod usage;

pub use token_counter::TokenCounter;
pub use usage::UsageLedger;
