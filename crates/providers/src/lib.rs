//! Completion source implementations for CABM.
//!
//! All providers implement the `cabm_core::Provider` trait.
//! [`router::build_from_config`] selects one from configuration.

pub mod openai_compat;
pub mod router;

pub use openai_compat::OpenAiCompatProvider;
pub use router::{ProviderSelection, build_from_config};
