pub mod factory;
pub mod openai;

pub use factory::{AVAILABLE_PROVIDERS, create_provider};
pub use openai::OpenAiCompatibleProvider;
