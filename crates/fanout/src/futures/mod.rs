mod engine;
mod sleep_provider;

pub use engine::*;
pub use sleep_provider::*;
