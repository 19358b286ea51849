pub mod engine;
pub mod pipeline;
pub mod prompts;
pub mod synthesizer;

pub use engine::*;
pub use pipeline::*;
pub use prompts::*;
pub use synthesizer::*;
