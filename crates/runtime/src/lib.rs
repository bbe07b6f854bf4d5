mod embed;
mod generator;

pub use embed::{ollama_embed_fn, ollama_embed_fn_from_config};
pub use generator::{ContentGenerator, GenerationReport};
