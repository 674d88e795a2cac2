pub mod ollama;

pub use ollama::{NdjsonDecoder, OllamaClient};
