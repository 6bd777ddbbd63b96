pub mod json;

pub use json::{JsonMemoryStorage, MemoryStorage};
