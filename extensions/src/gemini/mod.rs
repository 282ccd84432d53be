//! Document classification through Google's Gemini API.

mod classify;
mod error;
mod shared;

pub use classify::{DEFAULT_MODEL, GeminiClassifier};
pub use error::{GeminiError, GeminiErrorDetail};
pub use shared::GeminiConfig;
