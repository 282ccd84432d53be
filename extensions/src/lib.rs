//! Collaborators for `zenreader_core` that reach outside the process: the Gemini
//! classifier, PDF text extraction, and Open Library subject lookup.

pub mod gemini;
pub mod openlibrary;
pub mod pdf;
