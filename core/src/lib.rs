//! Library model and auto-classification pipeline for ZenReader.
//!
//! The entry point is [`organize::Organizer`]. Everything it talks to is a trait so that
//! storage, text extraction and the AI classifier can be swapped out (see the
//! `zenreader_extensions` crate for network-backed implementations).

pub mod classify;
pub mod confirm;
pub mod event;
pub mod library;
pub mod organize;
pub mod probe;
pub mod registry;
pub mod subjects;
