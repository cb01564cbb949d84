//! Core abstractions for Mailsift: the processed-mail record model, the
//! storage contract the pipeline depends on, and the mail-side seams.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod error;
pub mod mail;
pub mod record;
pub mod store;
