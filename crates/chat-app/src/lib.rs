#![deny(unsafe_code)]

/// Terminal host: input loop, provider wiring and top-level errors.
pub mod app;
/// Chat domain: messages, routing, the conversation router and session state.
pub mod chat;
/// Layered settings and the missing-credential policy.
pub mod settings;
pub mod terminal;
/// Image upload encoding.
pub mod upload;
