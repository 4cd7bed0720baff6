//! REST endpoint handlers organized by resource.

pub mod chat;
pub mod system;
