//! Local filesystem access.

pub mod walker;
