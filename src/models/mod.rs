//! Core data models for the media storage service.
//!
//! These entities describe stored objects and the inputs and outputs of the
//! image derivative pipeline. They serialize naturally as JSON via `serde`
//! and are shared between the service layer and the HTTP handlers.

pub mod image;
pub mod object;
