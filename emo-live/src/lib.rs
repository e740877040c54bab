//! # emo-live — terminal client for live emotion detection
//!
//! Streams frames from a local source to the emotion backend over
//! `emo-core`'s live session, and prints the connection banner and the
//! latest prediction. Also wraps the backend's REST login and
//! single-image prediction endpoints.

pub mod api;
pub mod config;
pub mod source;
pub mod status;
