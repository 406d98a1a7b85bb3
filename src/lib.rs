//! Alphalabz authorization core
//!
//! Role/resource/action/scope permission decisions over a policy set loaded
//! from the record store and kept fresh in the background. All modules are
//! exposed for testing purposes.

pub mod authz;
pub mod jobs;
pub mod settings;
pub mod storage;
