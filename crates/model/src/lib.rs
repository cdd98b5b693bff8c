//! An abstraction layer for the model-call collaborator.
//!
//! This crate establishes an unified protocol for agents to interact with
//! various language models, so that the runtime can drive any provider
//! without knowing how it talks to the model.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to. Retry, backoff and
//! timeouts are applied by the caller, never by the provider.

#![deny(missing_docs)]

mod config;
mod error;
mod provider;
mod request;
mod response;

pub use config::*;
pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
