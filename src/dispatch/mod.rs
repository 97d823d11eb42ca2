//! Blob dispatch: choosing which provider owns a blob.
//!
//! Rules are an ordered list of clause sets, each naming a target
//! provider, plus a mandatory default. See [`dispatcher::BlobDispatcher`].

pub mod clause;
pub mod dispatcher;

pub use dispatcher::{BlobDispatcher, Dispatch, RuleConfig, DEFAULT_RULE};
