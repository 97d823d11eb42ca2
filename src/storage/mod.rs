//! Blob stores.
//!
//! The [`backend::BlobStore`] trait abstracts over where blob bytes
//! physically live. Implementations include an in-memory store and a
//! local filesystem store.

pub mod backend;
pub mod local;
pub mod memory;
