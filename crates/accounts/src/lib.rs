//! Account linking, removal and sync across both link kinds.

pub mod service;

pub use service::{AccountService, SyncReport};
