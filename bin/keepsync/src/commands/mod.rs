pub mod accounts;
pub mod cleanup;
pub mod daemon;
pub mod link;
pub mod notes;
pub mod remove;
pub mod status;
pub mod sync;

mod app;
