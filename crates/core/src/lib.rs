pub mod config;
pub mod error;
pub mod notify;
pub mod paths;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use notify::{LogNotifier, Notifier};
pub use paths::Paths;
pub use store::Store;
pub use types::{root_notes, Account, Note, NoteView};
