use crate::error::Result;
use crate::types::{Account, Note};

/// Persistence for accounts and their notes.
///
/// Notes are never merged: a sync replaces the full set for one email through
/// [`Store::replace_notes`], which must apply the delete and the inserts as a
/// single commit.
pub trait Store: Send + Sync {
    fn accounts(&self) -> Result<Vec<Account>>;

    fn account(&self, email: &str) -> Result<Option<Account>>;

    /// Insert or overwrite the account keyed by its email.
    fn upsert_account(&self, account: &Account) -> Result<()>;

    fn delete_account(&self, email: &str) -> Result<()>;

    fn notes(&self, email: &str) -> Result<Vec<Note>>;

    fn all_notes(&self) -> Result<Vec<Note>>;

    fn replace_notes(&self, email: &str, notes: &[Note]) -> Result<()>;

    fn delete_notes(&self, email: &str) -> Result<()>;
}
