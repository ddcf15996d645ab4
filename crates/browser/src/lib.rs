//! Browser automation for account linking and profile-based note sync.
//!
//! - `driver`: chromedriver process lifecycle and the WebDriver command client
//! - `oauth`: OAuth capture monitor (login cookie polling)
//! - `profile`: on-disk profile catalog and the profile link monitor
//! - `scrape` / `batch`: headless note scraping for profile-linked accounts

pub mod batch;
pub mod driver;
pub mod monitor;
pub mod oauth;
pub mod profile;
pub mod scrape;

#[cfg(test)]
mod testing;

pub use batch::ProfileSync;
pub use driver::{Cookie, DriverManager};
pub use monitor::Pending;
pub use oauth::{OAuthCapture, OAuthCaptureMonitor};
pub use profile::{ProfileCatalog, ProfileLinkMonitor};
