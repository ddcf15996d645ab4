//! Captures the OAuth token Google sets after an embedded-setup sign-in.

use keepsync_core::config::LinksConfig;
use keepsync_core::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::DriverManager;
use crate::monitor::{MonitorSlot, Pending};

const OAUTH_COOKIE: &str = "oauth_token";
const SETUP_PROFILE_DIRECTORY: &str = "Default";
const EMAIL_SCRIPT: &str = "const e = document.querySelector('[data-email]'); \
     return e ? e.getAttribute('data-email') : null;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCapture {
    pub email: String,
    pub oauth_token: String,
}

pub struct OAuthCaptureMonitor {
    driver: Arc<DriverManager>,
    setup_url: String,
    poll_interval: Duration,
    slot: MonitorSlot,
}

impl OAuthCaptureMonitor {
    pub fn new(driver: Arc<DriverManager>, links: &LinksConfig) -> Self {
        Self {
            driver,
            setup_url: links.setup_url.clone(),
            poll_interval: Duration::from_millis(links.poll_interval_ms),
            slot: MonitorSlot::default(),
        }
    }

    /// Open the sign-in page and start polling its cookies.
    pub async fn start(&self) -> Result<Pending<OAuthCapture>> {
        let mut slot = self.slot.lock().await;
        slot.stop().await;

        self.driver.delete_all_sessions().await;
        let session_id = self
            .driver
            .launch_browser(&self.setup_url, false, SETUP_PROFILE_DIRECTORY)
            .await?;
        debug!(session = %session_id, "OAuth capture monitor started");

        let (tx, pending) = Pending::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(watch_cookies(
            self.driver.clone(),
            session_id,
            self.poll_interval,
            cancel.clone(),
            tx,
        ));
        slot.set(cancel, task);
        Ok(pending)
    }

    pub async fn stop(&self) {
        self.slot.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.slot.is_running().await
    }
}

async fn watch_cookies(
    driver: Arc<DriverManager>,
    session_id: String,
    interval: Duration,
    cancel: CancellationToken,
    tx: oneshot::Sender<OAuthCapture>,
) {
    let captured = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            _ = tokio::time::sleep(interval) => {}
        }

        let cookies = match driver.cookies(&session_id).await {
            Ok(cookies) => cookies,
            Err(e) => {
                info!(error = %e, "Sign-in window unavailable, stopping OAuth capture");
                break None;
            }
        };

        let Some(token) = cookies.into_iter().find(|c| c.name == OAUTH_COOKIE) else {
            continue;
        };

        if cancel.is_cancelled() {
            break None;
        }

        match driver.execute_script(&session_id, EMAIL_SCRIPT).await {
            Ok(Some(email)) => {
                break Some(OAuthCapture {
                    email,
                    oauth_token: token.value,
                })
            }
            Ok(None) => {
                warn!("OAuth cookie present but no account email on the page");
                break None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read account email");
                break None;
            }
        }
    };

    match captured {
        Some(capture) => {
            driver.cleanup().await;
            info!(email = %capture.email, "OAuth token captured");
            if tx.send(capture).is_err() {
                warn!("OAuth capture dropped, nobody waiting");
            }
        }
        None => driver.delete_session(&session_id).await,
    }
}
