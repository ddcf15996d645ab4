//! Plumbing shared by the link monitors: a single-result handle and a slot
//! holding at most one running poll task.

use tokio::sync::{oneshot, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Result of a monitor run. Resolves to `None` if the run was aborted or stopped.
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Pending<T> {
    pub(crate) fn channel() -> (oneshot::Sender<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub async fn wait(self) -> Option<T> {
        self.rx.await.ok()
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct MonitorSlot {
    running: Mutex<Option<Running>>,
}

impl MonitorSlot {
    /// Lock the slot for a whole start. Concurrent starts queue here.
    pub(crate) async fn lock(&self) -> SlotGuard<'_> {
        SlotGuard {
            guard: self.running.lock().await,
        }
    }

    pub(crate) async fn stop(&self) {
        self.lock().await.stop().await;
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false)
    }
}

pub(crate) struct SlotGuard<'a> {
    guard: MutexGuard<'a, Option<Running>>,
}

impl SlotGuard<'_> {
    /// Cancel the previous run, if any, and wait for it to wind down.
    pub(crate) async fn stop(&mut self) {
        if let Some(running) = self.guard.take() {
            running.cancel.cancel();
            let _ = running.task.await;
        }
    }

    pub(crate) fn set(&mut self, cancel: CancellationToken, task: JoinHandle<()>) {
        *self.guard = Some(Running { cancel, task });
    }
}
