//! Workers as tokio tasks.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::CreateProcessArgs;

/// Spawns each worker as a task running the receiver once.
///
/// The receiver is expected to loop (e.g. a retrying receiver), so the task
/// lives until its token is cancelled or the receiver gives up.
#[derive(Debug, Default)]
pub struct TaskProcessManager;

impl TaskProcessManager {
    pub fn new() -> Self {
        Self
    }

    pub fn create_process(&self, args: CreateProcessArgs) -> TaskHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let CreateProcessArgs { receiver, handler } = args;

        let join = tokio::spawn(async move {
            debug!(worker = %id, "worker started");
            let result = receiver.receive(handler, &token).await;
            match &result {
                Ok(()) => debug!(worker = %id, "worker exited"),
                Err(e) => error!(worker = %id, error = %e, "worker failed"),
            }
            result
        });

        TaskHandle { id, cancel, join }
    }

    /// Cancel the worker's token and wait for the task to finish.
    ///
    /// An error the worker itself returned was already logged and is not
    /// a kill failure.
    pub async fn kill_process(&self, handle: TaskHandle) -> Result<()> {
        handle.cancel.cancel();
        match handle.join.await {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::Process(format!("worker {} panicked: {e}", handle.id))),
        }
    }
}

pub struct TaskHandle {
    id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<Result<()>>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}
