//! Worker creation strategies used by the autoscaler.
//!
//! A [`ProcessManager`] starts one worker per call and hands back an opaque
//! [`ProcessRef`]; killing a ref blocks until that worker has terminated.

pub mod subprocess;
pub mod task;

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::receiver::{MessageHandler, Receiver};

pub use subprocess::{ChildHandle, SubprocessManager};
pub use task::{TaskHandle, TaskProcessManager};

/// What a new worker runs: the shared receiver feeding the handler.
#[derive(Clone)]
pub struct CreateProcessArgs {
    pub receiver: Arc<dyn Receiver>,
    pub handler: Arc<dyn MessageHandler>,
}

impl CreateProcessArgs {
    pub fn new(receiver: Arc<dyn Receiver>, handler: Arc<dyn MessageHandler>) -> Self {
        Self { receiver, handler }
    }
}

pub enum ProcessManager {
    /// In-process tokio task with its own cancellation token.
    Task(TaskProcessManager),
    /// External command, stopped by signal.
    Subprocess(SubprocessManager),
}

impl ProcessManager {
    pub fn task() -> Self {
        ProcessManager::Task(TaskProcessManager::new())
    }

    pub fn subprocess(manager: SubprocessManager) -> Self {
        ProcessManager::Subprocess(manager)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProcessManager::Task(_) => "task",
            ProcessManager::Subprocess(_) => "subprocess",
        }
    }

    pub async fn create_process(&self, args: CreateProcessArgs) -> Result<ProcessRef> {
        match self {
            ProcessManager::Task(manager) => Ok(ProcessRef::Task(manager.create_process(args))),
            ProcessManager::Subprocess(manager) => {
                Ok(ProcessRef::Subprocess(manager.create_process(args)?))
            }
        }
    }

    /// Stop the worker and wait for it to terminate.
    pub async fn kill_process(&self, process: ProcessRef) -> Result<()> {
        match (self, process) {
            (ProcessManager::Task(manager), ProcessRef::Task(handle)) => {
                manager.kill_process(handle).await
            }
            (ProcessManager::Subprocess(manager), ProcessRef::Subprocess(handle)) => {
                manager.kill_process(handle).await
            }
            (manager, process) => Err(Error::Process(format!(
                "{} manager cannot kill worker {}",
                manager.kind(),
                process.id()
            ))),
        }
    }
}

/// Handle to a running worker.
pub enum ProcessRef {
    Task(TaskHandle),
    Subprocess(ChildHandle),
}

impl ProcessRef {
    pub fn id(&self) -> Uuid {
        match self {
            ProcessRef::Task(handle) => handle.id(),
            ProcessRef::Subprocess(handle) => handle.id(),
        }
    }
}
