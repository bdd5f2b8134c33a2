use derive_more::Display;

use crate::command::RedistributeCommand;
use crate::error::Result;

#[derive(Debug, Display, Copy, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    #[display(fmt = "utility")]
    Utility,

    #[display(fmt = "result code {}", _0)]
    Other(i32),
}

/// An isolated execution sub-session.
pub trait Session: Send {
    fn execute(&mut self, command: &RedistributeCommand) -> Result<ExecutionResult>;

    fn close(&mut self);
}

/// Opens execution sub-sessions.
pub trait Executor: Send + Sync {
    fn open(&self) -> Result<Box<dyn Session>>;
}

/// A session that is closed on every exit path.
pub struct ScopedSession {
    inner: Box<dyn Session>,
}

impl ScopedSession {
    pub fn open(executor: &dyn Executor) -> Result<Self> {
        Ok(Self {
            inner: executor.open()?,
        })
    }

    pub fn execute(&mut self, command: &RedistributeCommand) -> Result<ExecutionResult> {
        self.inner.execute(command)
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        self.inner.close();
    }
}
