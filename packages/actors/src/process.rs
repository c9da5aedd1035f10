//! Workers as child OS processes.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};

use crate::messages::TaskError;
use crate::pool::{Liveness, TaskFuture, TaskHandle, TaskSpawner};

/// Launches `program args...` as a child process per worker.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-run the current executable with `args`.
    pub fn current_exe(
        args: impl IntoIterator<Item = impl Into<OsString>>,
    ) -> Result<Self, TaskError> {
        Ok(Self::new(std::env::current_exe()?, args))
    }

    fn launch(&self) -> Result<ProcessHandle, TaskError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id().ok_or(TaskError::NoPid)?;

        Ok(ProcessHandle {
            id: pid.to_string(),
            child,
        })
    }
}

impl TaskSpawner for ProcessSpawner {
    fn spawn(&self) -> Result<Box<dyn TaskHandle>, TaskError> {
        Ok(Box::new(self.launch()?))
    }
}

/// A running worker process, identified by its pid.
#[derive(Debug)]
pub struct ProcessHandle {
    id: String,
    child: Child,
}

impl TaskHandle for ProcessHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn poll(&mut self) -> Result<Liveness, TaskError> {
        Ok(match self.child.try_wait()? {
            Some(status) => Liveness::Exited(status.code()),
            None => Liveness::Running,
        })
    }

    fn terminate(&mut self) -> Result<(), TaskError> {
        // No pid once the child has been reaped; it may belong to someone else.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            // Already gone
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(TaskError::Signal { pid, errno }),
        }
    }

    fn wait(&mut self) -> TaskFuture<'_, Option<i32>> {
        Box::pin(async move { Ok(self.child.wait().await?.code()) })
    }
}
