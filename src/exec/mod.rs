#![deny(unsafe_code)]

mod pipeline;
mod reaper;
mod table;

use std::io::{self, Write};
use std::os::fd::BorrowedFd;
use std::os::unix::process::CommandExt;
use std::process::Command;

use crate::common::Error;
use crate::log::user_error;
use crate::system::interface::ProcessId;
use crate::system::signal::{self, consts::*};
use crate::system::{_exit, dup2, fork, getppid, kill, ForkResult};

pub(crate) use pipeline::PipeChain;
pub(crate) use reaper::start_reaper;
pub(crate) use table::{PipelineGroup, ProcessTable, Registration, MAX_RUNNING_PROCESSES};

/// What a forked child should become.
pub(crate) enum ChildTask<'a> {
    /// Replace the child with an external program.
    Program(&'a [String]),
    /// Run a built-in handler and exit with its status.
    Builtin(&'a dyn Fn() -> i32),
}

/// Standard stream endpoints for a child; `None` inherits the interpreter's.
pub(crate) struct StageIo<'a> {
    pub(crate) input: Option<BorrowedFd<'a>>,
    pub(crate) output: Option<BorrowedFd<'a>>,
}

impl StageIo<'_> {
    pub(crate) const INHERIT: StageIo<'static> = StageIo {
        input: None,
        output: None,
    };
}

/// Fork a child for one command or pipeline stage, wire its standard
/// streams, and register it in the process table.
///
/// The child branch never returns: it either becomes the external program or
/// runs the built-in and exits in place, so the parent can never continue as
/// a second interpreter. A stage that cannot exec reports the error from the
/// child and, inside a pipeline, signals the interpreter so the launch is
/// abandoned and the siblings are terminated.
pub(crate) fn spawn(
    task: ChildTask<'_>,
    io: StageIo<'_>,
    table: &ProcessTable,
    group: Option<&PipelineGroup>,
) -> Result<ProcessId, Error> {
    if !table.has_capacity(1) {
        return Err(Error::InsufficientResources);
    }

    // the child shares the parent's pending output; flush it so nothing is
    // written twice
    let _ = io::stdout().flush();

    match fork().map_err(Error::from)? {
        ForkResult::Child => child_main(task, io, group.is_some()),
        ForkResult::Parent(pid) => match table.register(pid) {
            Ok(_) => {
                if let Some(group) = group {
                    group.record(pid);
                }
                Ok(pid)
            }
            Err(err) => {
                // the capacity check above makes this unreachable; never
                // leave a forked child untracked
                kill(pid, SIGKILL).ok();
                Err(err)
            }
        },
    }
}

fn child_main(task: ChildTask<'_>, io: StageIo<'_>, in_pipeline: bool) -> ! {
    // the child must not feed the interpreter's signal stream
    signal::reset_to_default([SIGCHLD, SIGUSR1, SIGINT]);

    if let Some(fd) = io.input {
        if let Err(err) = dup2(&fd, libc::STDIN_FILENO) {
            user_error!("cannot redirect standard input: {err}");
        }
    }
    if let Some(fd) = io.output {
        if let Err(err) = dup2(&fd, libc::STDOUT_FILENO) {
            user_error!("cannot redirect standard output: {err}");
        }
    }

    match task {
        ChildTask::Builtin(run) => {
            let status = run();
            let _ = io::stdout().flush();
            _exit(status)
        }
        ChildTask::Program(argv) => {
            let err = Command::new(&argv[0]).args(&argv[1..]).exec();
            user_error!("{}: {err}", argv[0]);
            if in_pipeline {
                kill(getppid(), SIGUSR1).ok();
            }
            _exit(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Read;
    use std::os::fd::AsFd;

    use super::{
        spawn, ChildTask, PipeChain, PipelineGroup, ProcessTable, Registration, StageIo,
        MAX_RUNNING_PROCESSES,
    };
    use crate::common::Error;
    use crate::system::interface::ProcessId;
    use crate::system::pipe;
    use crate::system::signal::consts::SIGKILL;
    use crate::system::wait::{Wait, WaitOptions};

    #[test]
    fn spawn_program_writes_through_pipe() {
        let table = ProcessTable::new();
        let (read, write) = pipe().unwrap();

        let argv = vec!["echo".to_string(), "pipeline".to_string()];
        let io = StageIo {
            input: None,
            output: Some(write.as_fd()),
        };
        let pid = spawn(ChildTask::Program(&argv), io, &table, None).unwrap();
        drop(write);

        let (_, status) = pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(status.exit_status(), Some(0));

        let mut output = String::new();
        File::from(read).read_to_string(&mut output).unwrap();
        assert_eq!(output, "pipeline\n");

        table.unregister(pid);
    }

    #[test]
    fn spawn_builtin_exits_with_handler_status() {
        let table = ProcessTable::new();

        let pid = spawn(ChildTask::Builtin(&|| 23), StageIo::INHERIT, &table, None).unwrap();

        let (_, status) = pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(status.exit_status(), Some(23));

        table.unregister(pid);
    }

    #[test]
    fn exec_failure_terminates_the_child() {
        let table = ProcessTable::new();

        let argv = vec!["oxsh-test-program-that-does-not-exist".to_string()];
        let pid = spawn(ChildTask::Program(&argv), StageIo::INHERIT, &table, None).unwrap();

        let (_, status) = pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(status.exit_status(), Some(1));

        table.unregister(pid);
    }

    #[test]
    fn pipeline_output_composes_left_to_right() {
        let table = ProcessTable::new();
        let mut chain = PipeChain::open(2).unwrap();
        let (capture_read, capture_write) = pipe().unwrap();

        let first = vec!["echo".to_string(), "pipeline text".to_string()];
        let head = spawn(ChildTask::Program(&first), chain.stage_io(0, 2), &table, None).unwrap();

        let second = vec!["tr".to_string(), "a-z".to_string(), "A-Z".to_string()];
        let mut io = chain.stage_io(1, 2);
        io.output = Some(capture_write.as_fd());
        let tail = spawn(ChildTask::Program(&second), io, &table, None).unwrap();
        chain.close_upstream(1);
        drop(chain);
        drop(capture_write);

        let mut transformed = String::new();
        File::from(capture_read)
            .read_to_string(&mut transformed)
            .unwrap();
        assert_eq!(transformed, "PIPELINE TEXT\n");

        for pid in [head, tail] {
            let (_, status) = pid.wait(WaitOptions::new()).unwrap();
            assert_eq!(status.exit_status(), Some(0));
            table.unregister(pid);
        }
    }

    #[test]
    fn abort_kills_recorded_siblings() {
        let table = ProcessTable::new();
        let group = PipelineGroup::new();
        group.begin();

        let argv = vec!["sleep".to_string(), "5".to_string()];
        let pid = spawn(ChildTask::Program(&argv), StageIo::INHERIT, &table, Some(&group)).unwrap();

        group.abort();

        let (_, status) = pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(status.term_signal(), Some(SIGKILL));
        table.unregister(pid);
    }

    #[test]
    fn spawn_refuses_past_capacity() {
        let table = ProcessTable::new();
        for id in 0..MAX_RUNNING_PROCESSES as i32 {
            assert!(matches!(
                table.register(ProcessId::new(200_000 + id)),
                Ok(Registration::Tracked)
            ));
        }

        let argv = vec!["echo".to_string()];
        let denied = spawn(ChildTask::Program(&argv), StageIo::INHERIT, &table, None);
        assert!(matches!(denied, Err(Error::InsufficientResources)));
    }
}
