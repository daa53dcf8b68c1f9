use std::io;
use std::sync::Arc;
use std::thread;

use crate::log::{dev_info, dev_warn};
use crate::system::interface::ProcessId;
use crate::system::signal::{consts::*, register_handlers, SignalStream};
use crate::system::wait::{Wait, WaitError, WaitOptions};

use super::{PipelineGroup, ProcessTable};

/// Install the streaming signal handlers and start the supervisor thread
/// that keeps the process table in sync with the kernel.
///
/// SIGCHLD reclaims terminated children, SIGUSR1 reports a pipeline stage
/// that could not be started, SIGINT ends the session.
pub(crate) fn start_reaper(table: Arc<ProcessTable>, group: Arc<PipelineGroup>) -> io::Result<()> {
    let stream = SignalStream::init()?;

    for handler in register_handlers([SIGCHLD, SIGUSR1, SIGINT])? {
        handler.forget();
    }

    thread::Builder::new()
        .name("reaper".into())
        .spawn(move || supervise(stream, &table, &group))?;

    Ok(())
}

fn supervise(stream: &'static SignalStream, table: &ProcessTable, group: &PipelineGroup) -> ! {
    loop {
        let info = match stream.recv() {
            Ok(info) => info,
            Err(err) => {
                dev_warn!("could not receive signal: {err}");
                continue;
            }
        };

        match info.signal() {
            SIGCHLD => reap(table),
            SIGUSR1 => {
                dev_info!("pipeline failure reported by {}", info.pid());
                group.abort();
            }
            SIGINT => {
                table.kill_all();
                std::process::exit(0);
            }
            _ => {}
        }
    }
}

/// Reclaim every child the kernel has finished with; several may have
/// terminated behind a single notification.
fn reap(table: &ProcessTable) {
    loop {
        match ProcessId::ANY_CHILD.wait(WaitOptions::new().no_hang()) {
            Ok((pid, status)) => {
                if status.did_exit() || status.was_signaled() {
                    dev_info!("reaped {pid} ({status:?})");
                    table.unregister(pid);
                }
            }
            Err(WaitError::NotReady) => break,
            // ECHILD: no children are left at all
            Err(WaitError::Io(_)) => break,
        }
    }
}
