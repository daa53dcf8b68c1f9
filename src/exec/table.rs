use std::sync::{
    atomic::{AtomicBool, Ordering},
    Condvar, Mutex,
};

use crate::common::Error;
use crate::system::{interface::ProcessId, kill, signal::consts::SIGKILL};

/// Upper bound on concurrently tracked child processes.
pub(crate) const MAX_RUNNING_PROCESSES: usize = 10;

/// Bounded registry of the children the interpreter considers running.
///
/// The main flow registers a child right after forking it; the reaper clears
/// the slot once the kernel reports termination. A foreground caller blocks
/// on [`ProcessTable::wait_clear`] until its child's slot is empty again.
pub(crate) struct ProcessTable {
    slots: Mutex<Slots>,
    cleared: Condvar,
}

struct Slots {
    entries: [Option<ProcessId>; MAX_RUNNING_PROCESSES],
    live: usize,
    // Terminations the reaper observed before the corresponding registration.
    // Consumed by `register`, so every pid is cleared exactly once no matter
    // which side wins the race.
    reaped_early: Vec<ProcessId>,
}

/// Outcome of registering a freshly forked child.
pub(crate) enum Registration {
    Tracked,
    /// The child terminated and was reaped before it could be registered.
    AlreadyReaped,
}

impl ProcessTable {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                entries: [None; MAX_RUNNING_PROCESSES],
                live: 0,
                reaped_early: Vec::new(),
            }),
            cleared: Condvar::new(),
        }
    }

    /// Whether `extra` more children fit without exceeding the capacity.
    pub(crate) fn has_capacity(&self, extra: usize) -> bool {
        let slots = self.slots.lock().unwrap();
        slots.live + extra <= MAX_RUNNING_PROCESSES
    }

    pub(crate) fn register(&self, pid: ProcessId) -> Result<Registration, Error> {
        let mut slots = self.slots.lock().unwrap();

        if let Some(index) = slots.reaped_early.iter().position(|&early| early == pid) {
            slots.reaped_early.swap_remove(index);
            return Ok(Registration::AlreadyReaped);
        }

        match slots.entries.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(pid);
                slots.live += 1;
                Ok(Registration::Tracked)
            }
            None => Err(Error::InsufficientResources),
        }
    }

    /// Clear the slot holding `pid` and wake foreground waiters.
    ///
    /// A pid that is not tracked is remembered instead, so a registration
    /// that lost the race against the reaper resolves immediately.
    pub(crate) fn unregister(&self, pid: ProcessId) {
        let mut slots = self.slots.lock().unwrap();
        match slots.entries.iter_mut().find(|slot| **slot == Some(pid)) {
            Some(slot) => {
                *slot = None;
                slots.live -= 1;
            }
            None => slots.reaped_early.push(pid),
        }
        drop(slots);
        self.cleared.notify_all();
    }

    /// Block until `pid` is no longer tracked.
    pub(crate) fn wait_clear(&self, pid: ProcessId) {
        let mut slots = self.slots.lock().unwrap();
        while slots.entries.contains(&Some(pid)) {
            slots = self.cleared.wait(slots).unwrap();
        }
    }

    /// Forcefully terminate every tracked child.
    pub(crate) fn kill_all(&self) {
        let slots = self.slots.lock().unwrap();
        for pid in slots.entries.iter().flatten() {
            kill(*pid, SIGKILL).ok();
        }
    }
}

/// The children of the pipeline currently being launched.
///
/// Kept separately from the process table so a stage that cannot be started
/// takes exactly its already-running siblings down with it.
pub(crate) struct PipelineGroup {
    pids: Mutex<Vec<ProcessId>>,
    aborted: AtomicBool,
}

impl PipelineGroup {
    pub(crate) fn new() -> Self {
        Self {
            pids: Mutex::new(Vec::new()),
            aborted: AtomicBool::new(false),
        }
    }

    /// Start tracking a new pipeline launch.
    pub(crate) fn begin(&self) {
        self.pids.lock().unwrap().clear();
        self.aborted.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record(&self, pid: ProcessId) {
        self.pids.lock().unwrap().push(pid);
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Raise the failure flag and terminate every recorded sibling.
    pub(crate) fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        for pid in self.pids.lock().unwrap().iter() {
            kill(*pid, SIGKILL).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{PipelineGroup, ProcessTable, Registration, MAX_RUNNING_PROCESSES};
    use crate::common::Error;
    use crate::system::interface::ProcessId;

    fn fake_pid(id: i32) -> ProcessId {
        ProcessId::new(100_000 + id)
    }

    #[test]
    fn register_fills_slots_up_to_capacity() {
        let table = ProcessTable::new();

        for id in 0..MAX_RUNNING_PROCESSES as i32 {
            assert!(matches!(
                table.register(fake_pid(id)),
                Ok(Registration::Tracked)
            ));
        }
        assert!(!table.has_capacity(1));
        assert!(matches!(
            table.register(fake_pid(99)),
            Err(Error::InsufficientResources)
        ));

        // existing entries survive the refusal
        table.unregister(fake_pid(0));
        assert!(table.has_capacity(1));
        assert!(matches!(
            table.register(fake_pid(99)),
            Ok(Registration::Tracked)
        ));
    }

    #[test]
    fn unknown_unregister_resolves_late_registration() {
        let table = ProcessTable::new();

        // reaper observed the termination first
        table.unregister(fake_pid(1));
        assert!(matches!(
            table.register(fake_pid(1)),
            Ok(Registration::AlreadyReaped)
        ));

        // the early termination was consumed: the pid registers normally now
        assert!(matches!(
            table.register(fake_pid(1)),
            Ok(Registration::Tracked)
        ));
    }

    #[test]
    fn wait_clear_returns_for_untracked_pid() {
        let table = ProcessTable::new();
        table.wait_clear(fake_pid(2));
    }

    #[test]
    fn wait_clear_blocks_until_unregistered() {
        let table = Arc::new(ProcessTable::new());
        let pid = fake_pid(3);
        assert!(matches!(table.register(pid), Ok(Registration::Tracked)));

        let reaper = {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                table.unregister(pid);
            })
        };

        table.wait_clear(pid);
        reaper.join().unwrap();
        assert!(table.has_capacity(MAX_RUNNING_PROCESSES));
    }

    #[test]
    fn aborted_flag_resets_per_pipeline() {
        let group = PipelineGroup::new();
        assert!(!group.is_aborted());

        group.abort();
        assert!(group.is_aborted());

        group.begin();
        assert!(!group.is_aborted());
    }
}
