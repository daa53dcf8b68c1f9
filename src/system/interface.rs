use std::fmt;

/// A process identifier as used by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ProcessId(libc::pid_t);

impl ProcessId {
    /// Matches any child of the calling process when passed to `waitpid`.
    pub(crate) const ANY_CHILD: ProcessId = ProcessId(-1);

    pub(crate) fn new(id: libc::pid_t) -> Self {
        Self(id)
    }

    pub(crate) fn get(self) -> libc::pid_t {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
