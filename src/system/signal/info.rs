use crate::system::interface::ProcessId;

use super::SignalNumber;

/// Information related to the arrival of a signal.
#[repr(transparent)]
pub(crate) struct SignalInfo {
    info: libc::siginfo_t,
}

impl SignalInfo {
    pub(super) const SIZE: usize = std::mem::size_of::<Self>();

    /// Gets the PID that sent the signal.
    pub(crate) fn pid(&self) -> ProcessId {
        // SAFETY: the signals this interpreter streams all set si_pid.
        ProcessId::new(unsafe { self.info.si_pid() })
    }

    /// Gets the signal number.
    pub(crate) fn signal(&self) -> SignalNumber {
        self.info.si_signo
    }
}
