use core::fmt;
use std::{
    ffi::CStr,
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};

use crate::cutils::{cerr, string_from_ptr, sysconf};

use self::interface::ProcessId;
use self::signal::SignalNumber;

pub(crate) mod interface;

pub(crate) mod signal;

pub(crate) mod wait;

pub(crate) fn _exit(status: libc::c_int) -> ! {
    // SAFETY: `_exit` terminates the process and does not return.
    unsafe { libc::_exit(status) }
}

pub(crate) enum ForkResult {
    // Parent process branch with the child process' PID.
    Parent(ProcessId),
    // Child process branch.
    Child,
}

/// Create a new process.
pub(crate) fn fork() -> io::Result<ForkResult> {
    // SAFETY: `fork` is implemented using `clone` in linux so we don't need
    // to worry about signal safety.
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(ProcessId::new(pid)))
    }
}

/// Send a signal to a process with the specified ID.
pub(crate) fn kill(pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid
    // process ID or if `signal` is not a valid signal code.
    cerr(unsafe { libc::kill(pid.get(), signal) }).map(|_| ())
}

/// Get the parent process identifier for the current process.
pub(crate) fn getppid() -> ProcessId {
    // SAFETY: this function is always successful.
    ProcessId::new(unsafe { libc::getppid() })
}

/// Change the working directory of the current process.
pub(crate) fn chdir(path: &CStr) -> io::Result<()> {
    // SAFETY: `path` is a valid NUL-terminated string.
    cerr(unsafe { libc::chdir(path.as_ptr()) }).map(|_| ())
}

/// Create a pipe.
///
/// Both descriptors are close-on-exec; the `dup2` copies a child installs
/// over its standard streams do not inherit the flag, so an exec'd stage
/// keeps only the endpoints it was wired to.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0; 2];
    // SAFETY: `fds` provides space for exactly two descriptors.
    cerr(unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
    // SAFETY: `pipe2` returned successfully, so both descriptors are valid
    // and owned by us.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Replace the `target` descriptor with a copy of `fd`.
pub(crate) fn dup2<F: AsRawFd>(fd: &F, target: RawFd) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if either descriptor is
    // invalid.
    cerr(unsafe { libc::dup2(fd.as_raw_fd(), target) }).map(|_| ())
}

pub(crate) fn make_zeroed_sigaction() -> libc::sigaction {
    // SAFETY: since sigaction is a C struct, all-zeroes is a valid representation
    // We cannot use a "literal struct" initialization method since the exact
    // representation of libc::sigaction is not fixed
    unsafe { std::mem::zeroed() }
}

#[derive(Clone)]
pub(crate) struct Hostname {
    inner: String,
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl Hostname {
    pub(crate) fn resolve() -> Self {
        // see `man 2 gethostname`
        const MAX_HOST_NAME_SIZE_ACCORDING_TO_SUSV2: libc::c_long = 255;

        // POSIX.1 systems limit hostnames to `HOST_NAME_MAX` bytes
        // not including null-byte in the count
        let max_hostname_size = sysconf(libc::_SC_HOST_NAME_MAX)
            .unwrap_or(MAX_HOST_NAME_SIZE_ACCORDING_TO_SUSV2)
            as usize;

        let buffer_size = max_hostname_size + 1 /* null byte delimiter */ ;
        let mut buf = vec![0; buffer_size];

        // SAFETY: `buf` holds at least `buffer_size` bytes.
        match cerr(unsafe { libc::gethostname(buf.as_mut_ptr(), buffer_size) }) {
            // SAFETY: on success the buffer holds a NUL-terminated string.
            Ok(_) => Self {
                inner: unsafe { string_from_ptr(buf.as_ptr()) },
            },

            // we have chosen a `buffer_size` larger than `max_hostname_size`
            // so no truncation error is possible
            Err(_) => {
                panic!("Unexpected error while retrieving hostname, this should not happen");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Read;

    use super::{
        fork, kill, pipe,
        signal::consts::SIGKILL,
        wait::{Wait, WaitOptions},
        ForkResult, Hostname, _exit,
    };
    use crate::system::interface::ProcessId;

    #[test]
    fn fork_then_wait() {
        let ForkResult::Parent(child_pid) = fork().unwrap() else {
            _exit(7);
        };

        let (pid, status) = child_pid.wait(WaitOptions::new()).unwrap();
        assert_eq!(pid, child_pid);
        assert_eq!(status.exit_status(), Some(7));
    }

    #[test]
    fn kill_test() {
        let mut child = std::process::Command::new("/bin/sleep")
            .arg("1")
            .spawn()
            .unwrap();
        kill(ProcessId::new(child.id() as i32), SIGKILL).unwrap();
        assert!(!child.wait().unwrap().success());
    }

    #[test]
    fn pipe_roundtrip() {
        let (read, write) = pipe().unwrap();

        let mut writer = File::from(write);
        std::io::Write::write_all(&mut writer, b"through the pipe").unwrap();
        drop(writer);

        let mut output = String::new();
        File::from(read).read_to_string(&mut output).unwrap();
        assert_eq!(output, "through the pipe");
    }

    #[test]
    fn hostname_is_not_empty() {
        assert!(!Hostname::resolve().to_string().is_empty());
    }
}
