//! Utilities to handle signals.
mod handler;
mod info;
mod set;
mod stream;

use std::ffi::c_int;

pub(crate) use handler::{SignalHandler, SignalHandlerBehavior};
pub(crate) use info::SignalInfo;
pub(crate) use stream::{register_handlers, SignalStream};

pub(crate) type SignalNumber = c_int;

/// Restore the default action for the given signals.
///
/// A freshly forked child calls this so inherited handlers do not keep
/// feeding the interpreter's signal stream.
pub(crate) fn reset_to_default<const N: usize>(signals: [SignalNumber; N]) {
    for signal in signals {
        if let Ok(handler) = SignalHandler::register(signal, SignalHandlerBehavior::Default) {
            handler.forget();
        }
    }
}

macro_rules! define_consts {
    ($($signal:ident,)*) => {
        pub(crate) mod consts {
            pub(crate) use libc::{$($signal,)*};
        }

        pub(crate) fn signal_name(signal: SignalNumber) -> &'static str {
            match signal {
                $(consts::$signal => stringify!($signal),)*
                _ => "unknown signal",
            }
        }
    };
}

define_consts! {
    SIGINT,
    SIGCHLD,
    SIGUSR1,
    SIGKILL,
    SIGSTOP,
}
