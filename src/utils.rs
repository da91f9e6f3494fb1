//! Utility functions for reporting on finished processes.

use std::process::ExitStatus;

/// Shell-style exit code for a finished child: its own code, or
/// 128 + signal number when it was killed by a signal.
pub fn exit_code(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return (code & 0xff) as u8;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128u8.wrapping_add(signal as u8);
        }
    }
    1
}
