// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Terminal control for interactive playback.
//!
//! While playing, stdin is switched to non-canonical no-echo mode with
//! non-blocking reads so single keystrokes (space, 's') arrive without a
//! newline; the scoped guard restores the original settings on exit, on
//! error, and on panic unwind.

use crate::player::KeySource;

/// Scoped raw-mode switch for stdin. Unix only; on other platforms the
/// player falls back to a keyless source.
#[cfg(unix)]
pub struct RawModeGuard {
    original: libc::termios,
}

#[cfg(unix)]
impl RawModeGuard {
    pub fn new() -> std::io::Result<Self> {
        let mut original = unsafe { std::mem::zeroed::<libc::termios>() };
        if unsafe { libc::tcgetattr(libc::STDIN_FILENO, &mut original) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        let mut raw = original;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        raw.c_cc[libc::VMIN] = 0; // non-blocking single-byte reads
        raw.c_cc[libc::VTIME] = 0;
        if unsafe { libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(Self { original })
    }
}

#[cfg(unix)]
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.original);
        }
    }
}

/// Key source polling raw stdin. Holds the raw-mode guard for its
/// lifetime.
#[cfg(unix)]
pub struct TerminalKeys {
    _guard: RawModeGuard,
}

#[cfg(unix)]
impl TerminalKeys {
    /// Switch stdin to raw mode; fails when stdin is not a terminal.
    pub fn new() -> std::io::Result<Self> {
        if unsafe { libc::isatty(libc::STDIN_FILENO) } == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "stdin is not a terminal",
            ));
        }
        Ok(Self {
            _guard: RawModeGuard::new()?,
        })
    }
}

#[cfg(unix)]
impl KeySource for TerminalKeys {
    fn poll(&mut self) -> Option<u8> {
        let mut byte = 0u8;
        let n = unsafe {
            libc::read(
                libc::STDIN_FILENO,
                (&mut byte as *mut u8).cast::<libc::c_void>(),
                1,
            )
        };
        (n == 1).then_some(byte)
    }
}
