//! Pseudo-terminal forwarding for `--pty`
//!
//! The unit gets the slave side as its TTYPath; we copy the master side to
//! our stdout and our stdin into it. Output is fully forwarded once the
//! master reports hangup, i.e. every slave fd has been closed.
//!
//! ```text
//!   stdin ──► [input thread] ──► master ◄══► slave (unit's tty)
//!   stdout ◄── [output thread] ◄── master
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, IntoRawFd};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg, Termios};

/// Something whose buffered output must be flushed before a unit counts
/// as finished
pub trait OutputDrain {
    /// Terminal device the unit should be attached to
    fn tty_path(&self) -> &str;

    /// True once everything the unit wrote has been forwarded
    fn drain(&mut self) -> bool;
}

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Failed to allocate pseudo-terminal: {0}")]
    Allocate(#[from] nix::Error),

    #[error("Failed to set up pseudo-terminal forwarding: {0}")]
    Io(#[from] io::Error),
}

pub struct PtyForward {
    tty_path: String,
    /// Our stdin's settings before switching it to raw mode
    saved_termios: Option<Termios>,
    hangup: Arc<AtomicBool>,
    last_char: Arc<AtomicU8>,
    wrote_any: Arc<AtomicBool>,
    output: Option<JoinHandle<()>>,
}

impl PtyForward {
    /// Allocate a pty and start forwarding between it and our stdio
    pub fn open() -> Result<Self, PtyError> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)?;
        grantpt(&master)?;
        unlockpt(&master)?;
        let tty_path = ptsname_r(&master)?;

        copy_window_size(master.as_raw_fd());

        // SAFETY: into_raw_fd hands over sole ownership of the descriptor
        let master = unsafe { File::from_raw_fd(master.into_raw_fd()) };
        let input = master.try_clone()?;

        let saved_termios = make_stdin_raw();

        let hangup = Arc::new(AtomicBool::new(false));
        let last_char = Arc::new(AtomicU8::new(0));
        let wrote_any = Arc::new(AtomicBool::new(false));

        let output = {
            let hangup = hangup.clone();
            let last_char = last_char.clone();
            let wrote_any = wrote_any.clone();
            std::thread::Builder::new()
                .name("pty-output".into())
                .spawn(move || forward_output(master, hangup, last_char, wrote_any))?
        };

        // Blocks on our stdin for as long as the process lives, never joined
        std::thread::Builder::new()
            .name("pty-input".into())
            .spawn(move || forward_input(input))?;

        log::debug!("Allocated pseudo-terminal {}", tty_path);

        Ok(Self {
            tty_path,
            saved_termios,
            hangup,
            last_char,
            wrote_any,
            output: Some(output),
        })
    }

    /// Last byte written to our stdout, if any
    pub fn last_char(&self) -> Option<u8> {
        if self.wrote_any.load(Ordering::Acquire) {
            Some(self.last_char.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Restore the terminal and end the output on a line boundary
    pub fn finish(mut self, quiet: bool) {
        self.restore_termios();
        if !quiet && matches!(self.last_char(), Some(c) if c != b'\n') {
            let mut stdout = io::stdout();
            let _ = stdout.write_all(b"\n").and_then(|_| stdout.flush());
        }
    }

    fn restore_termios(&mut self) {
        if let Some(termios) = self.saved_termios.take() {
            if let Err(e) = tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, &termios) {
                log::warn!("Failed to restore terminal settings: {}", e);
            }
        }
    }
}

impl OutputDrain for PtyForward {
    fn tty_path(&self) -> &str {
        &self.tty_path
    }

    fn drain(&mut self) -> bool {
        if !self.hangup.load(Ordering::Acquire) {
            return false;
        }
        if let Some(handle) = self.output.take() {
            let _ = handle.join();
        }
        true
    }
}

impl Drop for PtyForward {
    fn drop(&mut self) {
        self.restore_termios();
    }
}

fn copy_window_size(master: i32) {
    let mut ws: libc::winsize = unsafe { std::mem::zeroed() };
    // SAFETY: TIOCGWINSZ/TIOCSWINSZ only read or write the winsize struct
    unsafe {
        if libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut ws) == 0 {
            libc::ioctl(master, libc::TIOCSWINSZ, &ws);
        }
    }
}

fn make_stdin_raw() -> Option<Termios> {
    let stdin = io::stdin();
    let saved = tcgetattr(stdin.as_fd()).ok()?;
    let mut raw = saved.clone();
    cfmakeraw(&mut raw);
    match tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw) {
        Ok(()) => Some(saved),
        Err(e) => {
            log::debug!("Not switching stdin to raw mode: {}", e);
            None
        }
    }
}

fn forward_output(
    mut master: File,
    hangup: Arc<AtomicBool>,
    last_char: Arc<AtomicU8>,
    wrote_any: Arc<AtomicBool>,
) {
    let mut stdout = io::stdout();
    let mut buf = [0u8; 4096];
    loop {
        match master.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = stdout.write_all(&buf[..n]).and_then(|_| stdout.flush()) {
                    log::debug!("Failed to write to stdout: {}", e);
                    break;
                }
                last_char.store(buf[n - 1], Ordering::Release);
                wrote_any.store(true, Ordering::Release);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // all slave fds closed
            Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
            Err(e) => {
                log::debug!("Failed to read from pseudo-terminal: {}", e);
                break;
            }
        }
    }
    hangup.store(true, Ordering::Release);
}

fn forward_input(mut master: File) {
    let mut stdin = io::stdin();
    let mut buf = [0u8; 1024];
    loop {
        match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if master.write_all(&buf[..n]).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}
