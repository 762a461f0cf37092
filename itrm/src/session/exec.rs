// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! External programs the master asks a slave to run.
//!
//! The command runs on a helper thread. The caller gets back the read end of a socket
//! pair, which becomes readable (EOF) once the command has exited and the delete-after
//! file is gone. Registering that end with the scheduler is how a foreground exec learns
//! it may unblock the terminal.

use crate::ExecMode;
use std::{io::{self, Write as _},
          os::unix::{net::UnixStream, process::CommandExt as _},
          path::PathBuf,
          process::Command,
          thread};

/// A decoded exec frame, ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub mode: ExecMode,
    pub command: String,
    pub delete_after: Option<PathBuf>,
}

impl ExecRequest {
    #[must_use]
    pub fn new(mode: ExecMode, command: &[u8], delete_after: &[u8]) -> Self {
        Self {
            mode,
            command: String::from_utf8_lossy(command).into_owned(),
            delete_after: (!delete_after.is_empty())
                .then(|| PathBuf::from(String::from_utf8_lossy(delete_after).into_owned())),
        }
    }

    /// Removes the delete-after file without running anything, used when the request
    /// is refused.
    pub fn discard(&self) { remove_delete_after(self.delete_after.as_ref()); }
}

fn remove_delete_after(path: Option<&PathBuf>) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(message = "delete-after file not removed", path = ?path, error = ?e);
    }
}

/// Starts `request` with `sh -c` on a helper thread.
///
/// [`ExecMode::NewWindow`] commands get their own process group so they outlive the
/// terminal they were started from.
///
/// # Errors
///
/// The OS error if the socket pair or the thread can't be created. Failing to spawn the
/// shell itself is only logged, the returned handle still signals completion.
pub fn spawn_exec(request: ExecRequest) -> io::Result<UnixStream> {
    let (done_read, mut done_write) = UnixStream::pair()?;
    done_read.set_nonblocking(true)?;

    thread::Builder::new()
        .name("itrm-exec".into())
        .spawn(move || {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&request.command);
            if request.mode == ExecMode::NewWindow {
                command.process_group(0);
            }

            let success = match command.status() {
                Ok(status) => {
                    tracing::debug!(
                        message = "exec finished",
                        mode = %request.mode,
                        status = %status
                    );
                    status.success()
                }
                Err(e) => {
                    tracing::warn!(message = "exec failed", command = request.command, error = ?e);
                    false
                }
            };

            remove_delete_after(request.delete_after.as_ref());
            // Peer may be gone already, the EOF below is what matters.
            let _unused = done_write.write_all(&[u8::from(success)]);
        })?;

    Ok(done_read)
}
