// src/host/process.rs

//! Process execution rooted inside a snapshot

use super::{CommandOutput, CommandRunner, Invocation};
use crate::error::{Error, Result};
use nix::unistd::{chdir, chroot};
use std::ffi::CString;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use tracing::debug;

/// Spawns commands chrooted into a snapshot.
///
/// The child calls chroot(2) and chdir("/") between fork and exec, so the
/// program path and every library it loads resolve inside the snapshot.
#[derive(Debug, Clone, Default)]
pub struct ChrootRunner;

impl ChrootRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ChrootRunner {
    fn run_chrooted(&self, root: &Path, invocation: &Invocation) -> Result<CommandOutput> {
        debug!("Executing in {}: {}", root.display(), invocation);

        let root_c = CString::new(root.as_os_str().as_bytes()).map_err(|e| {
            Error::CommandFault {
                program: invocation.program_name(),
                code: 127,
                stderr: format!("Invalid chroot path: {}", e),
            }
        })?;

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // SAFETY: chroot(2) and chdir(2) are async-signal-safe and the path
        // was converted to a CString before forking.
        unsafe {
            cmd.pre_exec(move || {
                chroot(root_c.as_c_str()).map_err(io::Error::from)?;
                chdir(c"/").map_err(io::Error::from)?;
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(|e| Error::CommandFault {
            program: invocation.program_name(),
            code: 127,
            stderr: format!("Failed to spawn {}: {}", invocation.program.display(), e),
        })?;

        let stdout = child.stdout.take().map(|out| drain_lines("stdout", out));
        let stderr = child.stderr.take().map(|err| drain_lines("stderr", err));

        let status = child.wait()?;
        let stdout = join_output(stdout);
        let stderr = join_output(stderr);

        let code = status
            .code()
            .unwrap_or_else(|| 128 + status.signal().unwrap_or(0));
        Ok(CommandOutput {
            code,
            stdout,
            stderr,
        })
    }
}

/// Read a pipe to EOF on its own thread, logging each line
fn drain_lines<R: Read + Send + 'static>(
    stream: &'static str,
    pipe: R,
) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut captured = String::new();
        for line in BufReader::new(pipe).lines() {
            let Ok(line) = line else { break };
            debug!(target: "legendary::chroot", "[{}] {}", stream, line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
