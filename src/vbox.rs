//! Process-level access to the hypervisor control utility.

use std::process::Command;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::debug;

/// Anything that can run a control utility subcommand and hand back the
/// text it printed.
///
/// The orchestrator only ever sees this trait. Tests substitute canned
/// transcripts; production uses [`VBoxManage`].
pub trait Hypervisor {
    /// Run the utility with `args` and return combined stdout and stderr.
    ///
    /// An `Err` means the utility could not be invoked at all. A run that
    /// printed an error message is still `Ok`; callers scrape the text to
    /// tell success from failure, same as a human at a terminal would.
    fn run(&self, args: &[&str]) -> Result<String>;
}

#[cfg(windows)]
const VBOXMANAGE: &str = "C:/Program Files/Oracle/VirtualBox/VBoxManage.exe";
#[cfg(not(windows))]
const VBOXMANAGE: &str = "VBoxManage";

/// Runs the real `VBoxManage` binary.
pub struct VBoxManage {
    binary: &'static str,
}

impl VBoxManage {
    /// Construct a new runner for the platform's `VBoxManage`.
    pub fn new() -> Self {
        Self { binary: VBOXMANAGE }
    }
}

impl Default for VBoxManage {
    fn default() -> Self {
        Self::new()
    }
}

impl Hypervisor for VBoxManage {
    fn run(&self, args: &[&str]) -> Result<String> {
        debug!("{} {}", self.binary, redact(args));

        let output = Command::new(self.binary)
            .args(args)
            .output()
            .with_context(|| format!("Failed to run {}", self.binary))?;

        // The utility splits its chatter between the two streams. Callers
        // scrape for markers, so hand them everything.
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(text)
    }
}

/// Render `args` for logging with secrets masked.
///
/// The argument after `--password` is the guest password and the argument
/// after `-c` is the guest command, which embeds the password again.
fn redact(args: &[&str]) -> String {
    let mut masked = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for &arg in args {
        if hide_next {
            masked.push("<redacted>");
            hide_next = false;
            continue;
        }

        masked.push(arg);
        hide_next = matches!(arg, "--password" | "-c");
    }

    masked.iter().join(" ")
}
