//! Scrapers for the text the hypervisor control utility prints.
//!
//! The utility has no machine-oriented interface beyond `showvminfo
//! --machinereadable`, so everything in here works on captured stdout.
//! Scrapers are strict: output that does not look like what the utility
//! prints today is an error, not a guess.

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::vmupdate::Machine;

/// Marker the utility prints once a machine has been started.
pub const STARTED_MARKER: &str = "successfully started";
/// Marker the utility prints when a guest command could not be run.
pub const ERROR_MARKER: &str = "error:";
/// Power state reported for a machine that is fully off.
pub const POWERED_OFF: &str = "poweroff";
/// Machine-readable key holding the power state.
pub const VMSTATE_KEY: &str = "VMState";
/// Machine-readable key holding the guest OS type.
pub const OSTYPE_KEY: &str = "ostype";

/// Parse the machine listing into name/UUID pairs.
///
/// Each entry looks like:
///
/// ```text
/// "focal server" {8a3b4cb0-2b17-4e35-b9eb-e9162c3f9f85}
/// ```
///
/// The first blank line ends the listing. Any other line that does not
/// match the shape fails the whole parse, on the theory that a layout
/// change in the utility should stop the run rather than silently skip
/// machines.
pub fn machines(text: &str) -> Result<Vec<Machine>> {
    // Unwrap is ok b/c pattern is static
    let re = Regex::new(concat!(
        r#"^"(?P<name>[^"]+)" "#,
        r"\{(?P<uuid>[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}",
        r"-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\}$"
    ))
    .unwrap();

    let mut machines = Vec::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }

        let caps = re
            .captures(line)
            .with_context(|| format!("Failed to parse machine listing entry: {}", line))?;
        machines.push(Machine {
            name: caps["name"].to_string(),
            uuid: caps["uuid"].to_string(),
        });
    }

    Ok(machines)
}

/// Captured `showvminfo --machinereadable` output.
///
/// Lines look like `VMState="running"`. Lookups scan the capture each
/// time; the handful of keys we read does not justify building a map.
pub struct MachineInfo(String);

impl MachineInfo {
    /// Wrap raw `showvminfo` output.
    pub fn new(text: String) -> Self {
        Self(text)
    }

    /// Return the unquoted value for `key`.
    ///
    /// Matches whole keys only, so asking for `VMState` does not get
    /// fooled by `VMStateChangeTime`.
    pub fn value(&self, key: &str) -> Result<&str> {
        for line in self.0.lines() {
            let line = line.trim_end_matches('\r');
            let rest = match line.strip_prefix(key) {
                Some(r) => r,
                None => continue,
            };
            let rest = match rest.strip_prefix('=') {
                Some(r) => r,
                None => continue,
            };

            // Values are wrapped in double quotes
            let open = rest.find('"');
            let close = rest.rfind('"');
            match (open, close) {
                (Some(o), Some(c)) if c > o => return Ok(&rest[o + 1..c]),
                _ => bail!("Malformed value for key '{}': {}", key, line),
            }
        }

        bail!("Key '{}' not found in machine info", key)
    }
}

/// Whether `text` carries `marker` anywhere in it.
///
/// The utility mixes its own messages with guest output, so substring
/// search is the only stable test.
pub fn contains_marker(text: &str, marker: &str) -> bool {
    text.contains(marker)
}
