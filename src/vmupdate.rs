use std::fmt;
use std::sync::mpsc::Sender;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};
use serde_derive::Serialize;
use tinytemplate::{format_unescaped, TinyTemplate};

use crate::config::{Timing, UpdateConfig};
use crate::output::Output;
use crate::parse::{
    self, MachineInfo, ERROR_MARKER, OSTYPE_KEY, POWERED_OFF, STARTED_MARKER, VMSTATE_KEY,
};
use crate::vbox::Hypervisor;

const UPDATE_TEMPLATE: &str = include_str!("guest/update.template");

/// Marker the guest echoes once the whole update pipeline has run.
///
/// Deliberately long and strange so it cannot show up in package manager
/// chatter by accident.
pub const SENTINEL: &str = "UpdateVirtualBoxMachinesFinalSignalOperationIsComplete";

/// How many times the update command is dispatched before giving up.
pub const DISPATCH_ATTEMPTS: u32 = 5;
/// How many times the captured dispatch output is checked for the
/// completion signal before giving up.
pub const COMPLETION_POLLS: u32 = 20;
/// How many power state polls to make before declaring the shutdown hung.
///
/// The bound turns a guest that ignores the power button into a reported
/// failure instead of a wedged run.
pub const SHUTDOWN_POLLS: u32 = 40;

/// A machine as discovered from the hypervisor's listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    /// Display name of the machine.
    pub name: String,
    /// Identifier used to address the machine in every later command.
    pub uuid: String,
}

/// Package managers found inside a guest.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackageManagers {
    /// Guest has `apt` on its PATH.
    pub apt: bool,
    /// Guest has `snap` on its PATH.
    pub snap: bool,
}

/// How a machine's update ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The guest ran the update pipeline and powered back off.
    Updated,
    /// The machine was skipped or the update went wrong.
    Failed(Failure),
}

/// Why a machine did not end up updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Machine was not powered off to begin with.
    NotPoweredOff,
    /// Guest OS is a Windows variant.
    WindowsGuest,
    /// The start command was not acknowledged.
    BootFailed,
    /// Every dispatch attempt came back with an error.
    DispatchExhausted,
    /// The completion signal never showed up.
    CompletionTimeout,
    /// The machine never reached the powered off state.
    ShutdownTimeout,
}

impl Failure {
    /// Whether this failure is an eligibility skip rather than something
    /// going wrong mid-update.
    pub fn is_skip(&self) -> bool {
        matches!(self, Failure::NotPoweredOff | Failure::WindowsGuest)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Failure::NotPoweredOff => "machine is not powered off",
            Failure::WindowsGuest => "guest runs Windows",
            Failure::BootFailed => "machine did not acknowledge start",
            Failure::DispatchExhausted => "update command failed on every attempt",
            Failure::CompletionTimeout => "timed out waiting for the update to finish",
            Failure::ShutdownTimeout => "timed out waiting for power-off",
        };

        write!(f, "{}", text)
    }
}

/// Used by templating engine to render the guest update command
#[derive(Serialize)]
struct CommandContext {
    /// Privilege escalation prefix, password already baked in
    sudo: String,
    /// Guest has apt
    apt: bool,
    /// Guest has snap
    snap: bool,
    /// Remove no longer required packages
    autoremove: bool,
    /// Completion marker the guest echoes last
    sentinel: String,
}

/// Render the shell pipeline a guest should run.
///
/// With no package managers at all this degenerates to just echoing the
/// sentinel, which still exercises the full dispatch and completion path.
fn update_command(managers: PackageManagers, config: &UpdateConfig) -> String {
    // Disable HTML escaping (b/c we're not dealing with HTML)
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&format_unescaped);

    // We are ok panicing here b/c there should never be a runtime
    // error compiling the template. Any errors are trivial bugs.
    tt.add_template("update", UPDATE_TEMPLATE).unwrap();

    let context = CommandContext {
        sudo: format!("echo {} | sudo -S", config.password),
        apt: managers.apt,
        snap: managers.snap,
        autoremove: config.autoremove,
        sentinel: SENTINEL.into(),
    };

    // Same as above, ignore errors cuz only trivial bugs are possible
    let rendered = tt.render("update", &context).unwrap();
    rendered.trim_end().to_string()
}

/// Validate the statically known config parameters
fn validate_config(config: &UpdateConfig) -> Result<()> {
    if config.username.is_empty() {
        bail!("Guest username empty");
    }

    if config.password.is_empty() {
        bail!("Guest password empty");
    }

    Ok(())
}

/// Central update orchestrator.
///
/// Owns the hypervisor handle and walks each machine through the boot,
/// dispatch, wait, and shutdown stages.
pub struct Vmupdate {
    hv: Box<dyn Hypervisor>,
    config: UpdateConfig,
    timing: Timing,
}

impl Vmupdate {
    /// Construct a new instance.
    pub fn new(hv: Box<dyn Hypervisor>, config: UpdateConfig, timing: Timing) -> Result<Self> {
        validate_config(&config).context("Invalid config")?;
        Ok(Self { hv, config, timing })
    }

    /// The run options this instance was constructed with.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    /// Discover every machine the hypervisor knows about.
    pub fn machines(&self) -> Result<Vec<Machine>> {
        let text = self
            .hv
            .run(&["list", "vms"])
            .context("Failed to list machines")?;

        parse::machines(&text).context("Failed to parse machine listing")
    }

    /// Fetch a machine's info dump.
    fn machine_info(&self, machine: &Machine) -> Result<MachineInfo> {
        let text = self
            .hv
            .run(&["showvminfo", &machine.uuid, "--machinereadable"])
            .with_context(|| format!("Failed to inspect '{}'", machine.name))?;

        Ok(MachineInfo::new(text))
    }

    /// Run a shell command inside the guest and capture what came back.
    fn guest_run(&self, machine: &Machine, command: &str) -> Result<String> {
        self.hv
            .run(&[
                "guestcontrol",
                &machine.uuid,
                "--username",
                &self.config.username,
                "--password",
                &self.config.password,
                "run",
                "--exe",
                "/bin/sh",
                "--",
                "/bin/sh",
                "-c",
                command,
            ])
            .with_context(|| format!("Failed to run guest command on '{}'", machine.name))
    }

    /// Decide whether a machine should be updated at all.
    ///
    /// Returns the reason to skip it, or `None` if it is fair game.
    fn eligibility(&self, machine: &Machine) -> Result<Option<Failure>> {
        let info = self.machine_info(machine)?;

        if info.value(VMSTATE_KEY)? != POWERED_OFF {
            return Ok(Some(Failure::NotPoweredOff));
        }

        // Guest OS types are strings like `Windows10_64` or `Ubuntu_64`
        if info.value(OSTYPE_KEY)?.starts_with("Windows") {
            return Ok(Some(Failure::WindowsGuest));
        }

        Ok(None)
    }

    /// Check for a binary on the guest's PATH.
    ///
    /// `which` prints the resolved path or nothing, so presence is just a
    /// non-empty capture.
    fn probe(&self, machine: &Machine, binary: &str) -> Result<bool> {
        let response = self.guest_run(machine, &format!("which {}", binary))?;
        Ok(!response.trim().is_empty())
    }

    /// Find out which package managers the guest carries.
    fn discover_managers(&self, machine: &Machine) -> Result<PackageManagers> {
        let managers = PackageManagers {
            apt: self.probe(machine, "apt")?,
            snap: self.probe(machine, "snap")?,
        };
        debug!("'{}' package managers: {:?}", machine.name, managers);

        Ok(managers)
    }

    /// Update a single machine, narrating progress on `updates`.
    ///
    /// Returns the machine's outcome. An `Err` means the hypervisor could
    /// not be driven at all (unrunnable utility, unparseable output) and
    /// the whole run should stop.
    ///
    /// Once the machine acknowledged the start command, shutdown is
    /// attempted no matter how the middle stages went, so the machine is
    /// not left burning host resources.
    pub fn run_one(&self, machine: &Machine, updates: Sender<Output>) -> Result<Outcome> {
        if let Some(reason) = self.eligibility(machine)? {
            let _ = updates.send(Output::Skip(reason));
            return Ok(Outcome::Failed(reason));
        }

        // Boot
        let _ = updates.send(Output::BootStart);
        let response = self
            .hv
            .run(&["startvm", &machine.uuid])
            .with_context(|| format!("Failed to start '{}'", machine.name))?;
        if !parse::contains_marker(&response, STARTED_MARKER) {
            let _ = updates.send(Output::BootEnd(Err(anyhow!(
                "Start was not acknowledged: {}",
                response.trim_end()
            ))));
            return Ok(Outcome::Failed(Failure::BootFailed));
        }
        let _ = updates.send(Output::Boot(format!(
            "started, settling for {:?}",
            self.timing.boot_settle
        )));
        thread::sleep(self.timing.boot_settle);
        let _ = updates.send(Output::BootEnd(Ok(())));

        // Dispatch
        let _ = updates.send(Output::DispatchStart);
        let mut dispatched = None;
        for attempt in 1..=DISPATCH_ATTEMPTS {
            // Probe each attempt; a guest still booting services can
            // answer differently a round later
            let managers = self.discover_managers(machine)?;
            let command = update_command(managers, &self.config);

            let _ = updates.send(Output::Dispatch(format!(
                "attempt {}/{}",
                attempt, DISPATCH_ATTEMPTS
            )));
            let response = self.guest_run(machine, &command)?;
            if !parse::contains_marker(&response, ERROR_MARKER) {
                dispatched = Some(response);
                break;
            }

            warn!(
                "'{}' dispatch attempt {}/{} failed",
                machine.name, attempt, DISPATCH_ATTEMPTS
            );
            if attempt < DISPATCH_ATTEMPTS {
                thread::sleep(self.timing.dispatch_backoff);
            }
        }

        let response = match dispatched {
            Some(r) => {
                let _ = updates.send(Output::DispatchEnd(Ok(())));
                r
            }
            None => {
                let _ = updates.send(Output::DispatchEnd(Err(anyhow!(
                    "Update command failed on {} attempts",
                    DISPATCH_ATTEMPTS
                ))));
                self.shutdown(machine, &updates)?;
                return Ok(Outcome::Failed(Failure::DispatchExhausted));
            }
        };

        // Wait for completion. The dispatch response is the only completion
        // channel there is; it never refreshes, so either the signal is
        // already in it or the polls run out.
        let _ = updates.send(Output::WaitStart);
        let mut completed = false;
        for poll in 1..=COMPLETION_POLLS {
            if parse::contains_marker(&response, SENTINEL) {
                completed = true;
                break;
            }

            let _ = updates.send(Output::Wait(format!(
                "no completion signal yet ({}/{})",
                poll, COMPLETION_POLLS
            )));
            thread::sleep(self.timing.completion_interval);
        }
        if completed {
            let _ = updates.send(Output::WaitEnd(Ok(())));
        } else {
            let _ = updates.send(Output::WaitEnd(Err(anyhow!(
                "No completion signal after {} polls",
                COMPLETION_POLLS
            ))));
        }

        let powered_off = self.shutdown(machine, &updates)?;

        // Earliest failure wins the report
        let outcome = if !completed {
            Outcome::Failed(Failure::CompletionTimeout)
        } else if !powered_off {
            Outcome::Failed(Failure::ShutdownTimeout)
        } else {
            Outcome::Updated
        };

        Ok(outcome)
    }

    /// Press the ACPI power button and wait for the machine to go down.
    ///
    /// Returns whether the machine reached the powered off state.
    fn shutdown(&self, machine: &Machine, updates: &Sender<Output>) -> Result<bool> {
        let _ = updates.send(Output::ShutdownStart);
        self.hv
            .run(&["controlvm", &machine.uuid, "acpipowerbutton"])
            .with_context(|| format!("Failed to press power button on '{}'", machine.name))?;
        thread::sleep(self.timing.shutdown_settle);

        for poll in 1..=SHUTDOWN_POLLS {
            let info = self.machine_info(machine)?;
            if info.value(VMSTATE_KEY)? == POWERED_OFF {
                let _ = updates.send(Output::ShutdownEnd(Ok(())));
                return Ok(true);
            }

            let _ = updates.send(Output::Shutdown(format!(
                "still running ({}/{})",
                poll, SHUTDOWN_POLLS
            )));
            thread::sleep(self.timing.shutdown_interval);
        }

        let _ = updates.send(Output::ShutdownEnd(Err(anyhow!(
            "Machine still not powered off after {} polls",
            SHUTDOWN_POLLS
        ))));

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> UpdateConfig {
        UpdateConfig {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            autoremove: false,
            shutdown_host: false,
            verbose: false,
        }
    }

    #[test]
    fn test_update_command_apt_only() {
        let managers = PackageManagers {
            apt: true,
            snap: false,
        };
        let command = update_command(managers, &config());
        assert!(command
            .starts_with("echo hunter2 | sudo -S apt update && echo hunter2 | sudo -S apt upgrade -y"));
        assert!(!command.contains("autoremove"));
        assert!(!command.contains("snap"));
        assert!(command.ends_with(&format!("echo {}", SENTINEL)));
    }

    #[test]
    fn test_update_command_autoremove() {
        let managers = PackageManagers {
            apt: true,
            snap: false,
        };
        let mut config = config();
        config.autoremove = true;
        let command = update_command(managers, &config);
        assert!(command.contains("echo hunter2 | sudo -S apt autoremove -y"));
    }

    #[test]
    fn test_update_command_all_managers() {
        let managers = PackageManagers {
            apt: true,
            snap: true,
        };
        let command = update_command(managers, &config());
        let apt = command.find("apt update").unwrap();
        let snap = command.find("snap refresh").unwrap();
        let sentinel = command.find(SENTINEL).unwrap();
        assert!(apt < snap && snap < sentinel);
    }

    #[test]
    fn test_update_command_no_managers() {
        let command = update_command(PackageManagers::default(), &config());
        assert_eq!(command, format!("echo {}", SENTINEL));
    }
}
