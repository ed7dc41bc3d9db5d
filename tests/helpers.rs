use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Error, Result};

use vmupdate::output::Output;
use vmupdate::vbox::Hypervisor;
use vmupdate::{Machine, Timing, UpdateConfig, Vmupdate};

// Identifiers for the machines the scripted hypervisor serves up
pub const UUID: &str = "12345678-1234-1234-1234-123456789abc";
pub const UUID_B: &str = "87654321-4321-4321-4321-cba987654321";

// Scriptable stand-in for the control utility
//
// Records every invocation and lets each test script what text comes back.
pub struct FakeVbox {
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    handler: Box<dyn Fn(&[&str]) -> Result<String>>,
}

impl FakeVbox {
    pub fn new(handler: Box<dyn Fn(&[&str]) -> Result<String>>) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            handler,
        }
    }
}

impl Hypervisor for FakeVbox {
    fn run(&self, args: &[&str]) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push(args.iter().map(|a| a.to_string()).collect());

        (self.handler)(args)
    }
}

// Set up an orchestrator around a scripted hypervisor
//
// Returns the orchestrator plus a handle on the recorded invocations.
// All delays are zeroed so tests run instantly.
pub fn setup(
    config: UpdateConfig,
    handler: Box<dyn Fn(&[&str]) -> Result<String>>,
) -> (Vmupdate, Arc<Mutex<Vec<Vec<String>>>>) {
    let fake = FakeVbox::new(handler);
    let calls = fake.calls.clone();
    let vmupdate =
        Vmupdate::new(Box::new(fake), config, zero_timing()).expect("Failed to construct vmupdate");

    (vmupdate, calls)
}

pub fn config() -> UpdateConfig {
    UpdateConfig {
        username: "admin".to_string(),
        password: "hunter2".to_string(),
        autoremove: false,
        shutdown_host: false,
        verbose: false,
    }
}

pub fn zero_timing() -> Timing {
    Timing {
        boot_settle: Duration::ZERO,
        dispatch_backoff: Duration::ZERO,
        completion_interval: Duration::ZERO,
        shutdown_settle: Duration::ZERO,
        shutdown_interval: Duration::ZERO,
    }
}

// A machine as the listing parser would produce it
pub fn machine(name: &str) -> Machine {
    Machine {
        name: name.to_string(),
        uuid: UUID.to_string(),
    }
}

// Render a machine listing the way `list vms` prints it
pub fn listing(entries: &[(&str, &str)]) -> String {
    entries
        .iter()
        .map(|(name, uuid)| format!("\"{}\" {{{}}}\r\n", name, uuid))
        .collect()
}

// Render machine info the way `showvminfo --machinereadable` prints it
pub fn vminfo(state: &str, ostype: &str) -> String {
    format!(
        "name=\"test machine\"\r\nostype=\"{}\"\r\nVMState=\"{}\"\r\n",
        ostype, state
    )
}

// Collect the events a finished update left in the channel
pub fn drain(recv: Receiver<Output>) -> Vec<Output> {
    recv.try_iter().collect()
}

// Compact tag for an event, for asserting whole sequences
pub fn event_tag(output: &Output) -> &'static str {
    match output {
        Output::Skip(_) => "skip",
        Output::BootStart => "boot/start",
        Output::Boot(_) => "boot",
        Output::BootEnd(Ok(())) => "boot/ok",
        Output::BootEnd(Err(_)) => "boot/err",
        Output::DispatchStart => "dispatch/start",
        Output::Dispatch(_) => "dispatch",
        Output::DispatchEnd(Ok(())) => "dispatch/ok",
        Output::DispatchEnd(Err(_)) => "dispatch/err",
        Output::WaitStart => "wait/start",
        Output::Wait(_) => "wait",
        Output::WaitEnd(Ok(())) => "wait/ok",
        Output::WaitEnd(Err(_)) => "wait/err",
        Output::ShutdownStart => "shutdown/start",
        Output::Shutdown(_) => "shutdown",
        Output::ShutdownEnd(Ok(())) => "shutdown/ok",
        Output::ShutdownEnd(Err(_)) => "shutdown/err",
    }
}

// Should not be called outside of this file
#[doc(hidden)]
pub fn stage_error(events: &[Output]) -> Option<&Error> {
    events.iter().find_map(|event| match event {
        Output::BootEnd(Err(e))
        | Output::DispatchEnd(Err(e))
        | Output::WaitEnd(Err(e))
        | Output::ShutdownEnd(Err(e)) => Some(e),
        _ => None,
    })
}

#[macro_export]
macro_rules! assert_stage_err {
    ($events:expr, $variant:path) => {
        assert!($events.iter().any(|e| matches!(e, $variant(Err(_)))));
    };
}

#[macro_export]
macro_rules! assert_no_stage_err {
    ($events:expr) => {
        if let Some(e) = stage_error(&$events) {
            panic!("Unexpected stage error: {:?}", e);
        }
    };
}
