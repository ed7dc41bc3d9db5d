use std::sync::mpsc::{channel, Receiver};
use std::thread;

use anyhow::Result;
use console::{style, Style, Term};

use crate::output::Output;
use crate::vmupdate::{Outcome, Vmupdate};

/// Console UI
///
/// This struct handles the pretty printing as well as formatting and
/// reporting any errors.
pub struct Ui {
    vmupdate: Vmupdate,
}

/// Returns an unstyled heading with provided depth
fn heading(name: &str, depth: usize) -> String {
    format!("{}> {}", "=".repeat(depth), name)
}

/// Print an error chain in red if the stage result carries one
fn error_out(term: &Term, result: &Result<()>) {
    if let Err(err) = result {
        // NB: use debug formatting to get full chain
        let err = format!("{:?}", err);
        for line in err.lines() {
            let styled = Style::new().red().bright().apply_to(line);
            // I don't see how writing to terminal could fail, but if it
            // does, we have no choice but to panic anyways.
            term.write_line(&styled.to_string())
                .expect("Failed to write terminal");
        }
    }
}

impl Ui {
    /// Construct a new UI
    pub fn new(vmupdate: Vmupdate) -> Self {
        Self { vmupdate }
    }

    /// UI for a single machine. Must be run on its own thread.
    ///
    /// Narration is only shown in verbose mode. Stage errors are always
    /// shown; the final verdict line is printed by [`Ui::run`] once the
    /// orchestrator hands back the outcome.
    fn machine_ui(updates: Receiver<Output>, verbose: bool) {
        let term = Term::stdout();
        let stage = |name: &str| {
            if verbose {
                term.write_line(&heading(name, 2))
                    .expect("Failed to write terminal");
            }
        };
        let narrate = |line: &str| {
            if verbose {
                term.write_line(&style(line).dim().to_string())
                    .expect("Failed to write terminal");
            }
        };

        // Main state machine loop
        loop {
            let msg = match updates.recv() {
                Ok(m) => m,
                // Orchestrator hangs up when done
                Err(_) => break,
            };

            match &msg {
                Output::Skip(reason) => narrate(&format!("skipping: {}", reason)),
                Output::BootStart => stage("Booting"),
                Output::Boot(s) => narrate(s),
                Output::BootEnd(r) => error_out(&term, r),
                Output::DispatchStart => stage("Dispatching update command"),
                Output::Dispatch(s) => narrate(s),
                Output::DispatchEnd(r) => error_out(&term, r),
                Output::WaitStart => stage("Waiting for completion"),
                Output::Wait(s) => narrate(s),
                Output::WaitEnd(r) => error_out(&term, r),
                Output::ShutdownStart => stage("Shutting down"),
                Output::Shutdown(s) => narrate(s),
                Output::ShutdownEnd(r) => error_out(&term, r),
            }
        }
    }

    /// Update all the machines the hypervisor reports.
    ///
    /// Returns how many machines failed (skips included). An `Err` means
    /// the run itself could not proceed and nothing more will be attempted.
    pub fn run(self) -> Result<i32> {
        let term = Term::stdout();
        let machines = self.vmupdate.machines()?;
        term.write_line(&format!("{} machines found", machines.len()))
            .expect("Failed to write terminal");

        let verbose = self.vmupdate.config().verbose;
        let mut updated = 0;
        let mut failed = 0;
        for machine in &machines {
            term.write_line(&heading(&machine.name, 1))
                .expect("Failed to write terminal");

            let (sender, receiver) = channel::<Output>();

            // Print on its own thread b/c `Vmupdate::run_one()` will block
            let printer = thread::spawn(move || Self::machine_ui(receiver, verbose));

            let result = self.vmupdate.run_one(machine, sender);

            printer.join().expect("Failed to join printer thread");

            let verdict = match result? {
                Outcome::Updated => {
                    updated += 1;
                    style("updated".to_string()).green()
                }
                Outcome::Failed(f) if f.is_skip() => {
                    failed += 1;
                    style(format!("skipped ({})", f)).yellow()
                }
                Outcome::Failed(f) => {
                    failed += 1;
                    style(format!("failed ({})", f)).red()
                }
            };
            term.write_line(&verdict.to_string())
                .expect("Failed to write terminal");
        }

        term.write_line("").expect("Failed to write terminal");
        term.write_line(&format!("{} updated, {} failed", updated, failed))
            .expect("Failed to write terminal");

        Ok(failed)
    }
}
