use std::process::{exit, Command};

use anyhow::{Context, Result};
use clap::Parser;

use ::vmupdate::{Timing, Ui, UpdateConfig, VBoxManage, Vmupdate};

#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// Account used to log into each guest
    username: String,
    /// Password for the guest account
    ///
    /// The account must be allowed to sudo inside the guest; the password
    /// is piped to `sudo -S` for the update commands.
    password: String,
    /// Remove packages that are no longer required after upgrading
    #[clap(short = 'r', long)]
    autoremove: bool,
    /// Power off the host once every machine has been processed
    #[clap(short = 's', long)]
    shutdown: bool,
    /// Narrate every stage of every machine
    #[clap(short = 'v', long)]
    verbose: bool,
}

#[cfg(windows)]
fn shutdown_host() -> Result<()> {
    Command::new("shutdown")
        .args(["/s", "/t", "60"])
        .spawn()
        .context("Failed to issue host shutdown")?;

    Ok(())
}

#[cfg(not(windows))]
fn shutdown_host() -> Result<()> {
    Command::new("shutdown")
        .spawn()
        .context("Failed to issue host shutdown")?;

    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::init();
    let config = UpdateConfig {
        username: args.username,
        password: args.password,
        autoremove: args.autoremove,
        shutdown_host: args.shutdown,
        verbose: args.verbose,
    };
    let shutdown = config.shutdown_host;
    let vmupdate = Vmupdate::new(Box::new(VBoxManage::new()), config, Timing::default())?;
    let ui = Ui::new(vmupdate);
    let failed = ui.run()?;

    if shutdown {
        shutdown_host()?;
    }

    let rc = i32::from(failed != 0);
    exit(rc);
}
