use std::time::Duration;

/// Options for a single update run.
#[derive(Clone)]
pub struct UpdateConfig {
    /// Account used to log into each guest.
    pub username: String,
    /// Password for the guest account.
    ///
    /// Also piped to `sudo -S` inside the guest, so the account must be
    /// allowed to sudo for the update command to do anything.
    pub password: String,
    /// Remove packages that are no longer required after upgrading.
    ///
    /// Default: false
    pub autoremove: bool,
    /// Power off the host once every machine has been processed.
    ///
    /// Default: false
    pub shutdown_host: bool,
    /// Narrate every stage of every machine.
    ///
    /// Default: false
    pub verbose: bool,
}

/// Delays between the stages and polls of a machine update.
///
/// The control utility emits no readiness or completion events, so the
/// update sequence is paced with plain sleeps. Tests inject zero durations;
/// the defaults are the cadence real guests need.
#[derive(Clone)]
pub struct Timing {
    /// Settle time between the start acknowledgment and the first dispatch
    /// attempt.
    ///
    /// Default: 60s
    pub boot_settle: Duration,
    /// Backoff after a dispatch attempt that came back with an error.
    ///
    /// Default: 30s
    pub dispatch_backoff: Duration,
    /// Interval between checks for the completion signal.
    ///
    /// Default: 30s
    pub completion_interval: Duration,
    /// Grace period between the power button press and the first power
    /// state poll.
    ///
    /// Default: 30s
    pub shutdown_settle: Duration,
    /// Interval between power state polls.
    ///
    /// Default: 15s
    pub shutdown_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            boot_settle: Duration::from_secs(60),
            dispatch_backoff: Duration::from_secs(30),
            completion_interval: Duration::from_secs(30),
            shutdown_settle: Duration::from_secs(30),
            shutdown_interval: Duration::from_secs(15),
        }
    }
}

#[test]
fn test_default_timing() {
    let timing = Timing::default();
    assert_eq!(timing.boot_settle, Duration::from_secs(60));
    assert_eq!(timing.dispatch_backoff, Duration::from_secs(30));
    assert_eq!(timing.completion_interval, Duration::from_secs(30));
    assert_eq!(timing.shutdown_settle, Duration::from_secs(30));
    assert_eq!(timing.shutdown_interval, Duration::from_secs(15));
}
