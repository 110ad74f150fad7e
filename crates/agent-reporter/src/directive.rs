//! The directive handler (§4.12): applies an inbound directive's
//! cadence/pause controls to shared reporter state, executes its commands,
//! and reports results back over the remote channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use agent_core::directive::MIN_REPORT_PERIOD_FLOOR;
use agent_core::{Command, CommandResult, Directive};
use kube::Client;
use tracing::{info, warn};

use crate::comm::Comm;

/// Cross-tick state the directive handler mutates and the reporter loop
/// reads: whether to stop reporting, the current quiet-window length, and
/// the last directive id seen.
pub struct ReportingState {
    stop_reporting: AtomicBool,
    min_report_period_secs: Mutex<u64>,
    last_directive_id: Mutex<Option<String>>,
}

impl ReportingState {
    pub fn new() -> Self {
        Self::with_initial_min_report_period(MIN_REPORT_PERIOD_FLOOR.as_secs())
    }

    /// Builds with an operator-configured starting cadence (`AGENT_REPORTING_PERIOD`,
    /// §6), floored the same way a directive's requested period is (I2).
    pub fn with_initial_min_report_period(requested_secs: u64) -> Self {
        ReportingState {
            stop_reporting: AtomicBool::new(false),
            min_report_period_secs: Mutex::new(requested_secs.max(MIN_REPORT_PERIOD_FLOOR.as_secs())),
            last_directive_id: Mutex::new(None),
        }
    }

    pub fn is_reporting_stopped(&self) -> bool {
        self.stop_reporting.load(Ordering::SeqCst)
    }

    pub fn min_report_period(&self) -> Duration {
        Duration::from_secs(*self.min_report_period_secs.lock().expect("lock poisoned"))
    }

    pub fn last_directive_id(&self) -> Option<String> {
        self.last_directive_id.lock().expect("lock poisoned").clone()
    }
}

impl Default for ReportingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies `directive` to `state`, executes its commands against the
/// cluster API, and reports each command's result back on `comm`. Per §7,
/// a bad command is a [`agent_core::error::DirectiveError`] reported back,
/// never a reason to abort the loop.
pub async fn handle_directive(directive: Directive, state: &ReportingState, client: Client, comm: &Comm) {
    state.stop_reporting.store(directive.stop_reporting, Ordering::SeqCst);

    if let Some(period) = directive.requested_min_report_period() {
        *state.min_report_period_secs.lock().expect("lock poisoned") = period.as_secs();
        info!(period_secs = period.as_secs(), "directive adjusted minimum report period");
    }

    *state.last_directive_id.lock().expect("lock poisoned") = Some(directive.id.clone());

    for command in directive.commands {
        let command_id = command.command_id().to_string();
        let result = execute_command(command, client.clone()).await;
        let outcome = match result {
            Ok(()) => CommandResult::ok(command_id),
            Err(err) => {
                warn!(error = %err, "directive command failed");
                CommandResult::err(command_id, err.to_string())
            }
        };
        if let Err(err) = comm.send_command_result(outcome) {
            warn!(error = %err, "failed to report command result back to director");
        }
    }
}

async fn execute_command(command: Command, client: Client) -> Result<(), agent_core::error::DirectiveError> {
    match command {
        Command::SecretSync(secret_sync) => agent_k8s::secret_sync::execute(client, &secret_sync).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_min_report_period_is_the_floor() {
        let state = ReportingState::new();
        assert_eq!(state.min_report_period(), MIN_REPORT_PERIOD_FLOOR);
    }

    #[test]
    fn initial_min_report_period_below_the_floor_is_raised() {
        let state = ReportingState::with_initial_min_report_period(5);
        assert_eq!(state.min_report_period(), MIN_REPORT_PERIOD_FLOOR);
    }

    #[test]
    fn initial_min_report_period_above_the_floor_is_honored() {
        let state = ReportingState::with_initial_min_report_period(90);
        assert_eq!(state.min_report_period(), Duration::from_secs(90));
    }

    #[test]
    fn stop_reporting_flag_is_readable_after_toggling() {
        let state = ReportingState::new();
        state.stop_reporting.store(true, Ordering::SeqCst);
        assert!(state.is_reporting_stopped());
    }

    /// A directive that previously raised the period above the floor must
    /// not be undone by a later directive requesting one at or below it —
    /// `requested_min_report_period()` returning `None` for such a request
    /// is exactly what keeps the apply-if-`Some` logic in
    /// [`handle_directive`] from clobbering the raised value.
    #[test]
    fn a_later_directive_at_or_below_the_floor_does_not_undo_a_prior_raise() {
        let state = ReportingState::new();

        let raise = Directive {
            min_report_period_secs: Some(90),
            ..Default::default()
        };
        if let Some(period) = raise.requested_min_report_period() {
            *state.min_report_period_secs.lock().unwrap() = period.as_secs();
        }
        assert_eq!(state.min_report_period(), Duration::from_secs(90));

        let too_low = Directive {
            min_report_period_secs: Some(10),
            ..Default::default()
        };
        if let Some(period) = too_low.requested_min_report_period() {
            *state.min_report_period_secs.lock().unwrap() = period.as_secs();
        }
        assert_eq!(state.min_report_period(), Duration::from_secs(90));
    }
}
