//! Inbound directive and command types (§4.12 in the original numbering).

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretSyncAction {
    Set,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSyncCommand {
    pub command_id: String,
    pub name: String,
    pub namespace: String,
    pub action: SecretSyncAction,
    /// The secret's single `token` key value; absent for `Delete`.
    pub payload: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Command {
    SecretSync(SecretSyncCommand),
}

impl Command {
    pub fn command_id(&self) -> &str {
        match self {
            Command::SecretSync(c) => &c.command_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Directive {
    pub id: String,
    pub stop_reporting: bool,
    pub min_report_period_secs: Option<u64>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

/// The floor below which a directive cannot lower `MinReportPeriod`
/// (invariant I2's default, and its lower bound).
pub const MIN_REPORT_PERIOD_FLOOR: Duration = Duration::from_secs(30);

impl Directive {
    /// The reporting period this directive requests, or `None` if the
    /// current period should be left unchanged — either because the
    /// directive didn't name one, or because the requested value is at or
    /// below the floor (spec: "if min-report-period > floor → set
    /// MinReportPeriod"), which must not clobber a higher period a prior
    /// directive already raised it to.
    pub fn requested_min_report_period(&self) -> Option<Duration> {
        self.min_report_period_secs.and_then(|secs| {
            let requested = Duration::from_secs(secs);
            (requested > MIN_REPORT_PERIOD_FLOOR).then_some(requested)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub command_id: String,
    pub ok: bool,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(command_id: impl Into<String>) -> Self {
        CommandResult {
            command_id: command_id.into(),
            ok: true,
            error: None,
        }
    }

    pub fn err(command_id: impl Into<String>, error: impl Into<String>) -> Self {
        CommandResult {
            command_id: command_id.into(),
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_report_period_at_or_below_floor_is_ignored() {
        let directive = Directive {
            min_report_period_secs: Some(5),
            ..Default::default()
        };
        assert_eq!(directive.requested_min_report_period(), None);

        let at_floor = Directive {
            min_report_period_secs: Some(MIN_REPORT_PERIOD_FLOOR.as_secs()),
            ..Default::default()
        };
        assert_eq!(at_floor.requested_min_report_period(), None);
    }

    #[test]
    fn min_report_period_above_floor_is_honored() {
        let directive = Directive {
            min_report_period_secs: Some(90),
            ..Default::default()
        };
        assert_eq!(
            directive.requested_min_report_period(),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn absent_period_leaves_current_value_untouched() {
        let directive = Directive::default();
        assert_eq!(directive.requested_min_report_period(), None);
    }
}
