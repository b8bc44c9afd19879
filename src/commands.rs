//! Operator commands.
//!
//! Commands come from a handset or console and bypass the sensor filter.
//! They always win over automatic driving: every command except
//! [`OperatorCommand::Restart`] leaves the train in manual mode and cancels
//! its automatic timers, ramps and waits before acting.
//!
//! # Command Flow
//!
//! 1. A command for one train arrives at the
//!    [`Dispatcher`](crate::dispatcher::Dispatcher).
//! 2. [`OperatorCommand::ResetAll`] is handled by the dispatcher itself.
//! 3. Every other command is forwarded to the train's actor, which replies
//!    once it has been applied.
//!
//! ```rust
//! use trainz_autopilot::commands::OperatorCommand;
//!
//! assert_eq!(OperatorCommand::from_text("up"), Some(OperatorCommand::IncreaseSpeed));
//! assert_eq!(OperatorCommand::from_text(" Reset-All "), Some(OperatorCommand::ResetAll));
//! assert_eq!(OperatorCommand::from_text("jump"), None);
//! ```

use core::fmt;

/// A discrete operator command for one train.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OperatorCommand {
    /// Raise the power index by one step.
    IncreaseSpeed,
    /// Lower the power index by one step.
    DecreaseSpeed,
    /// Stop the train.
    Stop,
    /// Stop every train and forget all track state.
    ResetAll,
    /// Resume automatic driving from the home station.
    Restart,
}

impl OperatorCommand {
    /// Parse a command name. Trimmed, case-insensitive, `-` and `_`
    /// interchangeable.
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim() {
            "+" => return Some(Self::IncreaseSpeed),
            "-" => return Some(Self::DecreaseSpeed),
            _ => {}
        }
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "increase_speed" | "increase" | "up" => Some(Self::IncreaseSpeed),
            "decrease_speed" | "decrease" | "down" => Some(Self::DecreaseSpeed),
            "stop" => Some(Self::Stop),
            "reset_all" | "reset" => Some(Self::ResetAll),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }

    /// Snake-case name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::IncreaseSpeed => "increase_speed",
            Self::DecreaseSpeed => "decrease_speed",
            Self::Stop => "stop",
            Self::ResetAll => "reset_all",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for cmd in [
            OperatorCommand::IncreaseSpeed,
            OperatorCommand::DecreaseSpeed,
            OperatorCommand::Stop,
            OperatorCommand::ResetAll,
            OperatorCommand::Restart,
        ] {
            assert_eq!(OperatorCommand::from_text(cmd.as_str()), Some(cmd));
        }
    }

    #[test]
    fn minus_sign_is_decrease() {
        assert_eq!(OperatorCommand::from_text("+"), Some(OperatorCommand::IncreaseSpeed));
        assert_eq!(OperatorCommand::from_text("-"), Some(OperatorCommand::DecreaseSpeed));
    }
}
