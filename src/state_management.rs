use std::fmt::Display;

use log::debug;

/// Progress of a single run. Only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RunState {
    Start,
    ClientBuilt,
    DataGathered,
    ReportRendered,
    Sent,
    Failed,
}

impl RunState {
    pub fn new() -> Self {
        Self::Start
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    /// Moves to `next`, terminal states are never left
    pub fn advance(&mut self, next: RunState) {
        if self.is_terminal() {
            debug!("Ignoring transition {self} -> {next}, run already finished");
            return;
        }
        debug_assert!(
            next == Self::Failed || next > *self,
            "run state must move forward: {self} -> {next}"
        );
        debug!("Run state {self} -> {next}");
        *self = next;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Start => "Start",
            RunState::ClientBuilt => "ClientBuilt",
            RunState::DataGathered => "DataGathered",
            RunState::ReportRendered => "ReportRendered",
            RunState::Sent => "Sent",
            RunState::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}
