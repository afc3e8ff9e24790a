use std::{fmt, str::FromStr};

use crate::error::Error;

/// Top-level actions the add-on script can be invoked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Uninstall,
    AutoUpdate,
    BackupScripts,
    RestoreScripts,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Install,
        Action::Uninstall,
        Action::AutoUpdate,
        Action::BackupScripts,
        Action::RestoreScripts,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Uninstall => "uninstall",
            Action::AutoUpdate => "auto-update",
            Action::BackupScripts => "backup-scripts",
            Action::RestoreScripts => "restore-scripts",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| Error::UnknownAction(s.to_string()))
    }
}
