use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Lifecycle verb applied to a cluster, host, service or component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[repr(i32)]
pub enum Command {
    Add = 0,
    Start = 1,
    Stop = 2,
    Restart = 3,
    Check = 4,
    Configure = 5,
    Custom = 6,
    Init = 7,
    Prepare = 8,
    Status = 9,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Command::Add,
        Command::Start,
        Command::Stop,
        Command::Restart,
        Command::Check,
        Command::Configure,
        Command::Custom,
        Command::Init,
        Command::Prepare,
        Command::Status,
    ];

    /// Lowercase code sent over the wire.
    pub fn code(self) -> &'static str {
        match self {
            Command::Add => "add",
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Restart => "restart",
            Command::Check => "check",
            Command::Configure => "configure",
            Command::Custom => "custom",
            Command::Init => "init",
            Command::Prepare => "prepare",
            Command::Status => "status",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Add => "Add",
            Command::Start => "Start",
            Command::Stop => "Stop",
            Command::Restart => "Restart",
            Command::Check => "Check",
            Command::Configure => "Configure",
            Command::Custom => "Custom",
            Command::Init => "Init",
            Command::Prepare => "Prepare",
            Command::Status => "Status",
        }
    }

    /// Uppercase form used in ordering keys such as `ZOOKEEPER_SERVER-START`.
    pub fn key(self) -> String {
        self.code().to_uppercase()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Command::ALL
            .into_iter()
            .find(|command| command.code().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("unknown command '{}'", s))
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandLevel {
    Cluster,
    Host,
    Service,
    Component,
}

/// Lifecycle shared by jobs, stages and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum ExecutionState {
    Pending = 0,
    Processing = 1,
    Successful = 2,
    Failed = 3,
    Canceled = 4,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Successful | ExecutionState::Failed | ExecutionState::Canceled
        )
    }
}

/// Installation state of a component on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum MaintainState {
    Uninstalled = 0,
    Installed = 1,
    Maintained = 2,
    Started = 3,
    Stopped = 4,
}

impl MaintainState {
    /// State a component reaches after the given command succeeds on it.
    pub fn after(command: Command) -> Option<Self> {
        match command {
            Command::Add => Some(MaintainState::Installed),
            Command::Start => Some(MaintainState::Started),
            Command::Stop => Some(MaintainState::Stopped),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("start".parse::<Command>(), Ok(Command::Start));
        assert_eq!("START".parse::<Command>(), Ok(Command::Start));
        assert_eq!(" Prepare ".parse::<Command>(), Ok(Command::Prepare));
        assert!("bounce".parse::<Command>().is_err());
    }

    #[test]
    fn code_and_name_forms() {
        assert_eq!(Command::Configure.code(), "configure");
        assert_eq!(Command::Configure.name(), "Configure");
        assert_eq!(Command::Configure.key(), "CONFIGURE");
    }

    #[test]
    fn serde_uses_wire_code() {
        let json = serde_json::to_string(&Command::Init).unwrap();
        assert_eq!(json, "\"init\"");
        let back: Command = serde_json::from_str("\"INIT\"").unwrap();
        assert_eq!(back, Command::Init);
    }

    #[test]
    fn terminal_states() {
        assert!(!ExecutionState::Pending.is_terminal());
        assert!(!ExecutionState::Processing.is_terminal());
        assert!(ExecutionState::Successful.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(ExecutionState::Canceled.is_terminal());
    }
}
