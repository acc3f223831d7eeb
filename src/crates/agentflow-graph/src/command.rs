//! Node results and control commands

use serde_json::Value;
use std::collections::HashMap;

/// Control command returned by a node alongside its writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Route directly to the named node, overriding edges
    Goto(String),
    /// Stop after this step's writes apply; the latest checkpoint becomes
    /// the resumption point
    Interrupt(String),
    /// Stop the execution gracefully
    Halt,
}

/// What a node execution produced: a write set plus an optional command
#[derive(Debug, Clone, Default)]
pub struct NodeResult {
    /// Channel name to written value
    pub writes: HashMap<String, Value>,
    /// Optional control command
    pub command: Option<Command>,
}

impl NodeResult {
    /// No writes, no command.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result writing the given channel/value pairs.
    pub fn writes(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            writes: pairs.into_iter().collect(),
            command: None,
        }
    }

    /// Single-channel write helper.
    pub fn write(channel: impl Into<String>, value: Value) -> Self {
        Self::writes([(channel.into(), value)])
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Interrupt helper.
    pub fn interrupt(reason: impl Into<String>) -> Self {
        Self::empty().with_command(Command::Interrupt(reason.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builders() {
        let r = NodeResult::write("out", json!(84)).with_command(Command::Goto("next".into()));
        assert_eq!(r.writes["out"], 84);
        assert_eq!(r.command, Some(Command::Goto("next".into())));

        let i = NodeResult::interrupt("approval");
        assert!(i.writes.is_empty());
        assert_eq!(i.command, Some(Command::Interrupt("approval".into())));
    }
}
