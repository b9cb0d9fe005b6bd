use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique session identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_str(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata record for a single care task, as stored in the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Repository-unique task name.
    pub name: String,
    /// Raw description, the display fallback when no enrichment is ready.
    pub description: String,
    /// Estimated time to complete, in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_mins: Option<f64>,
    /// Localized display title, when the store carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localized_title: Option<String>,
}

impl TaskInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            duration_mins: None,
            localized_title: None,
        }
    }

    pub fn with_duration(mut self, mins: f64) -> Self {
        self.duration_mins = Some(mins);
        self
    }

    pub fn with_localized_title(mut self, title: impl Into<String>) -> Self {
        self.localized_title = Some(title.into());
        self
    }

    /// Title to display when no enriched title is available.
    pub fn display_title(&self) -> &str {
        self.localized_title.as_deref().unwrap_or(&self.name)
    }
}

/// Conversation context carried by a node and inherited down the tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextInfo {
    #[serde(default)]
    pub global_context: String,
    #[serde(default)]
    pub local_context: Vec<String>,
}

impl ContextInfo {
    pub fn new(global_context: impl Into<String>) -> Self {
        Self {
            global_context: global_context.into(),
            local_context: Vec::new(),
        }
    }

    /// Context for a child node: same global blob, the parent's local
    /// entries carried over in order.
    pub fn inherit(&self) -> Self {
        self.clone()
    }

    pub fn push_local(&mut self, entry: impl Into<String>) {
        self.local_context.push(entry.into());
    }
}

/// Oracle-produced display text for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    /// Short everyday heading.
    pub title: String,
    /// Conversational restatement of the description, shown before a
    /// drill-down.
    pub instruction: String,
    /// One short line inviting the next step.
    pub call_to_action: String,
}

/// Navigation signal driving the execution tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Signal {
    GoNext,
    GoDetail,
    BackPrevious,
    ResetToStart,
}

impl Signal {
    /// Map an external transport command to a signal.
    ///
    /// `BackPrevious` deliberately has no mapping here: it is reachable
    /// only by propagation from a child run, never as a direct command.
    pub fn from_command(command: &str) -> Option<Signal> {
        match command {
            "advance" => Some(Signal::GoNext),
            "showDetail" => Some(Signal::GoDetail),
            "resetToStart" => Some(Signal::ResetToStart),
            _ => None,
        }
    }
}

/// What a node run returned to its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Advance within the current level.
    Next,
    /// Unwind one step to the previous sibling.
    Previous,
    /// Unwind everything and rebuild the tree.
    Reset,
}

/// Traversal state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Init,
    Explained,
    Done,
}

/// Display payload emitted when a node becomes current.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateInfo {
    pub name: String,
    pub title: String,
    pub description: String,
    pub call_to_action: String,
    pub detail_instruction: String,
    pub has_detail: bool,
    pub has_next: bool,
}

/// Outbound engine event, broadcast to the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A node became current.
    StateChanged(StateInfo),
    /// A drill-down ran all of its children to completion.
    DetailFinished,
    /// Advance was requested with no successor anywhere above.
    FlowFinished,
}
