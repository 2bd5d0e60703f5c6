use serde::{Deserialize, Serialize};

use crate::models::{Frame, Table};

/// A run opened by the instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStart {
    pub scan_name: String,
}

/// A run closed by the instrument
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunStop {
    /// Per-function timing summary for the whole run
    #[serde(default)]
    pub function_timings: Option<Table>,
}

/// Events emitted by the instrument process, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Start(RunStart),
    Result(Frame),
    Stop(RunStop),
}

impl RunEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            RunEvent::Start(_) => "start",
            RunEvent::Result(_) => "result",
            RunEvent::Stop(_) => "stop",
        }
    }
}
