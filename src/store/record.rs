use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status snapshot of one managed process.
///
/// Serialized with camelCase keys: `id`, `returnValue`, `name`, `alive`, `logFile`,
/// `startTime`, `endTime`, `maxExecutionTime`, `args`. Times are unix milliseconds;
/// an unlimited execution time is `-1` (seconds otherwise).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    /// Process id.
    pub id: String,
    /// Stored return value, if any.
    pub return_value: Option<Value>,
    /// Process name.
    pub name: String,
    /// `true` for the start record, `false` for the completion record.
    pub alive: bool,
    /// Log file of the process, if it logs to one.
    pub log_file: Option<String>,
    /// Start of execution.
    pub start_time: Option<u64>,
    /// End of execution.
    pub end_time: Option<u64>,
    /// Execution bound in seconds, `-1` for unlimited.
    pub max_execution_time: i64,
    /// Positional arguments.
    pub args: Vec<Value>,
}
