pub mod client;
pub mod wrapper;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool advertised by an external tool server over `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}
