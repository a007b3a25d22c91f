use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolError};
use crate::types::ArgMap;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> String {
        "web_fetch".to_string()
    }

    fn description(&self) -> String {
        "Fetch content from a URL".to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string", "description": "URL to fetch"}
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: &ArgMap) -> Result<String, ToolError> {
        let url = args
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("url must be a string".to_string()))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("fetch url: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Failed(format!(
                "unexpected status code: {}",
                status.as_u16()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| ToolError::Failed(format!("read response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::WebFetchTool;
    use crate::tools::{Tool, ToolError};
    use crate::types::ArgMap;

    #[tokio::test]
    async fn missing_url_is_invalid() {
        let tool = WebFetchTool::new();
        let err = tool.execute(&ArgMap::new()).await.expect_err("invalid");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn schema_requires_url() {
        let schema = WebFetchTool::new().parameters();
        assert_eq!(schema["required"][0], "url");
    }
}
