use rmcp::ErrorData as McpError;
use serde_json::Value;
use url::Url;

pub fn validate_http_url(field: &str, raw: &str) -> Result<Url, McpError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(McpError::invalid_params(
            format!("{field} must not be empty"),
            None,
        ));
    }
    let parsed = Url::parse(trimmed).map_err(|err| {
        McpError::invalid_params(
            format!("{field} is not a valid URL"),
            Some(Value::String(err.to_string())),
        )
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(McpError::invalid_params(
            format!("{field} must use http or https"),
            Some(Value::String(format!("got scheme: {scheme}"))),
        )),
    }
}
