use thiserror::Error;

/// Storage and encoding failures shared by the trellis crates
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CommonResult<T> = Result<T, CommonError>;

/// Parse a value written as untagged JSON (see [`crate::Value::from_plain_json`])
pub fn parse_plain_value(json: &str) -> CommonResult<crate::Value> {
    Ok(crate::Value::from_plain_json(serde_json::from_str(json)?))
}
