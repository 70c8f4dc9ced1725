//! Options accepted by the `write-threshold` filter.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{BlockError, Result};

/// Option key for the threshold, in bytes.
pub const OPT_WRITE_THRESHOLD: &str = "write-threshold";

/// Parsed filter options.
///
/// `write-threshold` is the configured threshold for the device in bytes;
/// `0` (the default) disables it. Numbers may be given as JSON numbers or
/// decimal strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct WriteThresholdOptions {
    /// Threshold in bytes, `0` to disable.
    #[serde(default, deserialize_with = "deserialize_number")]
    pub write_threshold: u64,
}

impl WriteThresholdOptions {
    /// Parses an option map, rejecting unknown keys.
    ///
    /// # Errors
    ///
    /// [`BlockError::InvalidOption`] naming the offending key.
    ///
    /// # Example
    ///
    /// ```rust
    /// use blockwatch_block::WriteThresholdOptions;
    /// use serde_json::json;
    ///
    /// let map = json!({ "write-threshold": "4194304" });
    /// let options = WriteThresholdOptions::from_map(map.as_object().unwrap())?;
    /// assert_eq!(options.write_threshold, 4 * 1024 * 1024);
    /// # Ok::<(), blockwatch_block::BlockError>(())
    /// ```
    pub fn from_map(options: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(options.clone())).map_err(|err| {
            match options.keys().find(|name| name.as_str() != OPT_WRITE_THRESHOLD) {
                Some(unknown) => BlockError::InvalidOption {
                    name: unknown.clone(),
                    reason: "unknown option".to_string(),
                },
                None => BlockError::InvalidOption {
                    name: OPT_WRITE_THRESHOLD.to_string(),
                    reason: err.to_string(),
                },
            }
        })
    }
}

fn parse_number(value: &Value) -> std::result::Result<u64, String> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| format!("{n} is not a non-negative integer below 2^64")),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| format!("'{s}' is not a byte count: {e}")),
        other => Err(format!("expected a number, found {other}")),
    }
}

fn deserialize_number<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_number(&value).map_err(serde::de::Error::custom)
}
