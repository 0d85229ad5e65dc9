//! Clock tool - tells the agent the current time

use super::{FunctionError, FunctionResult, Tool, ToolContext};
use async_trait::async_trait;
use chrono::{FixedOffset, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

pub struct ClockTool;

#[derive(Debug, Default, Deserialize)]
struct ClockInput {
    #[serde(default)]
    utc_offset_hours: i32,
}

#[async_trait]
impl Tool for ClockTool {
    fn name(&self) -> &'static str {
        "current_time"
    }

    fn description(&self) -> String {
        "Get the current date and time, optionally shifted by a UTC offset in hours.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "utc_offset_hours": {
                    "type": "integer",
                    "description": "Offset from UTC in hours, between -12 and 14"
                }
            }
        })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> Result<FunctionResult, FunctionError> {
        let input: ClockInput = if input.is_null() {
            ClockInput::default()
        } else {
            serde_json::from_value(input)
                .map_err(|e| FunctionError::InvalidArguments(e.to_string()))?
        };

        if !(-12..=14).contains(&input.utc_offset_hours) {
            return Err(FunctionError::InvalidArguments(format!(
                "utc_offset_hours out of range: {}",
                input.utc_offset_hours
            )));
        }
        let offset = FixedOffset::east_opt(input.utc_offset_hours * 3600).ok_or_else(|| {
            FunctionError::InvalidArguments("invalid utc offset".to_string())
        })?;

        Ok(FunctionResult::text(
            Utc::now().with_timezone(&offset).to_rfc3339(),
        ))
    }
}
