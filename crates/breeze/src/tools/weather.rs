use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::FunctionTool;
use crate::errors::AgentResult;

#[derive(Debug, Deserialize)]
pub struct WeatherInput {
    pub location: String,
}

/// Reports the weather for a location. This is a canned answer, no lookup happens.
#[derive(Debug, Default, Clone, Copy)]
pub struct GetWeather;

impl GetWeather {
    pub const NAME: &'static str = "get_weather";

    pub fn forecast(location: &str) -> String {
        format!("The weather in {} is sunny with  22 degrees C.", location)
    }
}

#[async_trait]
impl FunctionTool for GetWeather {
    type Input = WeatherInput;

    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Fetch the weather for a given location."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["location"],
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city or place to get the weather for, e.g. Lahore"
                }
            }
        })
    }

    async fn call(&self, input: WeatherInput) -> AgentResult<String> {
        Ok(Self::forecast(&input.location))
    }
}
