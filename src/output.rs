//! Report rendering for the front ends

use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt::Display;

/// How a report is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }

    pub fn render<T: Serialize + Display>(self, value: &T) -> Result<String> {
        match self {
            OutputFormat::Human => Ok(value.to_string()),
            OutputFormat::Json => serde_json::to_string_pretty(value)
                .map_err(|e| Error::Validation(format!("failed to render JSON: {}", e))),
        }
    }
}
