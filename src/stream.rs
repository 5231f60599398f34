//! Stream provider resolution.
//!
//! A job that reads or writes a data stream describes where in its
//! parameters. Most jobs do not, and that is not an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::model::Params;
use crate::params::{
    STREAM_PROVIDER, STREAM_PROVIDER_INPUT_FILE, STREAM_PROVIDER_OUTPUT_FILE_PATTERN,
    STREAM_PROVIDER_UNIQUE_FILE_NAME, marker_str,
};

/// Where a unit of work reads its input and writes its output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamProviderHandle {
    pub input_file_path: String,
    pub output_file_pattern: String,
    #[serde(default = "default_unique_filename")]
    pub auto_create_unique_filename: bool,
}

fn default_unique_filename() -> bool {
    true
}

/// Read the stream provider out of `params` without modifying them.
///
/// The reserved stream provider entry takes precedence. Without it, a
/// provider is assembled from the separate input file and output pattern
/// entries when both are set.
pub fn resolve(params: &Params) -> Option<StreamProviderHandle> {
    if let Some(value) = params.get(STREAM_PROVIDER) {
        return match serde_json::from_value(value.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "ignoring malformed stream provider parameter");
                None
            }
        };
    }

    let input_file_path = marker_str(params, STREAM_PROVIDER_INPUT_FILE)?;
    let output_file_pattern = marker_str(params, STREAM_PROVIDER_OUTPUT_FILE_PATTERN)?;
    let auto_create_unique_filename = match params.get(STREAM_PROVIDER_UNIQUE_FILE_NAME) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.trim().eq_ignore_ascii_case("false"),
        _ => true,
    };

    Some(StreamProviderHandle {
        input_file_path,
        output_file_pattern,
        auto_create_unique_filename,
    })
}
