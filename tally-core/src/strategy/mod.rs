//! Provider-specific behaviours.

pub mod json_output;

pub use json_output::{
    detect_json_strategy, JsonModeStrategy, JsonOutputStrategy, JsonSchemaStrategy,
};
