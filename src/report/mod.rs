//! Report rendering.

mod generator;

pub use generator::{
    generate_analysis_json, generate_analysis_markdown, generate_guardian_markdown, generate_json,
    generate_status_markdown, write_output,
};
