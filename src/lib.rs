//! Automated exploratory data analysis: a planner, coder, critic and
//! reporter around a sandboxed Python execution stage.

pub mod agents;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod evidence;
pub mod execution;
pub mod lint;
pub mod llm;
pub mod pipeline;
pub mod printer;
pub mod process;
pub mod profile;
pub mod role;
pub mod utils;
