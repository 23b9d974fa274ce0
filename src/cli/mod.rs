//! Handles Command Line Interface (CLI) related functionalities.
//!
//! Includes the clap command definitions, the command runner with its table
//! output, and the prompts behind the interactive menu.

mod commands;
mod prompts;

pub use commands::*;
pub use prompts::*;
