//! Terminal front end for a realtime fitness coaching session.
//!
//! `main.rs` is the composition root; this library holds the argument
//! parser and command handlers so they can be tested without a terminal.

#![deny(unsafe_code)]
#![deny(unused_crate_dependencies)]

// Used by main.rs only
use dotenvy as _;
use tracing_subscriber as _;

pub mod commands;
pub mod handlers;
pub mod parser;
pub mod utils;

pub use commands::{Commands, TalkArgs};
pub use parser::Cli;
