//! A statement-processing shell core with pipelined, in-process commands.
//!
//! An input line is split into tokens, rewritten by an ordered chain of
//! plugin hooks (hex escapes, `$variable` expansion), grouped into
//! pipe chains and executed with one thread per stage. Stages talk through
//! in-memory pipes; each stage thread sees its own stdin and stdout through
//! the shell's [`stream::StreamProxy`]s.
//!
//! The main entry point is [`Shell`]. [`IsolatedShell`] runs statements with
//! their output captured, which is handy for embedding and tests. The public
//! modules [`command`] and [`plugin`] expose the traits for implementing your
//! own commands and hooks.

mod builtin;
pub mod command;
pub mod config;
pub mod error;
mod isolate;
pub mod lexer;
pub mod namespace;
pub mod parser;
pub mod pipe;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
mod shell;
pub mod stream;

pub use builtin::{Cat, Echo, Exit, WC};
pub use config::ShellConfig;
pub use isolate::{IsolatedShell, ShellResult};
pub use shell::{Shell, ShellContext};
