use crate::shell::ShellContext;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Object-safe trait for any command that can be executed by the shell.
///
/// Commands read and write through the context's stream proxies, so the same
/// command works at any position of a pipe chain. Returning `Err` marks the
/// stage as failed; the error is reported by the statement driver.
pub trait Command: Send + Sync {
    /// Name the command is registered under.
    fn name(&self) -> &str;

    /// Executes the command with already expanded arguments.
    fn run(&self, ctx: &ShellContext, args: &[String]) -> Result<ExitCode>;
}

/// Name to handler mapping consulted for every pipeline stage.
#[derive(Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under its name, returning the one it replaces.
    pub fn register(&mut self, command: Arc<dyn Command>) -> Option<Arc<dyn Command>> {
        self.commands.insert(command.name().to_string(), command)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }
}
