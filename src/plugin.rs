//! Plugins and the ordered hook pipeline.
//!
//! A plugin may transform the token stream before a statement is built
//! (preprocess) and observe the exit code once the statement has run
//! (postprocess). Each phase has its own priority; lower runs first and
//! plugins without a priority for a phase are skipped in that phase.

use crate::command::ExitCode;
use crate::lexer::Token;
use crate::shell::{Shell, ShellContext};
use anyhow::Result;
use log::debug;
use std::sync::Arc;

/// Where the tokens handed to a preprocess hook came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// A line entered by the user.
    Input,
    /// The prompt about to be displayed.
    Prompt,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Priority of [`Plugin::on_tokenize`], or `None` to take no part.
    fn preprocess_priority(&self) -> Option<i32> {
        None
    }

    /// Priority of [`Plugin::on_statement_finished`], or `None` to take no part.
    fn postprocess_priority(&self) -> Option<i32> {
        None
    }

    /// Called once when the plugin is registered.
    fn setup(&self, _shell: &mut Shell) -> Result<()> {
        Ok(())
    }

    fn on_tokenize(
        &self,
        _ctx: &ShellContext,
        tokens: Vec<Token>,
        _origin: TokenOrigin,
    ) -> Result<Vec<Token>> {
        Ok(tokens)
    }

    fn on_statement_finished(&self, _ctx: &ShellContext, _rc: ExitCode) -> Result<()> {
        Ok(())
    }
}

/// Registered plugins, kept sorted per phase.
#[derive(Default)]
pub struct HookPipeline {
    preprocess: Vec<(i32, Arc<dyn Plugin>)>,
    postprocess: Vec<(i32, Arc<dyn Plugin>)>,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        if let Some(priority) = plugin.preprocess_priority() {
            debug!("preprocess hook {} at priority {priority}", plugin.name());
            self.preprocess.push((priority, plugin.clone()));
            // stable: equal priorities keep registration order
            self.preprocess.sort_by_key(|(p, _)| *p);
        }
        if let Some(priority) = plugin.postprocess_priority() {
            debug!("postprocess hook {} at priority {priority}", plugin.name());
            self.postprocess.push((priority, plugin));
            self.postprocess.sort_by_key(|(p, _)| *p);
        }
    }

    /// Fold `tokens` through every preprocess hook in priority order.
    /// The first failing hook ends the fold.
    pub fn preprocess(
        &self,
        ctx: &ShellContext,
        tokens: Vec<Token>,
        origin: TokenOrigin,
    ) -> Result<Vec<Token>> {
        self.preprocess
            .iter()
            .try_fold(tokens, |tokens, (_, plugin)| {
                plugin.on_tokenize(ctx, tokens, origin)
            })
    }

    pub fn postprocess(&self, ctx: &ShellContext, rc: ExitCode) -> Result<()> {
        for (_, plugin) in &self.postprocess {
            plugin.on_statement_finished(ctx, rc)?;
        }
        Ok(())
    }

    pub fn preprocess_order(&self) -> Vec<&str> {
        self.preprocess.iter().map(|(_, p)| p.name()).collect()
    }

    pub fn postprocess_order(&self) -> Vec<&str> {
        self.postprocess.iter().map(|(_, p)| p.name()).collect()
    }
}
