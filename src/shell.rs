use crate::builtin::{Cat, Echo, Exit, Factory, WC};
use crate::command::{Command, CommandRegistry, ExitCode};
use crate::config::ShellConfig;
use crate::error::StageFailure;
use crate::lexer::{self, Token};
use crate::namespace::{Namespace, VarValue};
use crate::parser::{self, Chain, Redirect, SimpleCommand, Statement};
use crate::pipeline::{CommandInvocation, Pipeline};
use crate::plugin::{HookPipeline, Plugin, TokenOrigin};
use crate::plugins::{HexCodePlugin, VariablePlugin};
use crate::stream::{FileStream, ShellStreams, Stream, StreamProxy};
use anyhow::Result;
use log::{debug, trace, warn};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct SessionState {
    prompt: RwLock<String>,
    errno: AtomicI32,
    should_exit: AtomicBool,
}

/// Everything a command, hook or managed variable can see of the shell.
///
/// Cloning is cheap; every clone shares the same streams, commands,
/// variables and session state. Each pipeline stage gets its own clone.
#[derive(Clone)]
pub struct ShellContext {
    streams: ShellStreams,
    registry: Arc<CommandRegistry>,
    namespace: Arc<RwLock<Namespace>>,
    state: Arc<SessionState>,
}

impl ShellContext {
    fn new(streams: ShellStreams, namespace: Namespace, prompt: String) -> Self {
        Self {
            streams,
            registry: Arc::new(CommandRegistry::new()),
            namespace: Arc::new(RwLock::new(namespace)),
            state: Arc::new(SessionState {
                prompt: RwLock::new(prompt),
                errno: AtomicI32::new(0),
                should_exit: AtomicBool::new(false),
            }),
        }
    }

    pub fn streams(&self) -> &ShellStreams {
        &self.streams
    }

    pub fn stdin(&self) -> &StreamProxy {
        &self.streams.stdin
    }

    pub fn stdout(&self) -> &StreamProxy {
        &self.streams.stdout
    }

    pub fn stderr(&self) -> &StreamProxy {
        &self.streams.stderr
    }

    /// Write `text` then `end` to the info channel (stdout).
    pub fn info(&self, text: &str, end: &str) -> io::Result<()> {
        write_channel(self.stdout(), text, end)
    }

    /// Write `text` then `end` to the warn channel (stderr).
    pub fn warn(&self, text: &str, end: &str) -> io::Result<()> {
        write_channel(self.stderr(), text, end)
    }

    /// Write `text` then `end` to the error channel (stderr).
    pub fn error(&self, text: &str, end: &str) -> io::Result<()> {
        write_channel(self.stderr(), text, end)
    }

    pub fn command(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.registry.get(name)
    }

    pub fn vars(&self) -> RwLockReadGuard<'_, Namespace> {
        self.namespace.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn vars_mut(&self) -> RwLockWriteGuard<'_, Namespace> {
        self.namespace.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the stored value. The namespace lock is not held on return,
    /// so the value may be resolved freely.
    pub fn var(&self, name: &str) -> Option<VarValue> {
        self.vars().get(name)
    }

    /// Resolve `name` to text; unknown names resolve to the empty string.
    pub fn expand_var(&self, name: &str) -> String {
        self.var(name)
            .map(|value| value.resolve(self))
            .unwrap_or_default()
    }

    pub fn set_var(&self, name: impl Into<String>, value: impl Into<VarValue>) {
        self.vars_mut().set(name, value);
    }

    pub fn remove_var(&self, name: &str) -> Option<VarValue> {
        self.vars_mut().remove(name)
    }

    pub fn replace_namespace(&self, namespace: Namespace) {
        *self.vars_mut() = namespace;
    }

    pub fn prompt(&self) -> String {
        self.state
            .prompt
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_prompt(&self, prompt: &str) {
        *self
            .state
            .prompt
            .write()
            .unwrap_or_else(PoisonError::into_inner) = prompt.to_string();
    }

    /// Exit code of the last statement.
    pub fn errno(&self) -> ExitCode {
        self.state.errno.load(Ordering::SeqCst)
    }

    fn set_errno(&self, rc: ExitCode) {
        self.state.errno.store(rc, Ordering::SeqCst);
    }

    pub fn request_exit(&self) {
        self.state.should_exit.store(true, Ordering::SeqCst);
    }

    pub fn should_exit(&self) -> bool {
        self.state.should_exit.load(Ordering::SeqCst)
    }
}

fn write_channel(proxy: &StreamProxy, text: &str, end: &str) -> io::Result<()> {
    let mut line = String::with_capacity(text.len() + end.len());
    line.push_str(text);
    line.push_str(end);
    Stream::write_all(proxy, line.as_bytes())?;
    Stream::flush(proxy)
}

/// The statement-processing shell.
///
/// Every line goes through tokenizing, the preprocess hooks, statement
/// building, pipelined execution and finally the postprocess hooks. The
/// whole line is expanded before any of its commands run.
///
/// Example
/// ```
/// use shell_pipeline::{Shell, ShellConfig};
/// use shell_pipeline::stream::{MemoryStream, ShellStreams};
/// use std::sync::Arc;
///
/// let out = Arc::new(MemoryStream::default());
/// let streams = ShellStreams::memory(Arc::default(), out.clone(), Arc::default());
/// let config = ShellConfig::default_config().unwrap();
/// let mut sh = Shell::standard(streams, &config).unwrap();
/// sh.execute("var who = world").unwrap();
/// let code = sh.execute("echo hello $who").unwrap();
/// assert_eq!(code, 0);
/// assert_eq!(out.contents_lossy(), "hello world\n");
/// ```
pub struct Shell {
    ctx: ShellContext,
    hooks: HookPipeline,
}

impl Shell {
    /// A shell with no commands and no plugins.
    pub fn new(streams: ShellStreams, config: &ShellConfig) -> Self {
        Self {
            ctx: ShellContext::new(
                streams,
                Namespace::new(config.variables.case_sensitive),
                config.prompt.clone(),
            ),
            hooks: HookPipeline::new(),
        }
    }

    /// A shell with the built-in commands and the plugins enabled by `config`.
    pub fn standard(streams: ShellStreams, config: &ShellConfig) -> Result<Self> {
        let mut shell = Self::new(streams, config);
        shell.register(Arc::new(Factory::<Echo>::default()));
        shell.register(Arc::new(Factory::<Cat>::default()));
        shell.register(Arc::new(Factory::<WC>::default()));
        shell.register(Arc::new(Factory::<Exit>::default()));
        if config.hexcode.enabled {
            shell.register_plugin(Arc::new(HexCodePlugin::new(config.hexcode.preprocess)))?;
        }
        shell.register_plugin(Arc::new(VariablePlugin::from_config(&config.variables)))?;
        Ok(shell)
    }

    /// A standard shell over the process streams, configured from `path`.
    pub fn from_config_file(path: Option<&Path>) -> Result<Self> {
        let config = ShellConfig::load(path)?;
        Self::standard(ShellStreams::process(config.width), &config)
    }

    pub fn context(&self) -> &ShellContext {
        &self.ctx
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    pub fn register(&mut self, command: Arc<dyn Command>) {
        debug!("registering command {}", command.name());
        Arc::make_mut(&mut self.ctx.registry).register(command);
    }

    /// Run the plugin's setup, then add its hooks to the pipeline.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        plugin.setup(self)?;
        self.hooks.register(plugin);
        Ok(())
    }

    /// Tokenize `line` and run it through the preprocess hooks.
    pub fn preprocess(&self, line: &str, origin: TokenOrigin) -> Result<Vec<Token>> {
        let tokens = lexer::tokenize(line)?;
        trace!("tokens: {tokens:?}");
        let tokens = self.hooks.preprocess(&self.ctx, tokens, origin)?;
        trace!("preprocessed tokens: {tokens:?}");
        Ok(tokens)
    }

    /// Tokenize, preprocess and build the statement for `line`.
    pub fn parse(&self, line: &str) -> Result<Statement> {
        let tokens = self.preprocess(line, TokenOrigin::Input)?;
        Ok(parser::build_statement(&tokens)?)
    }

    /// Execute one input line and return the exit code of the last chain run.
    ///
    /// Malformed input and stage failures are reported on the error channel
    /// and turn into a non-zero code. An error is returned only when a hook
    /// fails.
    pub fn execute(&mut self, line: &str) -> Result<ExitCode> {
        let tokens = match lexer::tokenize(line) {
            Ok(tokens) => tokens,
            Err(e) => return self.finish(self.report(&e)),
        };
        let tokens = self.hooks.preprocess(&self.ctx, tokens, TokenOrigin::Input)?;
        let statement = match parser::build_statement(&tokens) {
            Ok(statement) => statement,
            Err(e) => return self.finish(self.report(&e)),
        };

        let mut rc = 0;
        for chain in &statement.chains {
            if chain.condition.should_run(rc) {
                rc = self.run_chain(chain);
            }
        }
        self.finish(rc)
    }

    fn finish(&self, rc: ExitCode) -> Result<ExitCode> {
        self.ctx.set_errno(rc);
        self.hooks.postprocess(&self.ctx, rc)?;
        Ok(rc)
    }

    fn report(&self, err: &dyn std::fmt::Display) -> ExitCode {
        self.report_line(&format!("error: {err}"));
        1
    }

    fn report_line(&self, text: &str) {
        if let Err(e) = self.ctx.error(text, "\n") {
            debug!("error channel write failed: {e}");
        }
    }

    fn run_chain(&self, chain: &Chain) -> ExitCode {
        let mut invocations = Vec::with_capacity(chain.commands.len());
        for command in &chain.commands {
            match self.invocation(command) {
                Ok(invocation) => invocations.push(invocation),
                Err(failure) => {
                    for invocation in &invocations {
                        if let Err(e) = invocation.close_streams() {
                            debug!("{}: closing streams failed: {e}", invocation.name());
                        }
                    }
                    self.report_line(&failure.to_string());
                    return failure.exit_code();
                }
            }
        }

        let mut pipeline = Pipeline::new(invocations);
        pipeline.start(&self.ctx);
        pipeline.join();
        for stage in pipeline.stages() {
            if let Some(failure) = stage.failure() {
                warn!("stage failed: {failure}");
                self.report_line(&failure.to_string());
            }
        }
        pipeline.exit_code()
    }

    fn invocation(&self, command: &SimpleCommand) -> Result<CommandInvocation, StageFailure> {
        let mut invocation = CommandInvocation::new(
            command.name(),
            command.args().to_vec(),
            self.ctx.streams(),
        );
        for redirect in &command.redirects {
            match redirect {
                Redirect::Input(path) => {
                    let file = FileStream::open(Path::new(path)).map_err(|error| {
                        StageFailure::Redirect {
                            path: path.clone(),
                            error,
                        }
                    })?;
                    invocation.set_stdin(Arc::new(file));
                }
                Redirect::Output { path, append } => {
                    let file = FileStream::create(Path::new(path), *append).map_err(|error| {
                        StageFailure::Redirect {
                            path: path.clone(),
                            error,
                        }
                    })?;
                    invocation.set_stdout(Arc::new(file));
                }
            }
        }
        Ok(invocation)
    }

    /// The prompt with variables and escapes expanded.
    pub fn current_prompt(&self) -> String {
        let raw = self.ctx.prompt();
        match self.preprocess(&raw, TokenOrigin::Prompt) {
            Ok(tokens) => tokens.iter().map(Token::text).collect(),
            Err(e) => {
                debug!("prompt expansion failed: {e:#}");
                raw
            }
        }
    }

    /// Interactive read-eval loop until EOF, interrupt or `exit`.
    pub fn cmdloop(&mut self) -> rustyline::Result<()> {
        let mut rl = DefaultEditor::new()?;

        while !self.ctx.should_exit() {
            match rl.readline(&self.current_prompt()) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line.as_str())?;
                    if let Err(e) = self.execute(&line) {
                        self.report_line(&format!("error: {e:#}"));
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }
}
