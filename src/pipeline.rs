//! Concurrent execution of one pipe chain.
//!
//! Each stage runs on its own thread. Adjacent stages are connected by an
//! in-memory [`pipe`]; while a stage runs, the shell's stream proxies point
//! at that stage's streams for the stage thread only.

use crate::command::ExitCode;
use crate::error::StageFailure;
use crate::pipe::pipe;
use crate::shell::ShellContext;
use crate::stream::{ShellStreams, SharedStream, Stream, StreamProxy, StreamTarget};
use log::{debug, warn};
use std::any::Any;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

struct Slot {
    target: StreamTarget,
    /// Streams opened for this invocation (pipes, files). Only these are
    /// closed when the invocation ends.
    owned: bool,
}

impl Slot {
    fn inherited(proxy: &StreamProxy) -> Self {
        Self {
            target: proxy.effective_target(),
            owned: false,
        }
    }

    fn owned(stream: SharedStream, width: Option<usize>) -> Self {
        Self {
            target: StreamTarget::new(stream)
                .with_width(width)
                .with_isatty(Some(false)),
            owned: true,
        }
    }
}

/// One pipeline stage: a command name, its arguments and its three streams.
pub struct CommandInvocation {
    name: String,
    args: Vec<String>,
    stdin: Slot,
    stdout: Slot,
    stderr: Slot,
    closed: AtomicBool,
}

impl CommandInvocation {
    /// An invocation using the streams the calling thread currently sees.
    pub fn new(name: impl Into<String>, args: Vec<String>, streams: &ShellStreams) -> Self {
        Self {
            name: name.into(),
            args,
            stdin: Slot::inherited(&streams.stdin),
            stdout: Slot::inherited(&streams.stdout),
            stderr: Slot::inherited(&streams.stderr),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn set_stdin(&mut self, stream: SharedStream) {
        self.stdin = Slot::owned(stream, self.stdin.target.width);
    }

    pub fn set_stdout(&mut self, stream: SharedStream) {
        self.stdout = Slot::owned(stream, self.stdout.target.width);
    }

    pub fn stdin_is_default(&self) -> bool {
        !self.stdin.owned
    }

    pub fn stdout_is_default(&self) -> bool {
        !self.stdout.owned
    }

    /// Close the streams opened for this invocation.
    ///
    /// Only the first call does anything. Every stream is closed even when
    /// an earlier one fails; the first failure is returned.
    pub fn close_streams(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut result = Ok(());
        for slot in [&self.stdin, &self.stdout, &self.stderr] {
            if !slot.owned {
                continue;
            }
            let closed = slot.target.stream.flush().and(slot.target.stream.close());
            if result.is_ok() {
                result = closed;
            }
        }
        result
    }

    /// Run the command on the calling thread with this invocation's streams.
    pub fn run(&self, ctx: &ShellContext) -> Result<ExitCode, StageFailure> {
        let _overrides = OverrideGuard::install(
            ctx.streams(),
            [&self.stdin.target, &self.stdout.target, &self.stderr.target],
        );

        // redirects only
        if self.name.is_empty() {
            return Ok(0);
        }

        let command = ctx
            .command(&self.name)
            .ok_or_else(|| StageFailure::NotFound(self.name.clone()))?;
        debug!("running {} {:?}", self.name, self.args);
        let result = command.run(ctx, &self.args);
        if let Err(e) = Stream::flush(ctx.stdout()) {
            debug!("{}: flushing stdout failed: {e}", self.name);
        }
        result.map_err(|error| StageFailure::Command {
            name: self.name.clone(),
            error,
        })
    }
}

/// Points the shell proxies at one invocation's streams for the current
/// thread until dropped.
struct OverrideGuard<'a> {
    proxies: [&'a StreamProxy; 3],
}

impl<'a> OverrideGuard<'a> {
    fn install(streams: &'a ShellStreams, targets: [&StreamTarget; 3]) -> Self {
        let proxies = [&*streams.stdin, &*streams.stdout, &*streams.stderr];
        for (proxy, target) in proxies.iter().zip(targets) {
            proxy.proxy(target.clone());
        }
        Self { proxies }
    }
}

impl Drop for OverrideGuard<'_> {
    fn drop(&mut self) {
        for proxy in self.proxies {
            proxy.remove_override(None);
        }
    }
}

/// Closes the invocation's streams when the stage thread exits, so that
/// neighbouring stages see end of file or a broken pipe.
struct CloseOnExit<'a>(&'a CommandInvocation);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.0.close_streams() {
            debug!("{}: closing streams failed: {e}", self.0.name);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A thread running exactly one [`CommandInvocation`].
pub struct InvocationThread {
    invocation: Arc<CommandInvocation>,
    handle: Option<JoinHandle<Result<ExitCode, StageFailure>>>,
    rc: Option<ExitCode>,
    failure: Option<StageFailure>,
}

impl InvocationThread {
    pub fn new(invocation: CommandInvocation) -> Self {
        Self {
            invocation: Arc::new(invocation),
            handle: None,
            rc: None,
            failure: None,
        }
    }

    pub fn invocation(&self) -> &CommandInvocation {
        &self.invocation
    }

    /// Spawn the stage thread. A spawn failure is also recorded as the
    /// stage's failure.
    pub fn start(&mut self, ctx: &ShellContext) -> io::Result<()> {
        let invocation = self.invocation.clone();
        let ctx = ctx.clone();
        let spawned = thread::Builder::new()
            .name(format!("stage:{}", invocation.name))
            .spawn(move || {
                let _close = CloseOnExit(&invocation);
                invocation.run(&ctx)
            });
        match spawned {
            Ok(handle) => {
                debug!("stage {} started", self.invocation.name);
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                if let Err(e) = self.invocation.close_streams() {
                    debug!("{}: closing streams failed: {e}", self.invocation.name);
                }
                self.failure = Some(StageFailure::Command {
                    name: self.invocation.name.clone(),
                    error: anyhow::anyhow!("can't start stage: {e}"),
                });
                Err(e)
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Unblock a running stage by closing its streams.
    ///
    /// Does nothing once the stage has finished. Work that never touches a
    /// stream cannot be interrupted.
    pub fn stop(&self) {
        if !self.is_alive() {
            return;
        }
        debug!("stopping stage {}", self.invocation.name);
        if let Err(e) = self.invocation.close_streams() {
            debug!("{}: closing streams failed: {e}", self.invocation.name);
        }
    }

    /// Wait for the stage and record its outcome.
    pub fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match handle.join() {
            Ok(Ok(rc)) => self.rc = Some(rc),
            Ok(Err(failure)) => self.failure = Some(failure),
            Err(payload) => {
                let failure = StageFailure::Panicked {
                    name: self.invocation.name.clone(),
                    message: panic_message(payload.as_ref()),
                };
                warn!("{failure}");
                self.failure = Some(failure);
            }
        }
        debug!("stage {} joined", self.invocation.name);
    }

    /// The command's return code, if it returned one.
    pub fn rc(&self) -> Option<ExitCode> {
        self.rc
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    /// Code reported for this stage once it has been joined.
    pub fn exit_code(&self) -> ExitCode {
        match (&self.rc, &self.failure) {
            (Some(rc), _) => *rc,
            (None, Some(failure)) => failure.exit_code(),
            (None, None) => 1,
        }
    }
}

/// The stages of one pipe chain, connected left to right.
pub struct Pipeline {
    stages: Vec<InvocationThread>,
}

impl Pipeline {
    /// Connect each stage's stdout to the next stage's stdin. Explicit
    /// redirects are left in place.
    pub fn new(mut invocations: Vec<CommandInvocation>) -> Self {
        for i in 1..invocations.len() {
            let (reader, writer) = pipe();
            if invocations[i - 1].stdout_is_default() {
                invocations[i - 1].set_stdout(Arc::new(writer));
            }
            if invocations[i].stdin_is_default() {
                invocations[i].set_stdin(Arc::new(reader));
            }
        }
        Self {
            stages: invocations.into_iter().map(InvocationThread::new).collect(),
        }
    }

    /// Start every stage, left to right.
    pub fn start(&mut self, ctx: &ShellContext) {
        for stage in &mut self.stages {
            if let Err(e) = stage.start(ctx) {
                warn!("{}: can't start stage: {e}", stage.invocation.name);
            }
        }
    }

    pub fn stop(&self) {
        for stage in &self.stages {
            stage.stop();
        }
    }

    pub fn join(&mut self) {
        for stage in &mut self.stages {
            stage.join();
        }
    }

    pub fn stages(&self) -> &[InvocationThread] {
        &self.stages
    }

    /// The final stage's code; earlier stages do not affect it.
    pub fn exit_code(&self) -> ExitCode {
        self.stages.last().map_or(0, InvocationThread::exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::config::ShellConfig;
    use crate::shell::Shell;
    use crate::stream::MemoryStream;
    use anyhow::Result;
    use std::io::{Read, Write};
    use std::time::{Duration, Instant};

    struct Produce;

    impl Command for Produce {
        fn name(&self) -> &str {
            "produce"
        }

        fn run(&self, ctx: &ShellContext, args: &[String]) -> Result<ExitCode> {
            let mut out = ctx.stdout();
            write!(out, "{}", args.join(" "))?;
            Ok(0)
        }
    }

    struct Upper;

    impl Command for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn run(&self, ctx: &ShellContext, _args: &[String]) -> Result<ExitCode> {
            let mut input = String::new();
            ctx.stdin().read_to_string(&mut input)?;
            ctx.info(&input.to_uppercase(), "")?;
            Ok(0)
        }
    }

    struct Bracket;

    impl Command for Bracket {
        fn name(&self) -> &str {
            "bracket"
        }

        fn run(&self, ctx: &ShellContext, _args: &[String]) -> Result<ExitCode> {
            let mut input = String::new();
            ctx.stdin().read_to_string(&mut input)?;
            ctx.info(&format!("[{input}]"), "")?;
            Ok(3)
        }
    }

    struct Boom;

    impl Command for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn run(&self, _ctx: &ShellContext, _args: &[String]) -> Result<ExitCode> {
            panic!("boom")
        }
    }

    fn shell() -> (Shell, Arc<MemoryStream>) {
        let out = Arc::new(MemoryStream::default());
        let streams = ShellStreams::memory(Arc::default(), out.clone(), Arc::default());
        let config = ShellConfig::default_config().unwrap();
        let mut sh = Shell::standard(streams, &config).unwrap();
        sh.register(Arc::new(Produce));
        sh.register(Arc::new(Upper));
        sh.register(Arc::new(Bracket));
        sh.register(Arc::new(Boom));
        (sh, out)
    }

    fn invocation(sh: &Shell, name: &str, args: &[&str]) -> CommandInvocation {
        CommandInvocation::new(
            name,
            args.iter().map(|s| s.to_string()).collect(),
            sh.context().streams(),
        )
    }

    fn wait_until_finished(stage: &InvocationThread) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while stage.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!stage.is_alive(), "stage did not finish in time");
    }

    #[test]
    fn test_three_stage_chain_routes_through_pipes() {
        let (sh, out) = shell();
        let mut pipeline = Pipeline::new(vec![
            invocation(&sh, "produce", &["hello", "pipe"]),
            invocation(&sh, "upper", &[]),
            invocation(&sh, "bracket", &[]),
        ]);
        pipeline.start(sh.context());
        pipeline.join();

        assert_eq!(out.contents_lossy(), "[HELLO PIPE]");
        let rcs: Vec<_> = pipeline.stages().iter().map(|s| s.rc()).collect();
        assert_eq!(rcs, vec![Some(0), Some(0), Some(3)]);
        assert_eq!(pipeline.exit_code(), 3);
        assert!(!sh.context().stdout().has_override(thread::current().id()));
    }

    #[test]
    fn test_stop_unblocks_pending_read() {
        let (sh, _) = shell();
        let (reader, writer) = pipe();
        let mut inv = invocation(&sh, "cat", &[]);
        inv.set_stdin(Arc::new(reader));
        let mut stage = InvocationThread::new(inv);
        stage.start(sh.context()).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(stage.is_alive());

        stage.stop();
        wait_until_finished(&stage);
        stage.join();
        assert_eq!(stage.rc(), None);
        assert!(matches!(stage.failure(), Some(StageFailure::Command { .. })));
        drop(writer);
    }

    #[test]
    fn test_stop_after_completion_is_noop() {
        let (sh, out) = shell();
        let mut stage = InvocationThread::new(invocation(&sh, "echo", &["done"]));
        stage.start(sh.context()).unwrap();
        wait_until_finished(&stage);
        stage.stop();
        stage.join();
        stage.stop();
        assert_eq!(stage.rc(), Some(0));
        assert!(stage.failure().is_none());
        assert_eq!(out.contents_lossy(), "done\n");
    }

    #[test]
    fn test_close_streams_is_idempotent_without_start() {
        let (sh, _) = shell();
        let (reader, writer) = pipe();
        let mut inv = invocation(&sh, "cat", &[]);
        inv.set_stdin(Arc::new(reader));
        inv.set_stdout(Arc::new(MemoryStream::default()));
        assert!(inv.close_streams().is_ok());
        assert!(inv.close_streams().is_ok());
        assert_eq!(
            writer.write(b"x").unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );

        let stage = InvocationThread::new(inv);
        assert!(!stage.is_alive());
        stage.stop();
    }

    #[test]
    fn test_unknown_command_and_panics_are_recorded() {
        let (sh, _) = shell();
        let mut pipeline = Pipeline::new(vec![
            invocation(&sh, "boom", &[]),
            invocation(&sh, "nosuchcommand", &[]),
        ]);
        pipeline.start(sh.context());
        pipeline.join();

        let stages = pipeline.stages();
        assert!(matches!(
            stages[0].failure(),
            Some(StageFailure::Panicked { message, .. }) if message == "boom"
        ));
        assert!(matches!(
            stages[1].failure(),
            Some(StageFailure::NotFound(name)) if name == "nosuchcommand"
        ));
        assert_eq!(pipeline.exit_code(), 127);
    }

    #[test]
    fn test_explicit_redirect_wins_over_pipe() {
        let (sh, out) = shell();
        let captured = Arc::new(MemoryStream::default());
        let mut first = invocation(&sh, "produce", &["kept"]);
        first.set_stdout(captured.clone());
        let mut pipeline = Pipeline::new(vec![first, invocation(&sh, "bracket", &[])]);
        pipeline.start(sh.context());
        pipeline.join();

        assert_eq!(captured.contents_lossy(), "kept");
        assert_eq!(out.contents_lossy(), "[]");
    }
}
