//! Run statements with their output captured instead of printed.

use crate::command::ExitCode;
use crate::shell::Shell;
use crate::stream::{MemoryStream, StreamProxy, StreamTarget};
use std::sync::Arc;

/// Declared width of the capture buffer.
const CAPTURE_WIDTH: usize = 80;

/// Outcome of one statement run through an [`IsolatedShell`].
#[derive(Debug)]
pub struct ShellResult {
    /// The rendered prompt before and after the statement.
    pub prompt: Vec<String>,
    /// Everything written to stdout and stderr, interleaved.
    pub output: String,
    /// Set when a hook failed and the statement was aborted.
    pub error: Option<anyhow::Error>,
    pub rc: Option<ExitCode>,
}

/// Redirects the calling thread's view of some proxies until dropped.
struct Capture<'a> {
    proxies: Vec<&'a StreamProxy>,
}

impl<'a> Capture<'a> {
    fn new(proxies: Vec<&'a StreamProxy>, target: &StreamTarget) -> Self {
        for proxy in &proxies {
            proxy.proxy(target.clone());
        }
        Self { proxies }
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        for proxy in &self.proxies {
            proxy.remove_override(None);
        }
    }
}

/// Wraps a [`Shell`] so that each statement's output is returned rather
/// than written to the shell's streams.
pub struct IsolatedShell {
    shell: Shell,
    atty: bool,
}

impl IsolatedShell {
    pub fn new(shell: Shell, atty: bool) -> Self {
        Self { shell, atty }
    }

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    pub fn shell_mut(&mut self) -> &mut Shell {
        &mut self.shell
    }

    pub fn into_inner(self) -> Shell {
        self.shell
    }

    fn capture_target(&self) -> (Arc<MemoryStream>, StreamTarget) {
        let stream = Arc::new(MemoryStream::new(self.atty));
        let target = StreamTarget::new(stream.clone()).with_width(Some(CAPTURE_WIDTH));
        (stream, target)
    }

    /// The prompt as it would be displayed now.
    pub fn prompt(&self) -> String {
        let (_, target) = self.capture_target();
        let streams = self.shell.context().streams().clone();
        let _capture = Capture::new(vec![&streams.stdout], &target);
        self.shell.current_prompt()
    }

    /// Execute `line`, capturing stdout and stderr into one buffer.
    pub fn execute(&mut self, line: &str) -> ShellResult {
        let (stream, target) = self.capture_target();
        let streams = self.shell.context().streams().clone();
        let _capture = Capture::new(vec![&streams.stdout, &streams.stderr], &target);

        let mut result = ShellResult {
            prompt: vec![self.shell.current_prompt()],
            output: String::new(),
            error: None,
            rc: None,
        };
        match self.shell.execute(line) {
            Ok(rc) => result.rc = Some(rc),
            Err(e) => result.error = Some(e),
        }
        result.output = stream.contents_lossy();
        result.prompt.push(self.shell.current_prompt());
        result
    }
}
