use crate::command::{Command, ExitCode};
use crate::shell::ShellContext;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::fs::File;
use std::io::{self, Read};
use std::marker::PhantomData;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed
/// in-process on the thread of their pipeline stage.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cat".
    fn name() -> &'static str;

    /// Executes the command against the stage's view of the shell.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, ctx: &ShellContext) -> Result<ExitCode>;
}

/// Adapts a [`BuiltinCommand`] to the registry's [`Command`] interface.
///
/// Usage errors are written to the error channel with status 1, `--help`
/// output goes to the info channel with status 0.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> Command for Factory<T> {
    fn name(&self) -> &str {
        T::name()
    }

    fn run(&self, ctx: &ShellContext, args: &[String]) -> Result<ExitCode> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &args) {
            Ok(cmd) => cmd.execute(ctx),
            Err(EarlyExit { output, status }) => {
                let output = output.trim_end();
                match status {
                    Ok(()) => {
                        ctx.info(output, "\n")?;
                        Ok(0)
                    }
                    Err(()) => {
                        ctx.error(output, "\n")?;
                        Ok(1)
                    }
                }
            }
        }
    }
}

#[derive(FromArgs)]
/// Exit the shell once the current statement finishes.
pub struct Exit {
    #[argh(positional)]
    /// exit code of the statement, 0 when omitted.
    pub code: Option<ExitCode>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, ctx: &ShellContext) -> Result<ExitCode> {
        ctx.request_exit();
        Ok(self.code.unwrap_or(0))
    }
}

#[derive(FromArgs)]
/// display a line of text.
pub struct Echo {
    #[argh(switch, short = 'e')]
    /// print to the error stream.
    pub error: bool,

    #[argh(switch, short = 'w')]
    /// print to the warn stream.
    pub warn: bool,

    #[argh(switch, short = 'i')]
    /// print to the info stream (the default).
    pub info: bool,

    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// message to print, words separated by spaces.
    pub message: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(self, ctx: &ShellContext) -> Result<ExitCode> {
        let text = self.message.join(" ");
        let tail = if self.no_newline { "" } else { "\n" };
        if self.error {
            ctx.error(&text, tail)?;
        } else if self.warn {
            ctx.warn(&text, tail)?;
        } else {
            ctx.info(&text, tail)?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// count lines, words and bytes.
pub struct WC {
    #[argh(positional, greedy)]
    /// files to count, standard input when none are given.
    pub files: Vec<String>,
}

struct Counts {
    lines: usize,
    words: usize,
    bytes: usize,
}

impl Counts {
    fn of(data: &[u8]) -> Self {
        let text = String::from_utf8_lossy(data);
        Self {
            lines: text.lines().count(),
            words: text.split_whitespace().count(),
            bytes: data.len(),
        }
    }
}

impl BuiltinCommand for WC {
    fn name() -> &'static str {
        "wc"
    }

    fn execute(self, ctx: &ShellContext) -> Result<ExitCode> {
        if self.files.is_empty() {
            let mut buf = Vec::new();
            ctx.stdin().read_to_end(&mut buf)?;
            let c = Counts::of(&buf);
            ctx.info(&format!("{} {} {}", c.lines, c.words, c.bytes), "\n")?;
            return Ok(0);
        }
        for fname in &self.files {
            let data = std::fs::read(fname).with_context(|| fname.clone())?;
            let c = Counts::of(&data);
            ctx.info(
                &format!("{} {} {} {}", c.lines, c.words, c.bytes, fname),
                "\n",
            )?;
        }
        Ok(0)
    }
}

#[derive(FromArgs)]
/// print files to standard output.
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print, standard input when none are given.
    pub files: Vec<String>,
}

impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    fn execute(self, ctx: &ShellContext) -> Result<ExitCode> {
        let mut stdout = ctx.stdout();
        if self.files.is_empty() {
            let mut stdin = ctx.stdin();
            io::copy(&mut stdin, &mut stdout)?;
            return Ok(0);
        }
        for fname in &self.files {
            let mut f = File::open(fname).with_context(|| fname.clone())?;
            io::copy(&mut f, &mut stdout)?;
        }
        Ok(0)
    }
}
