use anyhow::{Context, Result};
use argh::FromArgs;
use shell_pipeline::Shell;
use std::path::PathBuf;

#[derive(FromArgs)]
/// An interactive shell with pipelines and variables.
struct ShellArgs {
    #[argh(option)]
    /// configuration file merged over the built-in defaults.
    config: Option<PathBuf>,

    #[argh(option, short = 'c')]
    /// execute one statement and exit with its code.
    command: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: ShellArgs = argh::from_env();
    let mut shell = Shell::from_config_file(args.config.as_deref())?;

    match args.command {
        Some(line) => {
            let code = shell.execute(&line)?;
            std::process::exit(code);
        }
        None => shell.cmdloop().context("line editor failed"),
    }
}
