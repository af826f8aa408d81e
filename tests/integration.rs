use anyhow::Result;
use shell_pipeline::command::ExitCode;
use shell_pipeline::lexer::Token;
use shell_pipeline::plugin::{Plugin, TokenOrigin};
use shell_pipeline::stream::{MemoryStream, ShellStreams};
use shell_pipeline::{IsolatedShell, Shell, ShellConfig, ShellContext};
use std::sync::{Arc, Mutex};

const LOCALS: &str = r#"
[variables.locals]
name = "World"
words = "a  b"
"#;

fn config(overlay: &str) -> ShellConfig {
    let mut config = ShellConfig::default_config().unwrap();
    config.merge_str(LOCALS).unwrap();
    config.merge_str(overlay).unwrap();
    config
}

fn isolated_with(overlay: &str) -> IsolatedShell {
    let streams = ShellStreams::memory(Arc::default(), Arc::default(), Arc::default());
    let shell = Shell::standard(streams, &config(overlay)).unwrap();
    shell.context().remove_var("undefined");
    IsolatedShell::new(shell, false)
}

fn isolated() -> IsolatedShell {
    isolated_with("")
}

fn run(line: &str) -> (String, Option<ExitCode>) {
    let result = isolated().execute(line);
    assert!(result.error.is_none(), "line: {line}: {:?}", result.error);
    (result.output, result.rc)
}

macro_rules! statement_test {
    ($name:ident, $line:expr, $output:expr) => {
        statement_test!($name, $line, $output, 0);
    };
    ($name:ident, $line:expr, $output:expr, $rc:expr) => {
        #[test]
        fn $name() {
            let (output, rc) = run($line);
            assert_eq!(output, $output, "line: {}", $line);
            assert_eq!(rc, Some($rc), "line: {}", $line);
        }
    };
}

// ── Words and quoting ──

statement_test!(echo_plain, "echo hello world", "hello world\n");
statement_test!(echo_collapses_whitespace, "echo   a    b", "a b\n");
statement_test!(echo_single_quoted, "echo 'a   b'", "a   b\n");
statement_test!(echo_double_quoted, "echo \"a | b\"", "a | b\n");
statement_test!(echo_adjacent_quotes, "echo a'b'\"c\"", "abc\n");
statement_test!(echo_empty_quotes, "echo [\"\"]", "[]\n");
statement_test!(echo_escaped_space, "echo a\\ b", "a b\n");
statement_test!(echo_escaped_operator, "echo a\\|b", "a|b\n");
statement_test!(echo_no_newline, "echo -n x", "x");
statement_test!(empty_line, "", "");

// ── Hex escapes ──

statement_test!(hex_decoded, "echo \\x41\\x42", "AB\n");
statement_test!(hex_in_quotes, "echo '\\x41 \\x42'", "A B\n");
statement_test!(hex_invalid_kept, "echo \\xZZ", "\\xZZ\n");
statement_test!(hex_truncated_kept, "echo \\x4", "\\x4\n");
statement_test!(unknown_escape_kept, "echo a\\nb", "a\\nb\n");

// ── Variables ──

statement_test!(var_simple, "echo Hello $name", "Hello World\n");
statement_test!(var_unset_is_empty, "echo [$undefined]", "[]\n");
statement_test!(var_adjacent_concatenate, "echo $undefined$name", "World\n");
statement_test!(var_adjacent_twice, "echo $name$name", "WorldWorld\n");
statement_test!(var_separate_words, "echo $name $name", "World World\n");
statement_test!(var_quoted_keeps_spaces, "echo \"<$words>\"", "<a  b>\n");
statement_test!(var_unquoted_splits, "echo x$words-", "xa b-\n");
statement_test!(var_escaped_prefix, "echo \\$name", "$name\n");
statement_test!(var_bare_prefix, "echo $ 5", "$ 5\n");
statement_test!(var_name_ends_at_punctuation, "echo $name.txt", "World.txt\n");
statement_test!(var_errno_starts_at_zero, "echo $errno", "0\n");
statement_test!(
    echo_error_channel_with_expansion,
    "echo -e \\x41\\x42 $undefined$name",
    "AB World\n"
);

// ── Pipes and chains ──

statement_test!(pipe_two_stages, "echo hello | wc", "1 1 6\n");
statement_test!(pipe_three_stages, "echo a b c | cat | wc", "1 3 6\n");
statement_test!(chain_semicolon, "echo a; echo b", "a\nb\n");
statement_test!(chain_and, "echo a && echo b", "a\nb\n");
statement_test!(
    chain_and_skips_after_failure,
    "nosuch && echo b",
    "nosuch: command not found\n",
    127
);
statement_test!(
    chain_or_runs_after_failure,
    "nosuch || echo b",
    "nosuch: command not found\nb\n"
);
statement_test!(chain_or_skips_after_success, "echo a || echo b", "a\n");
statement_test!(
    chain_code_is_last_run,
    "nosuch; echo b",
    "nosuch: command not found\nb\n"
);

// ── Malformed statements ──

statement_test!(
    unterminated_quote,
    "echo 'abc",
    "error: unterminated ' quote starting at offset 5\n",
    1
);
statement_test!(
    dangling_pipe,
    "echo a |",
    "error: statement ends with |\n",
    1
);
statement_test!(
    leading_pipe,
    "| echo a",
    "error: unexpected operator | at offset 0\n",
    1
);
statement_test!(
    redirect_without_target,
    "echo a >",
    "error: missing target after >\n",
    1
);

#[test]
fn two_arguments_versus_one() {
    let sh = isolated();
    let argv = |line: &str| {
        let statement = sh.shell().parse(line).unwrap();
        statement.chains[0].commands[0].argv.clone()
    };
    assert_eq!(
        argv("echo -e \\x41\\x42 $undefined$name"),
        vec!["echo", "-e", "AB", "World"]
    );
    assert_eq!(
        argv("echo -e \\x41\\x42 $name $name"),
        vec!["echo", "-e", "AB", "World", "World"]
    );
}

#[test]
fn errno_tracks_previous_statement() {
    let mut sh = isolated();
    sh.execute("nosuch");
    assert_eq!(sh.execute("echo $errno").output, "127\n");
    assert_eq!(sh.execute("echo $errno").output, "0\n");
}

#[test]
fn glued_assignment_values_keep_leading_operator_chars() {
    let mut sh = isolated();
    assert_eq!(sh.execute("var p=/tmp").rc, Some(0));
    assert_eq!(sh.execute("var n=-1").rc, Some(0));
    assert_eq!(sh.execute("echo [$p] [$n]").output, "[/tmp] [-1]\n");
}

#[test]
fn failing_final_stage_sets_code() {
    let result = isolated().execute("echo a | nosuch");
    assert_eq!(result.rc, Some(127));
    assert!(result.output.contains("nosuch: command not found"));
}

#[test]
fn usage_error_reports_and_fails() {
    let (output, rc) = run("echo --bogus");
    assert_eq!(rc, Some(1));
    assert!(output.contains("--bogus"));
}

#[test]
fn file_redirects() {
    let path = std::env::temp_dir().join(format!("shell_redirect_{}", std::process::id()));
    let path = path.to_string_lossy().to_string();
    let mut sh = isolated();

    assert_eq!(sh.execute(&format!("echo hi > {path}")).rc, Some(0));
    assert_eq!(sh.execute(&format!("echo there >> {path}")).rc, Some(0));
    let result = sh.execute(&format!("cat < {path} | wc"));
    assert_eq!(result.output, "2 2 9\n");
    let result = sh.execute(&format!("cat {path}"));
    assert_eq!(result.output, "hi\nthere\n");

    let _ = std::fs::remove_file(&path);
    let result = sh.execute(&format!("cat < {path}"));
    assert_eq!(result.rc, Some(1));
    assert!(result.output.starts_with(&path));
}

#[test]
fn missing_file_is_a_stage_failure() {
    let missing = format!("no_such_file_{}", std::process::id());
    let (output, rc) = run(&format!("cat {missing}"));
    assert_eq!(rc, Some(1));
    assert!(output.starts_with(&format!("cat: {missing}: ")));
}

#[test]
fn exit_requests_shutdown() {
    let mut sh = isolated();
    assert!(!sh.shell().context().should_exit());
    assert_eq!(sh.execute("exit 4").rc, Some(4));
    assert!(sh.shell().context().should_exit());
}

#[test]
fn hexcode_can_be_disabled() {
    let mut sh = isolated_with("[hexcode]\nenabled = false");
    assert_eq!(sh.execute("echo \\x41").output, "\\x41\n");
}

#[test]
fn case_insensitive_variables() {
    let mut sh = isolated_with("[variables]\ncase_sensitive = false");
    assert_eq!(sh.execute("echo $NAME $Name").output, "World World\n");
}

#[test]
fn output_reaches_shell_streams_without_isolation() {
    let out = Arc::new(MemoryStream::default());
    let err = Arc::new(MemoryStream::default());
    let streams = ShellStreams::memory(Arc::default(), out.clone(), err.clone());
    let mut sh = Shell::standard(streams, &config("")).unwrap();
    assert_eq!(sh.execute("echo out; echo -w warn; nosuch").unwrap(), 127);
    assert_eq!(out.contents_lossy(), "out\n");
    assert_eq!(
        err.contents_lossy(),
        "warn\nnosuch: command not found\n"
    );
}

/// Records every statement's code and upper-cases the first word.
struct Recorder {
    codes: Arc<Mutex<Vec<ExitCode>>>,
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn preprocess_priority(&self) -> Option<i32> {
        Some(100)
    }

    fn postprocess_priority(&self) -> Option<i32> {
        Some(1)
    }

    fn on_tokenize(
        &self,
        _ctx: &ShellContext,
        mut tokens: Vec<Token>,
        origin: TokenOrigin,
    ) -> Result<Vec<Token>> {
        if origin == TokenOrigin::Input {
            if let Some(Token::String(t)) = tokens.get_mut(2) {
                t.text = t.text.to_uppercase();
            }
        }
        Ok(tokens)
    }

    fn on_statement_finished(&self, _ctx: &ShellContext, rc: ExitCode) -> Result<()> {
        self.codes.lock().unwrap().push(rc);
        Ok(())
    }
}

#[test]
fn custom_plugin_sees_expanded_tokens_and_codes() {
    let codes = Arc::new(Mutex::new(Vec::new()));
    let mut sh = isolated();
    sh.shell_mut()
        .register_plugin(Arc::new(Recorder {
            codes: codes.clone(),
        }))
        .unwrap();
    assert_eq!(
        sh.shell().hooks().preprocess_order(),
        vec!["hexcode", "variable", "recorder"]
    );

    assert_eq!(sh.execute("echo $name").output, "WORLD\n");
    sh.execute("nosuch");
    sh.execute("echo a |");
    assert_eq!(*codes.lock().unwrap(), vec![0, 127, 1]);
}

struct Broken;

impl Plugin for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    fn preprocess_priority(&self) -> Option<i32> {
        Some(0)
    }

    fn on_tokenize(
        &self,
        _ctx: &ShellContext,
        tokens: Vec<Token>,
        origin: TokenOrigin,
    ) -> Result<Vec<Token>> {
        if origin == TokenOrigin::Input {
            anyhow::bail!("broken hook");
        }
        Ok(tokens)
    }
}

#[test]
fn hook_failure_aborts_statement() {
    let mut sh = isolated();
    sh.shell_mut().register_plugin(Arc::new(Broken)).unwrap();
    let result = sh.execute("echo never");
    assert!(result.rc.is_none());
    assert_eq!(result.error.unwrap().to_string(), "broken hook");
    assert_eq!(result.output, "");
    assert_eq!(result.prompt, vec!["$ ", "$ "]);
}
