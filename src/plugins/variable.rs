//! Shell variables: the `var` command and `$name` expansion.

use crate::builtin::{BuiltinCommand, Factory};
use crate::command::ExitCode;
use crate::config::VariablesConfig;
use crate::lexer::{StringToken, Token};
use crate::namespace::{ManagedVariable, Namespace, VarValue};
use crate::parser::Expression;
use crate::plugin::{Plugin, TokenOrigin};
use crate::shell::{Shell, ShellContext};
use anyhow::Result;
use argh::FromArgs;
use chrono::Local;
use log::debug;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

/// Outcome of feeding one character to a [`VariableToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStep {
    Continue,
    End,
}

/// A variable reference being accumulated after its prefix character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableToken {
    pub index: usize,
    pub prefix: char,
    pub name: String,
}

impl VariableToken {
    pub fn new(index: usize, prefix: char) -> Self {
        Self {
            index,
            prefix,
            name: String::new(),
        }
    }

    pub fn is_name_char(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_'
    }

    /// Extend the name with `c`, or report that the reference ended before it.
    pub fn add_char(&mut self, c: char) -> TokenStep {
        if Self::is_name_char(c) {
            self.name.push(c);
            TokenStep::Continue
        } else {
            TokenStep::End
        }
    }
}

/// A piece of a string token: literal text or a variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubToken {
    Literal { index: usize, text: String },
    Variable(VariableToken),
}

#[derive(Default)]
struct SubTokenizer {
    out: Vec<SubToken>,
    literal: Option<(usize, String)>,
    var: Option<VariableToken>,
    escape: bool,
}

impl SubTokenizer {
    fn push_literal(&mut self, index: usize, c: char) {
        self.literal
            .get_or_insert_with(|| (index, String::new()))
            .1
            .push(c);
    }

    fn flush_literal(&mut self) {
        if let Some((index, text)) = self.literal.take() {
            self.out.push(SubToken::Literal { index, text });
        }
    }

    fn end_var(&mut self) {
        if let Some(var) = self.var.take() {
            if var.name.is_empty() {
                // a bare prefix is just text, so "$ " prompts survive
                self.push_literal(var.index, var.prefix);
            } else {
                self.flush_literal();
                self.out.push(SubToken::Variable(var));
            }
        }
    }

    fn feed(&mut self, index: usize, c: char, prefix: char) {
        if self.escape {
            self.escape = false;
            if c != prefix {
                self.push_literal(index - 1, '\\');
            }
            self.push_literal(index, c);
            return;
        }

        if let Some(var) = self.var.as_mut() {
            if var.add_char(c) == TokenStep::Continue {
                return;
            }
            self.end_var();
        }

        if c == prefix {
            self.var = Some(VariableToken::new(index, prefix));
        } else if c == '\\' {
            self.escape = true;
        } else {
            self.push_literal(index, c);
        }
    }

    fn finish(mut self, index: usize) -> Vec<SubToken> {
        self.end_var();
        if self.escape {
            self.push_literal(index, '\\');
        }
        self.flush_literal();
        self.out
    }
}

/// Split a token's text into literal and variable subtokens.
///
/// A name is the longest run of `[A-Za-z0-9_]` after `prefix`. `\` before
/// the prefix makes it literal; before any other character both are kept.
pub fn subtokens(token: &StringToken, prefix: char) -> Vec<SubToken> {
    let mut fsm = SubTokenizer::default();
    let mut index = token.index;
    for c in token.text.chars() {
        fsm.feed(index, c, prefix);
        index += 1;
    }
    fsm.finish(index)
}

/// Append `value` as word-split tokens: each whitespace run becomes a
/// separator.
fn push_split(out: &mut Vec<Token>, index: usize, value: &str) {
    if value.trim().is_empty() {
        return;
    }
    if value.starts_with(char::is_whitespace) {
        out.push(Token::whitespace(index));
    }
    for (i, word) in value.split_whitespace().enumerate() {
        if i > 0 {
            out.push(Token::whitespace(index));
        }
        out.push(Token::string(index, word, None));
    }
    if value.ends_with(char::is_whitespace) {
        out.push(Token::whitespace(index));
    }
}

/// Expand variable references in the string tokens of `tokens`.
///
/// Quoted tokens keep each expansion as one token. Unquoted expansions are
/// word-split. Pieces that are not separated by whitespace stay adjacent and
/// are joined into one argument when the statement is built.
pub fn expand_tokens(ctx: &ShellContext, tokens: Vec<Token>, prefix: char) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    for token in tokens {
        let st = match token {
            Token::String(st) if st.text.contains(prefix) => st,
            other => {
                out.push(other);
                continue;
            }
        };
        for sub in subtokens(&st, prefix) {
            match sub {
                SubToken::Literal { index, text } => {
                    out.push(Token::string(index, text, st.quote));
                }
                SubToken::Variable(var) => {
                    let value = ctx.expand_var(&var.name);
                    if st.quote.is_some() {
                        out.push(Token::string(var.index, value, st.quote));
                    } else {
                        push_split(&mut out, var.index, &value);
                    }
                }
            }
        }
    }
    out
}

fn render_time(ctx: &ShellContext, fmt_var: &str, default: &str) -> String {
    let now = Local::now();
    let fmt = ctx
        .var(fmt_var)
        .map(|v| v.resolve(ctx))
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| default.to_string());
    let mut out = String::new();
    if write!(out, "{}", now.format(&fmt)).is_err() {
        debug!("invalid {fmt_var} {fmt:?}, using {default:?}");
        out.clear();
        let _ = write!(out, "{}", now.format(default));
    }
    out
}

/// Variables computed from the shell state on every read.
pub fn managed_variables() -> Vec<(&'static str, ManagedVariable)> {
    vec![
        (
            "date",
            ManagedVariable::read_only(|ctx| render_time(ctx, "datefmt", "%x")),
        ),
        (
            "time",
            ManagedVariable::read_only(|ctx| render_time(ctx, "timefmt", "%X")),
        ),
        (
            "datetime",
            ManagedVariable::read_only(|ctx| render_time(ctx, "datetimefmt", "%c")),
        ),
        (
            "prompt",
            ManagedVariable::read_write(
                |ctx| ctx.prompt(),
                |ctx, value| {
                    ctx.set_prompt(value);
                    Ok(())
                },
            ),
        ),
        (
            "errno",
            ManagedVariable::read_only(|ctx| ctx.errno().to_string()),
        ),
    ]
}

#[derive(FromArgs)]
/// manage shell variables: var name = value, var -l, var -d name.
pub struct Var {
    #[argh(switch, short = 'l')]
    /// list all variables and their values.
    pub list: bool,

    #[argh(option, short = 'd')]
    /// delete the named variable.
    pub delete: Option<String>,

    #[argh(positional, greedy)]
    /// assignment of the form name = value.
    pub expression: Vec<String>,
}

impl Var {
    fn usage_error(ctx: &ShellContext, msg: &str) -> Result<ExitCode> {
        ctx.error(&format!("var: {msg}"), "\n")?;
        ctx.warn("usage: var name = value | var -l | var -d name", "\n")?;
        Ok(1)
    }

    fn list(ctx: &ShellContext) -> Result<ExitCode> {
        let names = ctx.vars().names();
        let width = names.iter().map(|n| n.chars().count()).max().unwrap_or(0);
        for name in names {
            let value = ctx.expand_var(&name);
            ctx.info(&format!("{name:<width$}    {value}"), "\n")?;
        }
        Ok(0)
    }

    fn assign(ctx: &ShellContext, args: &[String]) -> Result<ExitCode> {
        let exp = match Expression::parse(args) {
            Ok(exp) => exp,
            Err(e) => return Self::usage_error(ctx, &e.to_string()),
        };

        match ctx.var(&exp.operand) {
            Some(VarValue::Managed(managed)) => {
                if let Err(e) = managed.set(ctx, &exp.operand, &exp.value) {
                    ctx.error(&format!("var: {e}"), "\n")?;
                    return Ok(1);
                }
            }
            _ => ctx.set_var(exp.operand, exp.value),
        }
        Ok(0)
    }
}

impl BuiltinCommand for Var {
    fn name() -> &'static str {
        "var"
    }

    fn execute(self, ctx: &ShellContext) -> Result<ExitCode> {
        match (self.list, self.delete, self.expression.is_empty()) {
            (true, None, true) => Self::list(ctx),
            (false, Some(name), true) => {
                ctx.remove_var(&name);
                Ok(0)
            }
            (false, None, false) => Self::assign(ctx, &self.expression),
            (false, None, true) => Self::usage_error(ctx, "missing required argument"),
            _ => Self::usage_error(ctx, "invalid arguments"),
        }
    }
}

/// Variable expansion plus the `var` command.
pub struct VariablePlugin {
    prefix: char,
    case_sensitive: bool,
    locals: BTreeMap<String, String>,
    preprocess: i32,
}

impl VariablePlugin {
    pub fn new(prefix: char, case_sensitive: bool, preprocess: i32) -> Self {
        Self {
            prefix,
            case_sensitive,
            locals: BTreeMap::new(),
            preprocess,
        }
    }

    pub fn from_config(config: &VariablesConfig) -> Self {
        Self {
            prefix: config.prefix,
            case_sensitive: config.case_sensitive,
            locals: config.locals.clone(),
            preprocess: config.preprocess,
        }
    }

    pub fn prefix(&self) -> char {
        self.prefix
    }
}

impl Default for VariablePlugin {
    fn default() -> Self {
        Self::new('$', true, 10)
    }
}

impl Plugin for VariablePlugin {
    fn name(&self) -> &str {
        "variable"
    }

    fn preprocess_priority(&self) -> Option<i32> {
        Some(self.preprocess)
    }

    fn setup(&self, shell: &mut Shell) -> Result<()> {
        shell.register(Arc::new(Factory::<Var>::default()));

        let mut namespace = Namespace::from_env(self.case_sensitive);
        for (name, value) in &self.locals {
            namespace.set(name.as_str(), value.as_str());
        }
        for (name, managed) in managed_variables() {
            namespace.set(name, managed);
        }
        debug!("variable namespace seeded with {} entries", namespace.len());
        shell.context().replace_namespace(namespace);
        Ok(())
    }

    fn on_tokenize(
        &self,
        ctx: &ShellContext,
        tokens: Vec<Token>,
        _origin: TokenOrigin,
    ) -> Result<Vec<Token>> {
        Ok(expand_tokens(ctx, tokens, self.prefix))
    }
}
