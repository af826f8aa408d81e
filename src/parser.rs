//! Grouping of preprocessed tokens into a [`Statement`], and the assignment
//! [`Expression`] parser used by the `var` command.

use crate::error::{ExpressionError, StatementError};
use crate::lexer::{Operator, Token};

/// A file redirect attached to one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// `< path`
    Input(String),
    /// `> path` or `>> path`
    Output { path: String, append: bool },
}

/// A **simple command**: argv (name first) plus its redirects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleCommand {
    pub argv: Vec<String>,
    pub redirects: Vec<Redirect>,
}

impl SimpleCommand {
    pub fn name(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }

    fn is_empty(&self) -> bool {
        self.argv.is_empty() && self.redirects.is_empty()
    }
}

/// When a chain runs relative to the previous chain's exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Always,
    /// after `&&`
    OnSuccess,
    /// after `||`
    OnFailure,
}

impl Condition {
    pub fn should_run(&self, previous: i32) -> bool {
        match self {
            Condition::Always => true,
            Condition::OnSuccess => previous == 0,
            Condition::OnFailure => previous != 0,
        }
    }
}

/// A **pipe chain**: commands connected by `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub condition: Condition,
    pub commands: Vec<SimpleCommand>,
}

/// Everything on one input line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    pub chains: Vec<Chain>,
}

impl Statement {
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

#[derive(Default)]
struct StatementBuilder {
    word: Option<String>,
    command: SimpleCommand,
    commands: Vec<SimpleCommand>,
    chains: Vec<Chain>,
    condition: Option<Condition>,
    pending_redirect: Option<Operator>,
    last_op: Option<Operator>,
}

impl StatementBuilder {
    fn build(mut self, tokens: &[Token]) -> Result<Statement, StatementError> {
        for token in tokens {
            match token {
                Token::String(t) => {
                    // an unquoted empty string carries no word
                    if t.quote.is_some() || !t.text.is_empty() {
                        self.word.get_or_insert_with(String::new).push_str(&t.text);
                        self.last_op = None;
                    }
                }
                Token::Whitespace { .. } => self.end_word(),
                Token::Operator { index, op } => self.operator(*index, *op)?,
            }
        }

        self.end_word();
        if let Some(op) = self.pending_redirect {
            return Err(StatementError::MissingRedirectTarget {
                op: op.as_str().to_string(),
            });
        }
        if self.command.is_empty() {
            match self.last_op {
                Some(op @ (Operator::Pipe | Operator::And | Operator::Or)) => {
                    return Err(StatementError::DanglingOperator {
                        op: op.as_str().to_string(),
                    });
                }
                _ => {}
            }
        }
        self.end_chain();
        Ok(Statement {
            chains: self.chains,
        })
    }

    fn end_word(&mut self) {
        let Some(word) = self.word.take() else {
            return;
        };
        match self.pending_redirect.take() {
            Some(Operator::RedirectIn) => self.command.redirects.push(Redirect::Input(word)),
            Some(op) => self.command.redirects.push(Redirect::Output {
                path: word,
                append: op == Operator::RedirectAppend,
            }),
            None => self.command.argv.push(word),
        }
    }

    fn end_command(&mut self) {
        let command = std::mem::take(&mut self.command);
        if !command.is_empty() {
            self.commands.push(command);
        }
    }

    fn end_chain(&mut self) {
        self.end_command();
        if !self.commands.is_empty() {
            self.chains.push(Chain {
                condition: self.condition.take().unwrap_or(Condition::Always),
                commands: std::mem::take(&mut self.commands),
            });
        }
    }

    fn operator(&mut self, index: usize, op: Operator) -> Result<(), StatementError> {
        self.end_word();
        if let Some(pending) = self.pending_redirect {
            return Err(StatementError::MissingRedirectTarget {
                op: pending.as_str().to_string(),
            });
        }

        let unexpected = || StatementError::UnexpectedOperator {
            op: op.as_str().to_string(),
            index,
        };
        match op {
            Operator::RedirectIn | Operator::RedirectOut | Operator::RedirectAppend => {
                self.pending_redirect = Some(op);
            }
            Operator::Pipe => {
                if self.command.is_empty() {
                    return Err(unexpected());
                }
                self.end_command();
            }
            Operator::And | Operator::Or => {
                if self.command.is_empty() {
                    return Err(unexpected());
                }
                self.end_chain();
                self.condition = Some(if op == Operator::And {
                    Condition::OnSuccess
                } else {
                    Condition::OnFailure
                });
            }
            Operator::Semicolon => {
                if self.command.is_empty() && !self.commands.is_empty() {
                    return Err(unexpected());
                }
                if self.command.is_empty() && self.condition.is_some() {
                    return Err(unexpected());
                }
                self.end_chain();
            }
        }
        self.last_op = Some(op);
        Ok(())
    }
}

/// Build a statement from a fully preprocessed token list.
///
/// Adjacent string tokens with nothing between them join into one argument.
pub fn build_statement(tokens: &[Token]) -> Result<Statement, StatementError> {
    StatementBuilder::default().build(tokens)
}

/// Characters that may form an assignment operator.
pub const OPERATOR_CHARS: &str = "=+-*/:!";

/// An assignment of the form `operand operator value`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expression {
    pub operand: String,
    pub operator: String,
    pub value: String,
}

impl Expression {
    /// Parse one assignment out of an argument list.
    ///
    /// The operand, operator and value may be split across arguments or
    /// glued together (`x=1`, `x = 1`, `x= 1`). A missing value parses as
    /// the empty string. Only `=` is accepted as operator.
    pub fn parse<S: AsRef<str>>(args: &[S]) -> Result<Self, ExpressionError> {
        let mut operand: Option<String> = None;
        let mut operator: Option<String> = None;
        let mut value: Option<String> = None;

        for arg in args {
            let arg = arg.as_ref();
            if operand.is_none() {
                match arg.find(|c: char| OPERATOR_CHARS.contains(c)) {
                    Some(0) => return Err(ExpressionError::MissingOperand),
                    Some(pos) => {
                        operand = Some(arg[..pos].to_string());
                        let (op, rest) = split_operator(&arg[pos..]);
                        operator = Some(op.to_string());
                        if !rest.is_empty() {
                            value = Some(rest.to_string());
                        }
                    }
                    None => operand = Some(arg.to_string()),
                }
            } else if operator.is_none() {
                let (op, rest) = split_operator(arg);
                if op.is_empty() {
                    return Err(ExpressionError::MissingOperator);
                }
                operator = Some(op.to_string());
                if !rest.is_empty() {
                    value = Some(rest.to_string());
                }
            } else if value.is_none() {
                value = Some(arg.to_string());
            } else {
                return Err(ExpressionError::MultipleTargets);
            }
        }

        let operand = operand
            .filter(|s| !s.is_empty())
            .ok_or(ExpressionError::MissingOperand)?;
        let operator = operator.ok_or(ExpressionError::MissingOperator)?;
        if operator != "=" {
            return Err(ExpressionError::InvalidOperator(operator));
        }
        Ok(Expression {
            operand,
            operator,
            value: value.unwrap_or_default(),
        })
    }
}

/// Split a leading operator off `s`. The operator ends after its first `=`,
/// so the value may itself start with operator characters.
fn split_operator(s: &str) -> (&str, &str) {
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if !OPERATOR_CHARS.contains(c) {
            break;
        }
        end = i + c.len_utf8();
        if c == '=' {
            break;
        }
    }
    s.split_at(end)
}
