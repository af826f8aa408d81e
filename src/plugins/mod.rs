//! Plugins shipped with the shell.

mod hexcode;
mod variable;

pub use hexcode::{HexCodePlugin, decode_escapes};
pub use variable::{
    SubToken, TokenStep, Var, VariablePlugin, VariableToken, expand_tokens, managed_variables,
    subtokens,
};
