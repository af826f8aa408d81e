//! Shell variables.
//!
//! A [`Namespace`] maps names to [`VarValue`]s. Plain values are stored text,
//! computed values are re-evaluated on every read, and managed values are
//! backed by a getter and an optional setter that see the shell context.

use crate::error::VariableError;
use crate::shell::ShellContext;
use std::collections::HashMap;
use std::env as stdenv;
use std::fmt;
use std::sync::Arc;

pub type Getter = Arc<dyn Fn(&ShellContext) -> String + Send + Sync>;
pub type Setter = Arc<dyn Fn(&ShellContext, &str) -> Result<(), VariableError> + Send + Sync>;

/// A variable backed by a getter and an optional setter.
#[derive(Clone)]
pub struct ManagedVariable {
    getter: Getter,
    setter: Option<Setter>,
}

impl ManagedVariable {
    pub fn read_only(getter: impl Fn(&ShellContext) -> String + Send + Sync + 'static) -> Self {
        Self {
            getter: Arc::new(getter),
            setter: None,
        }
    }

    pub fn read_write(
        getter: impl Fn(&ShellContext) -> String + Send + Sync + 'static,
        setter: impl Fn(&ShellContext, &str) -> Result<(), VariableError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            getter: Arc::new(getter),
            setter: Some(Arc::new(setter)),
        }
    }

    pub fn get(&self, ctx: &ShellContext) -> String {
        (self.getter)(ctx)
    }

    /// Write through the setter. `name` is only used for the error.
    pub fn set(&self, ctx: &ShellContext, name: &str, value: &str) -> Result<(), VariableError> {
        match &self.setter {
            Some(setter) => setter(ctx, value),
            None => Err(VariableError::ReadOnly(name.to_string())),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.setter.is_none()
    }
}

/// The value stored under a variable name.
#[derive(Clone)]
pub enum VarValue {
    Literal(String),
    /// Evaluated with no arguments on every read.
    Computed(Arc<dyn Fn() -> String + Send + Sync>),
    Managed(ManagedVariable),
}

impl VarValue {
    pub fn computed(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        VarValue::Computed(Arc::new(f))
    }

    /// Render the value as text.
    pub fn resolve(&self, ctx: &ShellContext) -> String {
        match self {
            VarValue::Literal(s) => s.clone(),
            VarValue::Computed(f) => f(),
            VarValue::Managed(m) => m.get(ctx),
        }
    }
}

impl fmt::Debug for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            VarValue::Computed(_) => f.write_str("Computed(..)"),
            VarValue::Managed(m) => f
                .debug_struct("Managed")
                .field("read_only", &m.is_read_only())
                .finish(),
        }
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::Literal(s.to_string())
    }
}

impl From<String> for VarValue {
    fn from(s: String) -> Self {
        VarValue::Literal(s)
    }
}

impl From<ManagedVariable> for VarValue {
    fn from(m: ManagedVariable) -> Self {
        VarValue::Managed(m)
    }
}

/// Name to value mapping with configurable case sensitivity.
///
/// When case-insensitive, lookups fold case but the name used on the most
/// recent assignment is the one reported by [`Namespace::names`].
#[derive(Clone, Debug)]
pub struct Namespace {
    case_sensitive: bool,
    vars: HashMap<String, (String, VarValue)>,
}

impl Namespace {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            vars: HashMap::new(),
        }
    }

    /// A namespace seeded from the process environment.
    pub fn from_env(case_sensitive: bool) -> Self {
        let mut ns = Self::new(case_sensitive);
        for (k, v) in stdenv::vars() {
            ns.set(k, v);
        }
        ns
    }

    fn key(&self, name: &str) -> String {
        if self.case_sensitive {
            name.to_string()
        } else {
            name.to_lowercase()
        }
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn get(&self, name: &str) -> Option<VarValue> {
        self.vars.get(&self.key(name)).map(|(_, v)| v.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(&self.key(name))
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<VarValue>) {
        let name = name.into();
        self.vars.insert(self.key(&name), (name, value.into()));
    }

    pub fn remove(&mut self, name: &str) -> Option<VarValue> {
        self.vars.remove(&self.key(name)).map(|(_, v)| v)
    }

    /// Variable names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.vars.values().map(|(n, _)| n.clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(true)
    }
}
