//! Variables and the scopes that hold them.

use std::collections::BTreeMap;

/// Per-variable attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarFlags {
    /// Materialized from the process environment; never stored in a scope.
    pub from_env: bool,
    /// Assignments are silently ignored.
    pub readonly: bool,
    /// Passed on to child processes.
    pub exported: bool,
    /// The value contains `$` and must be re-expanded for each child.
    pub reexport: bool,
    /// Set on the command line; global assignments to the name are ignored.
    pub from_cmd: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub name: String,
    pub value: String,
    pub flags: VarFlags,
}

impl Var {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            flags: VarFlags::default(),
        }
    }
}

/// Which layer of the lookup chain a scope is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Cmdline,
    Global,
    Internal,
    /// Owned by one target.
    Target,
}

impl ScopeKind {
    pub fn label(self) -> &'static str {
        match self {
            ScopeKind::Cmdline => "Command",
            ScopeKind::Global => "Global",
            ScopeKind::Internal => "Internal",
            ScopeKind::Target => "Target",
        }
    }
}

/// A named table of variables.
///
/// Names are canonicalized on every access, so `.TARGET` and `@` address the
/// same entry.
#[derive(Debug, Clone)]
pub struct Scope {
    kind: ScopeKind,
    name: String,
    vars: BTreeMap<String, Var>,
}

impl Scope {
    pub fn new(kind: ScopeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            vars: BTreeMap::new(),
        }
    }

    /// A target-local scope named after its target.
    pub fn for_target(target: impl Into<String>) -> Self {
        Self::new(ScopeKind::Target, target)
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.vars.get(canonical_name(name))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Var> {
        self.vars.get_mut(canonical_name(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(canonical_name(name))
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|v| v.value.as_str())
    }

    /// Insert or replace without any flag handling. Returns the old entry.
    pub fn insert(&mut self, var: Var) -> Option<Var> {
        let key = canonical_name(&var.name).to_string();
        let var = Var { name: key.clone(), ..var };
        self.vars.insert(key, var)
    }

    /// Plain assignment used for target-local variables such as `.TARGET`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.get_mut(name) {
            Some(var) => var.value = value,
            None => {
                self.insert(Var::new(name, value));
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Var> {
        self.vars.remove(canonical_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Var> {
        self.vars.values()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Map the long spelling of a target-local variable to its one-character
/// canonical form. Other names are returned unchanged.
pub fn canonical_name(name: &str) -> &str {
    match name {
        ".TARGET" => "@",
        ".ALLSRC" => ">",
        ".IMPSRC" => "<",
        ".MEMBER" => "%",
        ".OODATE" => "?",
        ".PREFIX" => "*",
        ".ARCHIVE" => "!",
        other => other,
    }
}

/// Names whose value is only known inside a target, and whose references in
/// global context are therefore kept verbatim for later.
pub fn is_dynamic_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let short = bytes.len() == 1 || (bytes.len() == 2 && matches!(bytes[1], b'F' | b'D'));
    if short {
        return matches!(bytes[0], b'@' | b'%' | b'*' | b'!');
    }
    matches!(name, ".TARGET" | ".ARCHIVE" | ".PREFIX" | ".MEMBER")
}

/// Names that may be placed in a child's environment.
pub fn may_export(name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') || name.starts_with('-') {
        return false;
    }
    !matches!(name, "@" | "%" | "*" | "!")
}
