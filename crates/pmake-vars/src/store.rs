//! The variable store.
//!
//! Holds the command-line, global and internal scopes, a private copy of the
//! process environment that children inherit, the export bookkeeping, and the
//! diagnostics recorded while expanding. Target-local scopes are owned by
//! their targets and passed in where needed.
//!
//! Lookup order for a name is: the target scope (if any), command line,
//! global, internal, then the environment. With `check_env_first` the
//! environment is consulted before global and internal.

use std::collections::{BTreeMap, HashMap, HashSet};

use pmake_shell::Shell;
use pmake_types::{Diagnostic, MakeError, Result};

use crate::expand::{EvalMode, Expander};
use crate::scope::{canonical_name, may_export, Scope, ScopeKind, Var, VarFlags};
use crate::words::split;

/// Names of the variables that are listed for export.
pub const MAKE_EXPORTED: &str = ".MAKE.EXPORTED";
/// Names set on the command line.
pub const MAKEOVERRIDES: &str = ".MAKEOVERRIDES";
/// Whether `$$` survives a deferred assignment as `$$`.
pub const SAVE_DOLLARS: &str = ".MAKE.SAVE_DOLLARS";
/// Recursion depth, incremented for every child.
pub const MAKELEVEL: &str = "MAKELEVEL";

// ---------------------------------------------------------------------------
// Environment copy
// ---------------------------------------------------------------------------

/// The environment as this process would hand it to a child.
///
/// The real process environment is never modified; exports and unexports are
/// recorded here instead.
#[derive(Debug, Clone, Default)]
struct Environ {
    inherited: BTreeMap<String, String>,
    edits: BTreeMap<String, Option<String>>,
    cleared: bool,
}

impl Environ {
    fn get(&self, name: &str) -> Option<&str> {
        match self.edits.get(name) {
            Some(Some(value)) => Some(value),
            Some(None) => None,
            None if self.cleared => None,
            None => self.inherited.get(name).map(String::as_str),
        }
    }

    fn set(&mut self, name: &str, value: &str) {
        self.edits.insert(name.to_string(), Some(value.to_string()));
    }

    fn unset(&mut self, name: &str) {
        self.edits.insert(name.to_string(), None);
    }

    fn clear(&mut self) {
        self.cleared = true;
        self.edits.clear();
    }

    fn pairs(&self) -> Vec<(String, String)> {
        let mut merged: BTreeMap<&str, &str> = BTreeMap::new();
        if !self.cleared {
            for (k, v) in &self.inherited {
                merged.insert(k, v);
            }
        }
        for (k, v) in &self.edits {
            match v {
                Some(v) => {
                    merged.insert(k, v);
                }
                None => {
                    merged.remove(k.as_str());
                }
            }
        }
        merged
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Options and collaborator data
// ---------------------------------------------------------------------------

/// Which globals are re-exported for every child.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportMode {
    #[default]
    None,
    /// The names listed in `.MAKE.EXPORTED`.
    Selected,
    /// Every global variable.
    All,
}

/// Flavours of the `export` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// `export`: mark the variables and keep them exported across updates.
    Normal,
    /// `export-env`: place the current value in the environment only.
    EnvOnly,
    /// `export-literal`: export the value without expanding it.
    Literal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOpts {
    /// Do not export a command-line assignment or record it in
    /// `.MAKEOVERRIDES`.
    pub no_export: bool,
    /// Mark the variable read-only, overwriting a read-only value if needed.
    pub readonly: bool,
}

/// What the dependency graph tells the expansion engine about a target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetInfo {
    /// Where the target was found, for `:P`.
    pub path: Option<String>,
    pub has_commands: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExportHow {
    /// From a directive or an update of an exported variable.
    Parent,
    /// Right before a child is started.
    Plain,
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Exported {
    Skipped,
    /// Marked for expansion at spawn time.
    Deferred,
    /// Already in the environment.
    Unchanged,
    Value(String),
}

impl Exported {
    fn ok(&self) -> bool {
        !matches!(self, Exported::Skipped)
    }
}

// ---------------------------------------------------------------------------
// Vars
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Vars {
    cmdline: Scope,
    global: Scope,
    internal: Scope,
    env: Environ,
    check_env_first: bool,
    export_mode: ExportMode,
    save_dollars: bool,
    makelevel: u32,
    shell: Shell,
    targets: HashMap<String, TargetInfo>,
    pub(crate) realpaths: HashMap<String, String>,
    pub(crate) in_use: HashSet<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Default for Vars {
    fn default() -> Self {
        Self::with_env(std::iter::empty::<(String, String)>())
    }
}

impl Vars {
    /// A store with an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose environment is a snapshot of this process's.
    pub fn from_process_env() -> Self {
        Self::with_env(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    pub fn with_env<I, K, V>(env: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let inherited: BTreeMap<String, String> = env
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let makelevel = inherited
            .get(MAKELEVEL)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        Self {
            cmdline: Scope::new(ScopeKind::Cmdline, "Command"),
            global: Scope::new(ScopeKind::Global, "Global"),
            internal: Scope::new(ScopeKind::Internal, "Internal"),
            env: Environ {
                inherited,
                ..Environ::default()
            },
            check_env_first: false,
            export_mode: ExportMode::None,
            save_dollars: false,
            makelevel,
            shell: Shell::default(),
            targets: HashMap::new(),
            realpaths: HashMap::new(),
            in_use: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    // --- settings ---

    pub fn shell(&self) -> &Shell {
        &self.shell
    }

    pub fn set_shell(&mut self, shell: Shell) {
        self.internal.set(".SHELL", shell.path.clone());
        self.shell = shell;
    }

    pub fn set_check_env_first(&mut self, on: bool) {
        self.check_env_first = on;
    }

    pub fn makelevel(&self) -> u32 {
        self.makelevel
    }

    pub fn save_dollars(&self) -> bool {
        self.save_dollars
    }

    pub fn export_mode(&self) -> ExportMode {
        self.export_mode
    }

    pub fn register_target(&mut self, name: impl Into<String>, info: TargetInfo) {
        self.targets.insert(name.into(), info);
    }

    pub fn target(&self, name: &str) -> Option<&TargetInfo> {
        self.targets.get(name)
    }

    /// The environment value a child would currently see for `name`.
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env.get(name)
    }

    // --- diagnostics ---

    pub(crate) fn diag(&mut self, message: impl Into<String>, context: impl Into<String>) {
        let d = Diagnostic {
            message: message.into(),
            context: context.into(),
        };
        tracing::warn!(message = %d.message, context = %d.context, "expansion problem");
        self.diagnostics.push(d);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Log every command-line, global and internal variable at debug level.
    pub fn dump(&self) {
        for scope in [&self.cmdline, &self.global, &self.internal] {
            for var in scope.iter() {
                tracing::debug!(scope = scope.name(), name = %var.name, value = %var.value, "variable");
            }
        }
    }

    // --- lookup ---

    fn owned(&self, kind: ScopeKind) -> &Scope {
        match kind {
            ScopeKind::Cmdline => &self.cmdline,
            ScopeKind::Internal => &self.internal,
            ScopeKind::Global | ScopeKind::Target => &self.global,
        }
    }

    /// Target-local scopes live with their targets; `Target` maps to the
    /// global scope here and callers use the `_in` operations instead.
    fn owned_mut(&mut self, kind: ScopeKind) -> &mut Scope {
        match kind {
            ScopeKind::Cmdline => &mut self.cmdline,
            ScopeKind::Internal => &mut self.internal,
            ScopeKind::Global | ScopeKind::Target => &mut self.global,
        }
    }

    /// The variable as stored in exactly one scope.
    pub fn get(&self, kind: ScopeKind, name: &str) -> Option<&Var> {
        self.owned(kind).get(name)
    }

    /// Walk the lookup chain. `None` as the location means the environment.
    pub(crate) fn find(
        &self,
        name: &str,
        target: Option<&Scope>,
    ) -> Option<(Option<ScopeKind>, Var)> {
        let name = canonical_name(name);
        if let Some(var) = target.and_then(|s| s.get(name)) {
            return Some((Some(ScopeKind::Target), var.clone()));
        }
        if let Some(var) = self.cmdline.get(name) {
            return Some((Some(ScopeKind::Cmdline), var.clone()));
        }
        if !self.check_env_first {
            if let Some(found) = self.find_global_or_internal(name) {
                return Some(found);
            }
        }
        if let Some(value) = self.env.get(name) {
            let var = Var {
                name: name.to_string(),
                value: value.to_string(),
                flags: VarFlags {
                    from_env: true,
                    ..VarFlags::default()
                },
            };
            return Some((None, var));
        }
        if self.check_env_first {
            return self.find_global_or_internal(name);
        }
        None
    }

    fn find_global_or_internal(&self, name: &str) -> Option<(Option<ScopeKind>, Var)> {
        if let Some(var) = self.global.get(name) {
            return Some((Some(ScopeKind::Global), var.clone()));
        }
        self.internal
            .get(name)
            .map(|var| (Some(ScopeKind::Internal), var.clone()))
    }

    /// The unexpanded value of `name`, searching the whole chain.
    pub fn lookup(&self, name: &str, target: Option<&Scope>) -> Option<String> {
        self.find(name, target).map(|(_, var)| var.value)
    }

    pub fn is_defined(&self, name: &str, target: Option<&Scope>) -> bool {
        self.find(name, target).is_some()
    }

    // --- assignment ---

    /// Expand a name containing `$`. Empty results are ignored.
    fn expand_name(&mut self, name: &str, target: Option<&mut Scope>) -> Option<String> {
        let expanded = if name.contains('$') {
            Expander::new(self, target).subst(name, EvalMode::Eval)
        } else {
            name.to_string()
        };
        if expanded.is_empty() {
            tracing::debug!(name, "variable name expands to empty string, ignored");
            return None;
        }
        Some(expanded)
    }

    pub fn set(&mut self, kind: ScopeKind, name: &str, value: &str) {
        self.set_with(kind, name, value, SetOpts::default());
    }

    /// Assign `value` to `name` in one of the store's scopes.
    ///
    /// A global assignment to a name set on the command line is ignored, as
    /// is any assignment to a read-only variable. A command-line assignment
    /// removes the global of the same name, exports the value (unless the
    /// name starts with `.`) and records the name in `.MAKEOVERRIDES`.
    pub fn set_with(&mut self, kind: ScopeKind, name: &str, value: &str, opts: SetOpts) {
        let Some(name) = self.expand_name(name, None) else {
            return;
        };

        if kind == ScopeKind::Global
            && self.cmdline.get(&name).is_some_and(|v| v.flags.from_cmd)
        {
            tracing::debug!(scope = kind.label(), name = %name, value, "ignored, set on the command line");
            return;
        }

        let existing = self
            .owned(kind)
            .get(&name)
            .map(|v| (v.flags.readonly, v.flags.exported));
        match existing {
            None => {
                if kind == ScopeKind::Cmdline && !opts.no_export {
                    self.delete(ScopeKind::Global, &name);
                }
                let mut var = Var::new(name.clone(), value);
                var.flags.readonly = opts.readonly;
                self.owned_mut(kind).insert(var);
                tracing::debug!(scope = kind.label(), name = %name, value, "set");
            }
            Some((true, _)) if !opts.readonly => {
                tracing::debug!(scope = kind.label(), name = %name, value, "ignored, read-only");
                return;
            }
            Some((_, exported)) => {
                if let Some(var) = self.owned_mut(kind).get_mut(&name) {
                    var.value = value.to_string();
                    if opts.readonly {
                        var.flags.readonly = true;
                    }
                }
                tracing::debug!(scope = kind.label(), name = %name, value, "set");
                if exported {
                    self.export_parent(&name);
                }
            }
        }

        if kind == ScopeKind::Cmdline && !opts.no_export && !name.starts_with('.') {
            if let Some(var) = self.cmdline.get_mut(&name) {
                var.flags.from_cmd = true;
            }
            self.env.set(&name, value);
            self.append(ScopeKind::Global, MAKEOVERRIDES, &name);
        }

        if name == SAVE_DOLLARS {
            self.save_dollars = parse_bool(value, self.save_dollars);
        }
    }

    /// Assign in a target-local scope.
    pub fn set_in(&mut self, target: &mut Scope, name: &str, value: &str) {
        let Some(name) = self.expand_name(name, Some(target)) else {
            return;
        };
        if target.get(&name).is_some_and(|v| v.flags.readonly) {
            tracing::debug!(scope = %target.name(), name = %name, "ignored, read-only");
            return;
        }
        target.set(&name, value);
        if name == SAVE_DOLLARS {
            self.save_dollars = parse_bool(value, self.save_dollars);
        }
    }

    /// Expand `value` in global context, then assign it.
    pub fn set_expand(&mut self, kind: ScopeKind, name: &str, value: &str) {
        let value = self.subst(value, EvalMode::Eval);
        self.set(kind, name, &value);
    }

    /// Append `value` (after a space) to `name`, or set it if undefined.
    ///
    /// A global append looks through the whole chain: a value inherited from
    /// the environment is copied into the scope, a command-line value is
    /// left alone.
    pub fn append(&mut self, kind: ScopeKind, name: &str, value: &str) {
        let Some(name) = self.expand_name(name, None) else {
            return;
        };
        let found = if kind == ScopeKind::Global {
            self.find(&name, None)
        } else {
            self.owned(kind).get(&name).map(|v| (Some(kind), v.clone()))
        };

        let Some((location, var)) = found else {
            self.set(kind, &name, value);
            return;
        };
        if var.flags.readonly {
            tracing::debug!(name = %name, "ignoring append, read-only");
            return;
        }
        if kind != ScopeKind::Cmdline && var.flags.from_cmd {
            return;
        }

        let joined = format!("{} {}", var.value, value);
        match location {
            None => {
                self.owned_mut(kind).insert(Var::new(name.clone(), joined.clone()));
            }
            Some(at) => {
                if let Some(v) = self.owned_mut(at).get_mut(&name) {
                    v.value = joined.clone();
                }
            }
        }
        tracing::debug!(scope = kind.label(), name = %name, value = %joined, "appended");
        if var.flags.exported {
            self.export_parent(&name);
        }
    }

    pub fn append_in(&mut self, target: &mut Scope, name: &str, value: &str) {
        let Some(name) = self.expand_name(name, Some(target)) else {
            return;
        };
        if !target.contains(&name) {
            self.set_in(target, &name, value);
            return;
        }
        if let Some(var) = target.get_mut(&name).filter(|v| !v.flags.readonly) {
            var.value.push(' ');
            var.value.push_str(value);
        }
    }

    pub fn append_expand(&mut self, kind: ScopeKind, name: &str, value: &str) {
        let value = self.subst(value, EvalMode::Eval);
        self.append(kind, name, &value);
    }

    /// Remove `name` from one scope. Exported variables leave the
    /// environment too.
    pub fn delete(&mut self, kind: ScopeKind, name: &str) {
        let Some(name) = self.expand_name(name, None) else {
            return;
        };
        let Some(var) = self.owned_mut(kind).remove(&name) else {
            tracing::debug!(scope = kind.label(), name = %name, "delete (not found)");
            return;
        };
        tracing::debug!(scope = kind.label(), name = %name, "delete");
        if var.flags.exported {
            self.env.unset(&var.name);
        }
        if var.name == MAKE_EXPORTED {
            self.export_mode = ExportMode::None;
        }
    }

    // --- export ---

    fn export_one(&mut self, name: &str, how: ExportHow, target: Option<&mut Scope>) -> Exported {
        if !may_export(name) {
            return Exported::Skipped;
        }
        let parent = how == ExportHow::Parent;
        let Some(var) = self.global.get_mut(name) else {
            return Exported::Skipped;
        };
        if !parent && var.flags.exported && !var.flags.reexport {
            return Exported::Skipped;
        }

        if how != ExportHow::Literal && var.value.contains('$') {
            if parent {
                var.flags.exported = true;
                var.flags.reexport = true;
                return Exported::Deferred;
            }
            if self.in_use.contains(canonical_name(name)) {
                return Exported::Skipped;
            }
            let expr = format!("${{{name}}}");
            let value = Expander::new(self, target).subst(&expr, EvalMode::Eval);
            return Exported::Value(value);
        }

        let was_exported = var.flags.exported;
        if parent {
            var.flags.reexport = false;
            var.flags.exported = true;
        }
        if parent || !was_exported {
            Exported::Value(var.value.clone())
        } else {
            Exported::Unchanged
        }
    }

    fn export_parent(&mut self, name: &str) {
        if let Exported::Value(value) = self.export_one(name, ExportHow::Parent, None) {
            self.env.set(name, &value);
        }
    }

    /// Export the variables named in `names` (expanded first).
    pub fn export(&mut self, names: &str, kind: ExportKind) {
        let how = match kind {
            ExportKind::Normal => ExportHow::Parent,
            ExportKind::EnvOnly => ExportHow::Plain,
            ExportKind::Literal => ExportHow::Literal,
        };
        let list = self.subst(names, EvalMode::Eval);
        for name in split(&list) {
            let result = self.export_one(&name, how, None);
            if let Exported::Value(value) = &result {
                self.env.set(&name, value);
            }
            if result.ok() {
                if self.export_mode == ExportMode::None {
                    self.export_mode = ExportMode::Selected;
                }
                if kind == ExportKind::Normal {
                    self.append(ScopeKind::Global, MAKE_EXPORTED, &name);
                }
            }
        }
    }

    /// Export every global variable to every child.
    pub fn export_all(&mut self) {
        self.export_mode = ExportMode::All;
    }

    /// Handle the text following the `export` keyword of a directive, e.g.
    /// `""`, `" CC CFLAGS"`, `"-env PATH"` or `"-literal X"`.
    pub fn export_directive(&mut self, rest: &str) {
        if rest.trim().is_empty() {
            self.export_all();
        } else if let Some(names) = rest.strip_prefix("-env") {
            self.export(names, ExportKind::EnvOnly);
        } else if let Some(names) = rest.strip_prefix("-literal") {
            self.export(names, ExportKind::Literal);
        } else {
            self.export(rest, ExportKind::Normal);
        }
    }

    /// Stop exporting the named variables, or all of `.MAKE.EXPORTED` when
    /// `names` is blank.
    pub fn unexport(&mut self, names: &str) {
        let names = names.trim();
        self.unexport_list((!names.is_empty()).then_some(names), false);
    }

    /// Start children from an empty environment (keeping `MAKELEVEL`) and
    /// forget every export.
    pub fn unexport_env(&mut self) {
        let level = self.env.get(MAKELEVEL).map(str::to_string);
        self.env.clear();
        if let Some(level) = level.filter(|l| !l.is_empty()) {
            self.env.set(MAKELEVEL, &level);
        }
        self.unexport_list(None, true);
    }

    fn unexport_list(&mut self, names: Option<&str>, env_cleared: bool) {
        let list = match names {
            Some(names) => self.subst(names, EvalMode::Eval),
            None => self.subst(&format!("${{{MAKE_EXPORTED}:O:u}}"), EvalMode::Eval),
        };
        for name in split(&list) {
            let Some(var) = self.global.get_mut(&name) else {
                tracing::debug!(name = %name, "not unexporting (not found)");
                continue;
            };
            tracing::debug!(name = %name, "unexporting");
            let in_env = var.flags.exported && !var.flags.reexport;
            var.flags.exported = false;
            var.flags.reexport = false;
            if !env_cleared && in_env {
                self.env.unset(&name);
            }
            if names.is_some() {
                let remaining =
                    self.subst(&format!("${{{MAKE_EXPORTED}:N{name}}}"), EvalMode::Eval);
                self.set(ScopeKind::Global, MAKE_EXPORTED, &remaining);
            }
        }
        if names.is_none() {
            self.delete(ScopeKind::Global, MAKE_EXPORTED);
        }
    }

    /// The complete environment for a child about to be started on behalf
    /// of `target`. Deferred exports are expanded now; `MAKELEVEL` is one
    /// more than ours.
    pub fn child_env(&mut self, mut target: Option<&mut Scope>) -> Vec<(String, String)> {
        let mut env = self.env.clone();
        env.set(MAKELEVEL, &(self.makelevel + 1).to_string());

        let names: Vec<String> = match self.export_mode {
            ExportMode::None => Vec::new(),
            ExportMode::All => self.global.iter().map(|v| v.name.clone()).collect(),
            ExportMode::Selected => {
                let list = self.subst(&format!("${{{MAKE_EXPORTED}:O:u}}"), EvalMode::Eval);
                split(&list)
            }
        };
        for name in names {
            if let Exported::Value(value) =
                self.export_one(&name, ExportHow::Plain, target.as_deref_mut())
            {
                env.set(&name, &value);
            }
        }
        env.pairs()
    }

    // --- expansion entry points ---

    /// Expand `text` in global context.
    pub fn subst(&mut self, text: &str, mode: EvalMode) -> String {
        Expander::new(self, None).subst(text, mode)
    }

    /// Expand `text` in the context of a target.
    pub fn subst_in(&mut self, text: &str, target: &mut Scope, mode: EvalMode) -> String {
        Expander::new(self, Some(target)).subst(text, mode)
    }

    /// Expand `text`, failing if any expression in it evaluated to an error.
    pub fn subst_checked(
        &mut self,
        text: &str,
        target: Option<&mut Scope>,
        mode: EvalMode,
    ) -> Result<String> {
        let mut expander = Expander::new(self, target);
        let out = expander.subst(text, mode);
        if expander.failed() {
            let message = self
                .diagnostics
                .last()
                .map(|d| d.message.clone())
                .unwrap_or_else(|| format!("cannot expand \"{text}\""));
            return Err(MakeError::Expansion { message });
        }
        Ok(out)
    }
}

/// Interpret a boolean-ish setting; unrecognized text keeps `default`.
pub fn parse_bool(value: &str, default: bool) -> bool {
    let lower = value.to_ascii_lowercase();
    match lower.as_bytes().first() {
        None => false,
        Some(b'0' | b'n' | b'f') => false,
        Some(b'1'..=b'9' | b'y' | b't') => true,
        Some(b'o') => match lower.as_bytes().get(1) {
            Some(b'n') => true,
            Some(b'f') => false,
            _ => default,
        },
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_map(vars: &mut Vars) -> BTreeMap<String, String> {
        vars.child_env(None).into_iter().collect()
    }

    // --- lookup order ---

    #[test]
    fn target_scope_wins_over_global() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "CC", "cc");
        let mut local = Scope::for_target("t");
        local.set("CC", "clang");
        assert_eq!(vars.lookup("CC", Some(&local)).as_deref(), Some("clang"));
        assert_eq!(vars.lookup("CC", None).as_deref(), Some("cc"));
    }

    #[test]
    fn environment_is_last_unless_checked_first() {
        let mut vars = Vars::with_env([("HOME", "/env")]);
        vars.set(ScopeKind::Global, "HOME", "/global");
        assert_eq!(vars.lookup("HOME", None).as_deref(), Some("/global"));
        vars.set_check_env_first(true);
        assert_eq!(vars.lookup("HOME", None).as_deref(), Some("/env"));
    }

    #[test]
    fn internal_is_below_global() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Internal, "X", "internal");
        assert_eq!(vars.lookup("X", None).as_deref(), Some("internal"));
        vars.set(ScopeKind::Global, "X", "global");
        assert_eq!(vars.lookup("X", None).as_deref(), Some("global"));
    }

    // --- assignment ---

    #[test]
    fn command_line_overrides_global() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "OPT", "-O0");
        vars.set(ScopeKind::Cmdline, "OPT", "-O2");
        assert!(vars.get(ScopeKind::Global, "OPT").is_none());
        vars.set(ScopeKind::Global, "OPT", "-O1");
        assert_eq!(vars.lookup("OPT", None).as_deref(), Some("-O2"));
        assert!(vars.get(ScopeKind::Global, "OPT").is_none());
        assert_eq!(vars.lookup(MAKEOVERRIDES, None).as_deref(), Some("OPT"));
        assert_eq!(vars.env_value("OPT"), Some("-O2"));
    }

    #[test]
    fn dotted_command_line_names_are_not_exported() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Cmdline, ".OBJDIR", "/tmp");
        assert_eq!(vars.env_value(".OBJDIR"), None);
        assert!(vars.lookup(MAKEOVERRIDES, None).is_none());
    }

    #[test]
    fn readonly_ignores_assignment() {
        let mut vars = Vars::new();
        let ro = SetOpts {
            readonly: true,
            ..SetOpts::default()
        };
        vars.set_with(ScopeKind::Global, "V", "1", ro);
        vars.set(ScopeKind::Global, "V", "2");
        vars.append(ScopeKind::Global, "V", "3");
        assert_eq!(vars.lookup("V", None).as_deref(), Some("1"));
    }

    #[test]
    fn set_expands_dollar_in_name() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "WHICH", "CFLAGS");
        vars.set(ScopeKind::Global, "${WHICH}", "-g");
        assert_eq!(vars.lookup("CFLAGS", None).as_deref(), Some("-g"));
    }

    #[test]
    fn empty_name_is_ignored() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "${EMPTY}", "x");
        assert_eq!(vars.get(ScopeKind::Global, "").map(|v| v.value.clone()), None);
    }

    #[test]
    fn append_joins_with_space_or_sets() {
        let mut vars = Vars::new();
        vars.append(ScopeKind::Global, "L", "a");
        vars.append(ScopeKind::Global, "L", "b");
        assert_eq!(vars.lookup("L", None).as_deref(), Some("a b"));
    }

    #[test]
    fn append_to_environment_value_installs_global() {
        let mut vars = Vars::with_env([("PATH", "/bin")]);
        vars.append(ScopeKind::Global, "PATH", "/usr/bin");
        let var = vars.get(ScopeKind::Global, "PATH").unwrap();
        assert_eq!(var.value, "/bin /usr/bin");
        assert!(!var.flags.from_env);
    }

    #[test]
    fn append_in_target_scope() {
        let mut vars = Vars::new();
        let mut local = Scope::for_target("t");
        vars.append_in(&mut local, "ALL", "a.o");
        vars.append_in(&mut local, "ALL", "b.o");
        assert_eq!(local.value("ALL"), Some("a.o b.o"));
    }

    #[test]
    fn save_dollars_tracks_the_variable() {
        let mut vars = Vars::new();
        assert!(!vars.save_dollars());
        vars.set(ScopeKind::Global, SAVE_DOLLARS, "yes");
        assert!(vars.save_dollars());
        vars.set(ScopeKind::Global, SAVE_DOLLARS, "no");
        assert!(!vars.save_dollars());
    }

    #[test]
    fn parse_bool_forms() {
        assert!(parse_bool("Yes", false));
        assert!(parse_bool("on", false));
        assert!(!parse_bool("off", true));
        assert!(!parse_bool("0", true));
        assert!(parse_bool("???", true));
    }

    // --- export ---

    #[test]
    fn literal_export_is_immediate() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "CC", "cc");
        vars.export("CC", ExportKind::Normal);
        assert_eq!(vars.env_value("CC"), Some("cc"));
        assert_eq!(vars.lookup(MAKE_EXPORTED, None).as_deref(), Some("CC"));
        vars.set(ScopeKind::Global, "CC", "clang");
        assert_eq!(vars.env_value("CC"), Some("clang"));
    }

    #[test]
    fn export_with_dollar_is_deferred_to_the_child() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "OBJ", "${.TARGET}.o");
        vars.export("OBJ", ExportKind::Normal);
        assert_eq!(vars.env_value("OBJ"), None);
        assert!(vars.get(ScopeKind::Global, "OBJ").unwrap().flags.reexport);

        let mut local = Scope::for_target("prog");
        local.set(".TARGET", "prog");
        let env: BTreeMap<_, _> = vars.child_env(Some(&mut local)).into_iter().collect();
        assert_eq!(env.get("OBJ").map(String::as_str), Some("prog.o"));
        // The store's own environment is unchanged.
        assert_eq!(vars.env_value("OBJ"), None);
    }

    #[test]
    fn export_literal_keeps_dollars() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "RAW", "$HOME");
        vars.export("RAW", ExportKind::Literal);
        assert_eq!(vars.env_value("RAW"), Some("$HOME"));
    }

    #[test]
    fn internal_names_are_never_exported() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, ".HIDDEN", "x");
        vars.export(".HIDDEN", ExportKind::Normal);
        assert_eq!(vars.env_value(".HIDDEN"), None);
        assert_eq!(vars.export_mode(), ExportMode::None);
    }

    #[test]
    fn export_all_reaches_children() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "A", "1");
        vars.set(ScopeKind::Global, "B", "${A}2");
        vars.export_directive("");
        let env = env_map(&mut vars);
        assert_eq!(env.get("A").map(String::as_str), Some("1"));
        assert_eq!(env.get("B").map(String::as_str), Some("12"));
    }

    #[test]
    fn makelevel_is_incremented_for_children() {
        let mut vars = Vars::with_env([("MAKELEVEL", "2")]);
        assert_eq!(vars.makelevel(), 2);
        let env = env_map(&mut vars);
        assert_eq!(env.get("MAKELEVEL").map(String::as_str), Some("3"));
    }

    #[test]
    fn unexport_removes_from_list_and_environment() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "A", "1");
        vars.set(ScopeKind::Global, "B", "2");
        vars.export("A B", ExportKind::Normal);
        vars.unexport("A");
        assert_eq!(vars.env_value("A"), None);
        assert_eq!(vars.env_value("B"), Some("2"));
        assert_eq!(vars.lookup(MAKE_EXPORTED, None).as_deref(), Some("B"));
        vars.unexport("");
        assert_eq!(vars.env_value("B"), None);
        assert!(vars.lookup(MAKE_EXPORTED, None).is_none());
        assert_eq!(vars.export_mode(), ExportMode::None);
    }

    #[test]
    fn unexport_env_clears_inherited_environment() {
        let mut vars = Vars::with_env([("PATH", "/bin"), ("MAKELEVEL", "1")]);
        vars.unexport_env();
        let env = env_map(&mut vars);
        assert!(!env.contains_key("PATH"));
        assert_eq!(env.get("MAKELEVEL").map(String::as_str), Some("2"));
    }

    #[test]
    fn export_env_does_not_mark_the_variable() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "ONCE", "1");
        vars.export_directive("-env ONCE");
        assert_eq!(vars.env_value("ONCE"), Some("1"));
        assert!(!vars.get(ScopeKind::Global, "ONCE").unwrap().flags.exported);
        vars.set(ScopeKind::Global, "ONCE", "2");
        assert_eq!(vars.env_value("ONCE"), Some("1"));
    }
}
