//! The expansion engine.
//!
//! [`Expander::subst`] replaces every `$x`, `$(name…)` and `${name…}` in a
//! text with its value; `$$` yields a literal `$`. Each long-form expression
//! may carry a chain of modifiers (see `modifiers.rs`). Problems are
//! recorded as diagnostics on the store and the offending expression
//! evaluates to an error marker; the pass itself always completes.

use crate::scope::{canonical_name, is_dynamic_name, Scope, ScopeKind, Var};
use crate::store::{SetOpts, Vars};
use crate::words::{head, modify_words, tail};

/// How thoroughly to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Check syntax only. Nothing is looked up for its side effects and no
    /// command is run.
    Parse,
    /// Expand; undefined variables expand to nothing.
    Eval,
    /// Expand; an undefined variable is an error.
    EvalDefined,
    /// Expand what is defined and keep undefined expressions verbatim.
    /// With `keep_dollar`, `$$` is kept as `$$` when `.MAKE.SAVE_DOLLARS`
    /// is on.
    Deferred { keep_dollar: bool },
}

impl EvalMode {
    pub fn wants_result(self) -> bool {
        !matches!(self, EvalMode::Parse)
    }

    fn undefined_is_error(self) -> bool {
        matches!(self, EvalMode::EvalDefined)
    }

    fn keeps_undefined(self) -> bool {
        matches!(self, EvalMode::Deferred { .. })
    }

    fn keeps_dollar(self) -> bool {
        matches!(self, EvalMode::Deferred { keep_dollar: true })
    }

    /// The mode for expressions nested in a modifier argument.
    pub(crate) fn nested(self) -> Self {
        match self {
            EvalMode::Deferred { .. } => EvalMode::Deferred { keep_dollar: false },
            other => other,
        }
    }

    /// The mode for the body of a `:@` loop.
    pub(crate) fn for_loop_body(self) -> Self {
        match self {
            EvalMode::Deferred { .. } => EvalMode::Eval,
            other => other,
        }
    }
}

/// The result of evaluating one expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprValue {
    Value(String),
    /// The variable is undefined and nothing made the expression defined.
    Undefined,
    /// A diagnostic has been recorded for the expression.
    Error,
}

impl ExprValue {
    /// The text to substitute; both markers substitute as nothing.
    pub fn as_str(&self) -> &str {
        match self {
            ExprValue::Value(s) => s,
            ExprValue::Undefined | ExprValue::Error => "",
        }
    }

    pub fn into_string(self) -> String {
        match self {
            ExprValue::Value(s) => s,
            ExprValue::Undefined | ExprValue::Error => String::new(),
        }
    }
}

/// Whether the expression being modified refers to a defined variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Defined {
    Regular,
    /// The variable is undefined; the result is discarded unless a
    /// modifier defines the expression.
    Undef,
    /// Undefined, but `:D`, `:U`, `:L`, `:P`, `:?` or `:!cmd!` gave it a value.
    Defined,
}

/// State threaded through one chain of modifiers.
#[derive(Debug)]
pub(crate) struct ModChain {
    /// `(` or `{`, or 0 for an indirect chain.
    pub startc: u8,
    /// `)` or `}`, or 0 for an indirect chain.
    pub endc: u8,
    pub name: String,
    pub value: String,
    pub defined: Defined,
    /// Separator for words produced by per-word modifiers; `None` for `:ts`
    /// with an empty argument.
    pub sep: Option<char>,
    pub one_big_word: bool,
    pub mode: EvalMode,
}

impl ModChain {
    pub fn define(&mut self) {
        if self.defined == Defined::Undef {
            self.defined = Defined::Defined;
        }
    }

    pub fn should_eval(&self) -> bool {
        self.mode.wants_result()
    }

    /// `:` or the end of the expression.
    pub fn is_delim(&self, c: u8) -> bool {
        c == b':' || c == self.endc || c == 0
    }
}

/// A modifier failed and a diagnostic has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ModFailed;

/// Outcome of trying one modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Ok,
    /// Not this modifier; try the next candidate.
    Unknown,
    /// Recognized, but malformed.
    Bad,
}

/// The byte at `i`, or 0 past the end.
pub(crate) fn at(text: &str, i: usize) -> u8 {
    text.as_bytes().get(i).copied().unwrap_or(0)
}

/// Append the character starting at `i`; returns its length.
pub(crate) fn push_char(buf: &mut String, text: &str, i: usize) -> usize {
    match text.get(i..).and_then(|s| s.chars().next()) {
        Some(c) => {
            buf.push(c);
            c.len_utf8()
        }
        None => 1,
    }
}

/// Skip to just past the end of the expression whose modifiers start at or
/// before `p`, honouring nested brackets.
fn skip_to_end(text: &str, mut p: usize, endc: u8) -> usize {
    let mut depth = 1;
    while p < text.len() {
        match at(text, p) {
            b'(' | b'{' => depth += 1,
            c if c == endc || c == b')' || c == b'}' => {
                depth -= 1;
                if depth == 0 {
                    return p;
                }
            }
            _ => {}
        }
        p += 1;
    }
    p
}

// ---------------------------------------------------------------------------
// Expander
// ---------------------------------------------------------------------------

/// Evaluates expressions against a store and, optionally, a target scope.
pub struct Expander<'a> {
    pub(crate) vars: &'a mut Vars,
    pub(crate) target: Option<&'a mut Scope>,
    failed: bool,
}

impl<'a> Expander<'a> {
    pub fn new(vars: &'a mut Vars, target: Option<&'a mut Scope>) -> Self {
        Self {
            vars,
            target,
            failed: false,
        }
    }

    /// Whether any expression evaluated so far recorded an error.
    pub fn failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn error(&mut self, message: impl Into<String>, context: &str) {
        self.failed = true;
        self.vars.diag(message, context);
    }

    pub(crate) fn find(&self, name: &str) -> Option<Var> {
        self.vars
            .find(name, self.target.as_deref())
            .map(|(_, var)| var)
    }

    pub(crate) fn is_defined(&self, name: &str) -> bool {
        self.vars.is_defined(name, self.target.as_deref())
    }

    /// Assign in the scope being expanded in: the target if there is one,
    /// otherwise the global scope.
    pub(crate) fn set_here(&mut self, name: &str, value: &str) {
        match self.target.as_deref_mut() {
            Some(target) => target.set(name, value),
            None => self.vars.set_with(
                ScopeKind::Global,
                name,
                value,
                SetOpts {
                    no_export: true,
                    ..SetOpts::default()
                },
            ),
        }
    }

    pub(crate) fn delete_here(&mut self, name: &str) {
        match self.target.as_deref_mut() {
            Some(target) => {
                target.remove(name);
            }
            None => self.vars.delete(ScopeKind::Global, name),
        }
    }

    /// Expand every expression in `text`.
    ///
    /// Text without `$` is returned unchanged.
    pub fn subst(&mut self, text: &str, mode: EvalMode) -> String {
        if !text.contains('$') {
            return text.to_string();
        }
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut p = 0;
        while p < bytes.len() {
            if bytes[p] == b'$' && at(text, p + 1) == b'$' {
                if mode.keeps_dollar() && self.vars.save_dollars() {
                    out.push('$');
                }
                out.push('$');
                p += 2;
            } else if bytes[p] == b'$' {
                let (value, end) = self.parse_expr(text, p, mode);
                match value {
                    ExprValue::Value(v) => {
                        out.push_str(&v);
                        p = end;
                    }
                    ExprValue::Undefined if mode.keeps_undefined() => {
                        // Keep the `$`; nested expressions after it are
                        // still expanded where possible.
                        out.push('$');
                        p += 1;
                    }
                    ExprValue::Undefined | ExprValue::Error => p = end,
                }
            } else {
                let next = text[p..].find('$').map_or(bytes.len(), |i| p + i);
                out.push_str(&text[p..next]);
                p = next;
            }
        }
        out
    }

    /// Evaluate the expression starting at the `$` at `start`. Returns its
    /// value and the position just past it.
    pub fn parse_expr(&mut self, text: &str, start: usize, mode: EvalMode) -> (ExprValue, usize) {
        let startc = at(text, start + 1);
        if startc != b'(' && startc != b'{' {
            return self.parse_short(text, start, mode);
        }
        let endc = if startc == b'(' { b')' } else { b'}' };

        let mut p = start + 2;
        let name = self.parse_varname(text, &mut p, startc, endc, mode);
        let have_mods = match at(text, p) {
            b':' => true,
            c if c == endc => false,
            _ => {
                self.error(format!("Unclosed variable \"{name}\""), text);
                return (ExprValue::Error, p);
            }
        };

        let mut found = self.find(&name);
        let mut extra: Option<fn(&str) -> &str> = None;
        let nb = name.as_bytes();
        if found.is_none()
            && self.target.is_some()
            && nb.len() == 2
            && matches!(nb[1], b'D' | b'F')
            && b"@%?*!<>".contains(&nb[0])
        {
            found = self.find(&name[..1]);
            if found.is_some() {
                extra = Some(if nb[1] == b'D' { head } else { tail });
            }
        }

        let (mut value, mut defined, dynamic, guard) = match found {
            Some(var) => (var.value, Defined::Regular, false, Some(var.name)),
            None => {
                let dynamic = is_dynamic_name(&name) && self.target.is_none();
                if !have_mods {
                    p += 1;
                    if dynamic {
                        return (ExprValue::Value(text[start..p].to_string()), p);
                    }
                    return (self.undefined(&name, mode, text), p);
                }
                (String::new(), Defined::Undef, dynamic, None)
            }
        };

        if let Some(guard) = &guard {
            let key = canonical_name(guard).to_string();
            if self.vars.in_use.contains(&key) {
                self.error(format!("Variable {name} is recursive."), text);
                let end = skip_to_end(text, p, endc);
                return (ExprValue::Error, (end + 1).min(text.len()));
            }
            if value.contains('$') && mode.wants_result() {
                self.vars.in_use.insert(key.clone());
                value = self.subst(&value, mode);
                self.vars.in_use.remove(&key);
            }
        }

        if let Some(f) = extra {
            value = modify_words(&value, false, Some(' '), |w, out| out.push_str(f(w)));
        }

        if have_mods {
            p += 1;
            let mut chain = ModChain {
                startc,
                endc,
                name: name.clone(),
                value,
                defined,
                sep: Some(' '),
                one_big_word: false,
                mode,
            };
            if self.apply_modifiers(text, &mut p, &mut chain).is_err() {
                let end = skip_to_end(text, p, endc);
                return (ExprValue::Error, (end + 1).min(text.len()));
            }
            value = chain.value;
            defined = chain.defined;
        }

        if p < text.len() {
            p += 1;
        }

        if defined == Defined::Undef {
            if dynamic {
                return (ExprValue::Value(text[start..p].to_string()), p);
            }
            return (self.undefined(&name, mode, text), p);
        }
        (ExprValue::Value(value), p)
    }

    fn parse_short(&mut self, text: &str, start: usize, mode: EvalMode) -> (ExprValue, usize) {
        let Some(c) = text.get(start + 1..).and_then(|s| s.chars().next()) else {
            return (ExprValue::Undefined, start + 1);
        };
        if matches!(c, '$' | ':' | ')' | '}') {
            return (ExprValue::Undefined, start + 1);
        }
        let end = start + 1 + c.len_utf8();
        let name = c.to_string();

        let Some(var) = self.find(&name) else {
            if self.target.is_none() {
                let deferred = match c {
                    '@' => Some("$(.TARGET)"),
                    '%' => Some("$(.MEMBER)"),
                    '*' => Some("$(.PREFIX)"),
                    '!' => Some("$(.ARCHIVE)"),
                    _ => None,
                };
                if let Some(d) = deferred {
                    return (ExprValue::Value(d.to_string()), end);
                }
            }
            return (self.undefined(&name, mode, text), end);
        };

        let key = canonical_name(&var.name).to_string();
        if self.vars.in_use.contains(&key) {
            self.error(format!("Variable {} is recursive.", var.name), text);
            return (ExprValue::Error, end);
        }
        let mut value = var.value;
        if value.contains('$') && mode.wants_result() {
            self.vars.in_use.insert(key.clone());
            value = self.subst(&value, mode);
            self.vars.in_use.remove(&key);
        }
        (ExprValue::Value(value), end)
    }

    fn undefined(&mut self, name: &str, mode: EvalMode, text: &str) -> ExprValue {
        if mode.undefined_is_error() {
            self.error(format!("Variable \"{name}\" is undefined"), text);
            ExprValue::Error
        } else {
            ExprValue::Undefined
        }
    }

    /// Read a variable name up to `:` or the closing bracket, expanding
    /// nested expressions.
    fn parse_varname(
        &mut self,
        text: &str,
        p: &mut usize,
        startc: u8,
        endc: u8,
        mode: EvalMode,
    ) -> String {
        let mut name = String::new();
        let mut depth = 1;
        loop {
            let c = at(text, *p);
            if c == 0 {
                break;
            }
            if c == startc {
                depth += 1;
            }
            if c == endc {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            if c == b':' && depth == 1 {
                break;
            }
            if c == b'$' {
                let (value, end) = self.parse_expr(text, *p, mode);
                name.push_str(value.as_str());
                *p = end;
            } else {
                *p += push_char(&mut name, text, *p);
            }
        }
        name
    }

    // --- modifier chain ---

    /// Apply the modifiers starting at `p` (just after the first `:`) until
    /// the chain's closing bracket.
    pub(crate) fn apply_modifiers(
        &mut self,
        text: &str,
        p: &mut usize,
        ch: &mut ModChain,
    ) -> std::result::Result<(), ModFailed> {
        if at(text, *p) == 0 && ch.endc != 0 {
            self.error(
                format!(
                    "Unclosed variable expression (expecting '{}') for \"{}\"",
                    ch.endc as char, ch.name
                ),
                text,
            );
            return Err(ModFailed);
        }

        while at(text, *p) != 0 && at(text, *p) != ch.endc {
            if at(text, *p) == b'$' && self.apply_indirect(text, p, ch)? {
                continue;
            }

            let mod_start = *p;
            let mut result = self.apply_modifier(text, p, ch)?;
            if result == Applied::Unknown {
                *p = mod_start;
                result = self.apply_sysv(text, p, ch)?;
            }
            match result {
                Applied::Ok => {}
                Applied::Unknown => {
                    let m = modifier_text(text, mod_start);
                    self.error(format!("Unknown modifier \":{m}\""), text);
                    return Err(ModFailed);
                }
                Applied::Bad => {
                    let m = modifier_text(text, mod_start);
                    self.error(
                        format!("Bad modifier \":{m}\" for variable \"{}\"", ch.name),
                        text,
                    );
                    return Err(ModFailed);
                }
            }

            match at(text, *p) {
                0 if ch.endc != 0 => {
                    self.error(
                        format!(
                            "Unclosed variable specification (expecting '{}') for \"{}\"",
                            ch.endc as char, ch.name
                        ),
                        text,
                    );
                    return Err(ModFailed);
                }
                b':' => *p += 1,
                _ => {}
            }
        }
        Ok(())
    }

    /// Handle `${VAR:${MODS}}`: the modifiers come from evaluating an
    /// expression. Returns `false` when the text should instead be tried as
    /// a SysV substitution, as in `${VAR:${FROM}=${TO}}`.
    fn apply_indirect(
        &mut self,
        text: &str,
        p: &mut usize,
        ch: &mut ModChain,
    ) -> std::result::Result<bool, ModFailed> {
        let (mods, end) = self.parse_expr(text, *p, ch.mode);
        let mods = mods.into_string();
        let after = at(text, end);
        if !mods.is_empty() && after != 0 && after != b':' && after != ch.endc {
            return Ok(false);
        }

        // A dynamic local outside a target scope evaluates to its own text,
        // which would be read as the same indirect modifier forever.
        if mods.starts_with('$') {
            self.error(
                format!("Bad modifier \":{mods}\" for variable \"{}\"", ch.name),
                text,
            );
            *p = end;
            return Err(ModFailed);
        }

        if !mods.is_empty() {
            tracing::trace!(mods = %mods, name = %ch.name, "indirect modifiers");
            let mut inner = ModChain {
                startc: 0,
                endc: 0,
                name: ch.name.clone(),
                value: std::mem::take(&mut ch.value),
                defined: ch.defined,
                sep: Some(' '),
                one_big_word: false,
                mode: ch.mode,
            };
            let mut q = 0;
            let result = self.apply_modifiers(&mods, &mut q, &mut inner);
            ch.value = inner.value;
            ch.defined = inner.defined;
            if result.is_err() || q < mods.len() {
                *p = end;
                return Err(ModFailed);
            }
        }

        *p = end;
        match at(text, *p) {
            b':' => *p += 1,
            0 if ch.endc != 0 => {
                self.error(
                    format!(
                        "Unclosed variable specification after complex modifier (expecting '{}') for {}",
                        ch.endc as char, ch.name
                    ),
                    text,
                );
                return Err(ModFailed);
            }
            _ => {}
        }
        Ok(true)
    }
}

/// The text of the modifier at `start`, for messages.
fn modifier_text(text: &str, start: usize) -> &str {
    let rest = text.get(start..).unwrap_or("");
    let end = rest.find([':', ')', '}']).unwrap_or(rest.len());
    &rest[..end]
}
