//! The modifiers of `${VAR:mod1:mod2...}`.
//!
//! Each modifier starts at `p`, which points at its first character, and
//! leaves `p` on the `:` or closing bracket that ends it. Modifiers that do
//! not recognize their text return [`Applied::Unknown`] so the caller can
//! fall back to a SysV substitution.

use std::os::unix::fs::MetadataExt;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use pmake_shell::capture;
use rand::seq::SliceRandom;
use regex::Regex;

use crate::cond;
use crate::expand::{at, push_char, Applied, Defined, EvalMode, Expander, ModChain, ModFailed};
use crate::pattern::WordPattern;
use crate::scope::ScopeKind;
use crate::words::{
    hash, head, modify_words, numeric_key, parse_c_int, quote, root, select_words, split,
    suffix, sysv_match, sysv_replace, tail, uniq, SepBuf,
};

type ModResult = Result<Applied, ModFailed>;

/// How special characters are treated in a delimited modifier argument.
#[derive(Debug, Clone, Copy)]
enum Part<'l> {
    Plain,
    /// A `$` just before the delimiter anchors the pattern at the end.
    Pattern,
    /// `&` stands for the pattern; `\&` is a literal `&`.
    Replacement(&'l str),
}

/// Per-word state of `:S`.
struct SubstArgs<'s> {
    lhs: &'s str,
    rhs: &'s str,
    anchor_start: bool,
    anchor_end: bool,
    global: bool,
    once: bool,
    matched: bool,
}

/// `name` followed by the end of the modifier.
fn named(text: &str, p: usize, name: &str, ch: &ModChain) -> bool {
    text.get(p..).is_some_and(|s| s.starts_with(name)) && ch.is_delim(at(text, p + name.len()))
}

/// `name` followed by the end of the modifier or by `=`.
fn named_eq(text: &str, p: usize, name: &str, ch: &ModChain) -> bool {
    text.get(p..).is_some_and(|s| s.starts_with(name))
        && (ch.is_delim(at(text, p + name.len())) || at(text, p + name.len()) == b'=')
}

/// The run of ASCII digits starting at `p`.
fn digits_at(text: &str, p: usize) -> &str {
    let rest = text.get(p..).unwrap_or("");
    let n = rest.bytes().take_while(u8::is_ascii_digit).count();
    &rest[..n]
}

impl<'a> Expander<'a> {
    /// Apply the single modifier at `p`.
    pub(crate) fn apply_modifier(
        &mut self,
        text: &str,
        p: &mut usize,
        ch: &mut ModChain,
    ) -> ModResult {
        match at(text, *p) {
            b'!' => self.mod_shell_command(text, p, ch),
            b':' => self.mod_assign(text, p, ch),
            b'?' => self.mod_if_else(text, p, ch),
            b'@' => self.mod_loop(text, p, ch),
            b'[' => self.mod_words(text, p, ch),
            b'_' => self.mod_remember(text, p, ch),
            b'C' => self.mod_regex(text, p, ch),
            b'D' | b'U' => self.mod_defined(text, p, ch),
            b'E' | b'H' | b'R' | b'T' => Ok(mod_word_func(text, p, ch)),
            b'g' => self.mod_time(text, p, ch, true),
            b'l' => self.mod_time(text, p, ch, false),
            b'h' => Ok(mod_hash(text, p, ch)),
            b'L' => Ok(mod_literal(p, ch)),
            b'M' | b'N' => Ok(self.mod_match(text, p, ch)),
            b'm' => self.mod_mtime(text, p, ch),
            b'O' => Ok(mod_order(text, p, ch)),
            b'P' => Ok(self.mod_path(p, ch)),
            b'Q' | b'q' => Ok(self.mod_quote(text, p, ch)),
            b'r' => self.mod_range(text, p, ch),
            b'S' => self.mod_subst(text, p, ch),
            b's' => Ok(self.mod_sun_shell(text, p, ch)),
            b't' => Ok(self.mod_to(text, p, ch)),
            b'u' => Ok(mod_unique(text, p, ch)),
            _ => Ok(Applied::Unknown),
        }
    }

    /// Read one delimited modifier argument, leaving `p` just past the
    /// delimiter. Returns the argument and, for [`Part::Pattern`], whether it
    /// was anchored at the end.
    fn parse_part(
        &mut self,
        text: &str,
        p: &mut usize,
        delim: u8,
        mode: EvalMode,
        name: &str,
        kind: Part<'_>,
    ) -> Result<(String, bool), ModFailed> {
        let mut buf = String::new();
        let mut anchor_end = false;
        loop {
            let c = at(text, *p);
            if c == 0 || c == delim {
                break;
            }

            if c == b'\\' {
                let n = at(text, *p + 1);
                let escapable = n == delim
                    || n == b'\\'
                    || n == b'$'
                    || (n == b'&' && matches!(kind, Part::Replacement(_)));
                if n != 0 && escapable {
                    buf.push(n as char);
                    *p += 2;
                    continue;
                }
            }

            if c != b'$' {
                match kind {
                    Part::Replacement(lhs) if c == b'&' => {
                        buf.push_str(lhs);
                        *p += 1;
                    }
                    _ => *p += push_char(&mut buf, text, *p),
                }
                continue;
            }

            if at(text, *p + 1) == delim {
                if matches!(kind, Part::Pattern) {
                    anchor_end = true;
                } else {
                    buf.push('$');
                }
                *p += 1;
                continue;
            }

            if mode.wants_result() {
                let (value, end) = self.parse_expr(text, *p, mode.nested());
                buf.push_str(value.as_str());
                *p = end;
                continue;
            }

            // Copy a nested expression unexpanded.
            let start = *p;
            let open = at(text, *p + 1);
            if open == b'(' || open == b'{' {
                let close = if open == b'(' { b')' } else { b'}' };
                let mut depth = 1;
                *p += 2;
                while at(text, *p) != 0 && depth > 0 {
                    if at(text, *p - 1) != b'\\' {
                        if at(text, *p) == open {
                            depth += 1;
                        } else if at(text, *p) == close {
                            depth -= 1;
                        }
                    }
                    *p += 1;
                }
                buf.push_str(&text[start..*p]);
            } else {
                buf.push('$');
                *p += 1;
            }
        }

        if at(text, *p) != delim {
            self.error(
                format!(
                    "Unfinished modifier for \"{name}\" ('{}' missing)",
                    delim as char
                ),
                text,
            );
            return Err(ModFailed);
        }
        if delim != 0 {
            *p += 1;
        }
        Ok((buf, anchor_end))
    }

    fn assign(&mut self, local: bool, name: &str, value: &str) {
        match self.target.as_deref_mut() {
            Some(target) if local => self.vars.set_in(target, name, value),
            _ => self.vars.set(ScopeKind::Global, name, value),
        }
    }

    fn assign_append(&mut self, local: bool, name: &str, value: &str) {
        match self.target.as_deref_mut() {
            Some(target) if local => self.vars.append_in(target, name, value),
            _ => self.vars.append(ScopeKind::Global, name, value),
        }
    }

    fn shell_output(&mut self, cmd: &str) -> String {
        let env = self.vars.child_env(None);
        let cap = capture(self.vars.shell(), cmd, &env);
        if let Some(err) = cap.error {
            self.vars.diag(err, cmd);
        }
        cap.output
    }

    // --- :D :U :L :P ---

    /// `:Dtext` and `:Utext`: replace the value if the variable is
    /// (respectively is not) defined.
    fn mod_defined(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        let is_defined_form = at(text, *p) == b'D';
        let taken = is_defined_form == (ch.defined == Defined::Regular);
        let mode = if ch.should_eval() && taken {
            ch.mode
        } else {
            EvalMode::Parse
        };

        let mut buf = String::new();
        let mut q = *p + 1;
        loop {
            let c = at(text, q);
            if c == 0 || c == b':' || c == ch.endc {
                break;
            }
            if c == b'\\' {
                let n = at(text, q + 1);
                if n != 0 && (n == b':' || n == b'$' || n == b'\\' || n == ch.endc) {
                    buf.push(n as char);
                    q += 2;
                    continue;
                }
            }
            if c == b'$' {
                let (value, end) = self.parse_expr(text, q, mode);
                buf.push_str(value.as_str());
                q = end;
                continue;
            }
            q += push_char(&mut buf, text, q);
        }
        *p = q;

        ch.define();
        if mode.wants_result() {
            ch.value = buf;
        }
        Ok(Applied::Ok)
    }

    fn mod_path(&mut self, p: &mut usize, ch: &mut ModChain) -> Applied {
        ch.define();
        if ch.should_eval() {
            ch.value = self
                .vars
                .target(&ch.name)
                .and_then(|t| t.path.clone())
                .unwrap_or_else(|| ch.name.clone());
        }
        *p += 1;
        Applied::Ok
    }

    // --- :M :N ---

    fn mod_match(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
        let negate = at(text, *p) == b'N';
        let start = *p + 1;
        let mut q = start;
        let mut nest: i32 = 0;
        let mut escaped = false;
        let mut needs_subst = false;
        loop {
            let c = at(text, q);
            if c == 0 || (c == b':' && nest == 0) {
                break;
            }
            if c == b'\\' {
                let n = at(text, q + 1);
                if n != 0 && (n == b':' || n == ch.endc || n == ch.startc) {
                    escaped = true;
                    q += 2;
                    continue;
                }
            }
            match c {
                b'$' => needs_subst = true,
                b'(' | b'{' => nest += 1,
                b')' | b'}' => {
                    nest -= 1;
                    if nest < 0 {
                        break;
                    }
                }
                _ => {}
            }
            q += 1;
        }
        *p = q;

        let raw = &text[start..q];
        let mut pattern = if escaped {
            let mut out = String::with_capacity(raw.len());
            let mut chars = raw.chars().peekable();
            while let Some(c) = chars.next() {
                let unescape = c == '\\'
                    && chars.peek().is_some_and(|&n| {
                        n == ':' || n == ch.endc as char || n == ch.startc as char
                    });
                if !unescape {
                    out.push(c);
                }
            }
            out
        } else {
            raw.to_string()
        };
        if needs_subst {
            pattern = self.subst(&pattern, ch.mode);
        }

        if ch.should_eval() {
            tracing::trace!(pattern = %pattern, negate, "matching words");
            let pat = WordPattern::new(&pattern);
            ch.value = modify_words(&ch.value, ch.one_big_word, ch.sep, |w, out| {
                if pat.matches(w) != negate {
                    out.push_str(w);
                }
            });
        }
        Applied::Ok
    }

    // --- :S :C ---

    fn mod_subst(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        let delim = at(text, *p + 1);
        if delim == 0 || !delim.is_ascii() {
            self.error("Missing delimiter for :S modifier", text);
            return Err(ModFailed);
        }
        *p += 2;

        let anchor_start = at(text, *p) == b'^';
        if anchor_start {
            *p += 1;
        }
        let (lhs, anchor_end) =
            self.parse_part(text, p, delim, ch.mode, &ch.name, Part::Pattern)?;
        let (rhs, _) =
            self.parse_part(text, p, delim, ch.mode, &ch.name, Part::Replacement(&lhs))?;

        let mut args = SubstArgs {
            lhs: &lhs,
            rhs: &rhs,
            anchor_start,
            anchor_end,
            global: false,
            once: false,
            matched: false,
        };
        let mut one_big_word = ch.one_big_word;
        loop {
            match at(text, *p) {
                b'g' => args.global = true,
                b'1' => args.once = true,
                b'W' => one_big_word = true,
                _ => break,
            }
            *p += 1;
        }

        if ch.should_eval() {
            ch.value = modify_words(&ch.value, one_big_word, ch.sep, |w, out| {
                subst_word(w, out, &mut args)
            });
        }
        Ok(Applied::Ok)
    }

    fn mod_regex(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        let delim = at(text, *p + 1);
        if delim == 0 || !delim.is_ascii() {
            self.error("Missing delimiter for :C modifier", text);
            return Err(ModFailed);
        }
        *p += 2;

        let (pattern, _) = self.parse_part(text, p, delim, ch.mode, &ch.name, Part::Plain)?;
        let (replace, _) = self.parse_part(text, p, delim, ch.mode, &ch.name, Part::Plain)?;

        let mut global = false;
        let mut once = false;
        let mut one_big_word = ch.one_big_word;
        loop {
            match at(text, *p) {
                b'g' => global = true,
                b'1' => once = true,
                b'W' => one_big_word = true,
                _ => break,
            }
            *p += 1;
        }

        if !ch.should_eval() {
            return Ok(Applied::Ok);
        }
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                self.error(format!("Regex compilation error: {e}"), text);
                return Err(ModFailed);
            }
        };

        let mut matched = false;
        let mut problems = Vec::new();
        let value = modify_words(&ch.value, one_big_word, ch.sep, |w, out| {
            if once && matched {
                out.push_str(w);
                return;
            }
            regex_word(w, out, &re, &replace, global, &mut matched, &mut problems);
        });
        for problem in problems {
            self.vars.diag(problem, text);
        }
        ch.value = value;
        Ok(Applied::Ok)
    }

    // --- :@ :? :_ ---

    /// `:@var@text@`: expand `text` once per word with `var` set to it.
    fn mod_loop(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        *p += 1;
        let (var, _) = self.parse_part(text, p, b'@', EvalMode::Parse, &ch.name, Part::Plain)?;
        if var.contains('$') {
            self.error(
                format!(
                    "In the :@ modifier of \"{}\", the variable name \"{var}\" must not contain a dollar.",
                    ch.name
                ),
                text,
            );
            return Err(ModFailed);
        }
        let (body, _) =
            self.parse_part(text, p, b'@', EvalMode::Parse, &ch.name, Part::Plain)?;

        if !ch.should_eval() {
            return Ok(Applied::Ok);
        }
        let mode = ch.mode.for_loop_body();
        ch.value = modify_words(&ch.value, ch.one_big_word, Some(' '), |w, out| {
            if w.is_empty() {
                return;
            }
            self.set_here(&var, w);
            let s = self.subst(&body, mode);
            if s.starts_with('\n') || out.ends_with_newline() {
                out.cancel_sep();
            }
            out.push_str(&s);
        });
        self.delete_here(&var);
        Ok(Applied::Ok)
    }

    /// `:?then:else`: the variable name is a condition.
    fn mod_if_else(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        let mut outcome = None;
        let mut then_mode = EvalMode::Parse;
        let mut else_mode = EvalMode::Parse;
        if ch.should_eval() {
            let result = cond::evaluate(self, &ch.name);
            if let Ok(taken) = result {
                if taken {
                    then_mode = ch.mode;
                } else {
                    else_mode = ch.mode;
                }
            }
            outcome = Some(result);
        }

        *p += 1;
        let (then_part, _) = self.parse_part(text, p, b':', then_mode, &ch.name, Part::Plain)?;
        let (else_part, _) =
            self.parse_part(text, p, ch.endc, else_mode, &ch.name, Part::Plain)?;
        if ch.endc != 0 {
            *p -= 1;
        }

        match outcome {
            None => Ok(Applied::Ok),
            Some(Err(e)) => {
                self.error(
                    format!(
                        "Bad conditional expression '{}' in {}?{then_part}:{else_part}: {e}",
                        ch.name, ch.name
                    ),
                    text,
                );
                Err(ModFailed)
            }
            Some(Ok(taken)) => {
                ch.value = if taken { then_part } else { else_part };
                ch.define();
                Ok(Applied::Ok)
            }
        }
    }

    /// `:_` and `:_=name`: save the current value in a variable.
    fn mod_remember(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        if !named_eq(text, *p, "_", ch) {
            return Ok(Applied::Unknown);
        }
        let name = if at(text, *p + 1) == b'=' {
            let start = *p + 2;
            let rest = text.get(start..).unwrap_or("");
            let len = rest.find([':', ')', '}']).unwrap_or(rest.len());
            *p = start + len;
            rest[..len].to_string()
        } else {
            *p += 1;
            "_".to_string()
        };
        if ch.should_eval() {
            self.vars.set(ScopeKind::Global, &name, &ch.value);
        }
        Ok(Applied::Ok)
    }

    // --- ::= and friends ---

    /// `::=`, `::?=`, `::+=` and `::!=` assign to the variable and expand
    /// to nothing.
    fn mod_assign(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        let op = at(text, *p + 1);
        let op_len = match op {
            b'=' => 2,
            b'!' | b'+' | b'?' if at(text, *p + 2) == b'=' => 3,
            _ => return Ok(Applied::Unknown),
        };
        if ch.name.is_empty() {
            *p += 1;
            return Ok(Applied::Bad);
        }

        // Assign where the variable lives; a target's expression for a
        // name it does not have assigns globally.
        let local = match self.target.as_deref() {
            Some(target) => ch.defined != Defined::Regular || target.contains(&ch.name),
            None => false,
        };

        *p += op_len;
        let delim = if ch.startc == b'(' { b')' } else { b'}' };
        let (value, _) = self.parse_part(text, p, delim, ch.mode, &ch.name, Part::Plain)?;
        *p -= 1;

        if ch.should_eval() {
            let name = ch.name.clone();
            tracing::debug!(name = %name, value = %value, op = %(op as char), "assigning from modifier");
            match op {
                b'+' => self.assign_append(local, &name, &value),
                b'!' => {
                    let env = self.vars.child_env(None);
                    let cap = capture(self.vars.shell(), &value, &env);
                    match cap.error {
                        Some(err) => self.vars.diag(err, value.clone()),
                        None => self.assign(local, &name, &cap.output),
                    }
                }
                b'?' if ch.defined == Defined::Regular => {}
                _ => self.assign(local, &name, &value),
            }
        }
        ch.value.clear();
        Ok(Applied::Ok)
    }

    // --- shell ---

    /// `:!cmd!`: the output of a command.
    fn mod_shell_command(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        *p += 1;
        let (cmd, _) = self.parse_part(text, p, b'!', ch.mode, &ch.name, Part::Plain)?;
        ch.value = if ch.should_eval() {
            self.shell_output(&cmd)
        } else {
            String::new()
        };
        ch.define();
        Ok(Applied::Ok)
    }

    /// `:sh`: run the value as a command.
    fn mod_sun_shell(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
        if !(at(text, *p + 1) == b'h' && ch.is_delim(at(text, *p + 2))) {
            return Applied::Unknown;
        }
        *p += 2;
        if ch.should_eval() {
            let cmd = std::mem::take(&mut ch.value);
            ch.value = self.shell_output(&cmd);
        }
        Applied::Ok
    }

    // --- :[...] ---

    fn mod_words(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        *p += 1;
        let (arg, _) = self.parse_part(text, p, b']', ch.mode, &ch.name, Part::Plain)?;
        if !ch.is_delim(at(text, *p)) {
            return Ok(Applied::Bad);
        }

        match arg.as_str() {
            "" => return Ok(Applied::Bad),
            "#" => {
                if ch.should_eval() {
                    ch.value = if ch.one_big_word {
                        "1".to_string()
                    } else {
                        split(&ch.value).len().to_string()
                    };
                }
                return Ok(Applied::Ok);
            }
            "*" => {
                ch.one_big_word = true;
                return Ok(Applied::Ok);
            }
            "@" => {
                ch.one_big_word = false;
                return Ok(Applied::Ok);
            }
            _ => {}
        }

        let Some((first, rest)) = parse_c_int(&arg) else {
            return Ok(Applied::Bad);
        };
        let last = if rest.is_empty() {
            first
        } else {
            match rest.strip_prefix("..").and_then(parse_c_int) {
                Some((last, "")) => last,
                _ => return Ok(Applied::Bad),
            }
        };

        if first == 0 && last == 0 {
            ch.one_big_word = true;
            return Ok(Applied::Ok);
        }
        if first == 0 || last == 0 {
            return Ok(Applied::Bad);
        }
        if ch.should_eval() {
            ch.value = select_words(&ch.value, first, last, ch.sep, ch.one_big_word);
        }
        Ok(Applied::Ok)
    }

    // --- :t ---

    fn mod_to(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
        let c1 = at(text, *p + 1);
        if c1 == b':' || c1 == ch.endc {
            *p += 1;
            return Applied::Bad;
        }
        if c1 == b's' {
            return self.mod_to_sep(text, p, ch);
        }
        if !ch.is_delim(at(text, *p + 2)) {
            *p += 1;
            return Applied::Bad;
        }

        match c1 {
            b'A' => {
                if ch.should_eval() {
                    let words = split(&ch.value);
                    let mut out = SepBuf::new(ch.sep);
                    for w in &words {
                        let resolved = self.realpath(w);
                        out.push_str(&resolved);
                        out.mark_sep();
                    }
                    ch.value = out.finish();
                }
            }
            b'u' => ch.value = ch.value.to_ascii_uppercase(),
            b'l' => ch.value = ch.value.to_ascii_lowercase(),
            b'W' => ch.one_big_word = true,
            b'w' => ch.one_big_word = false,
            _ => {
                *p += 1;
                return Applied::Bad;
            }
        }
        *p += 2;
        Applied::Ok
    }

    /// `:ts<c>` re-joins the words with a new separator.
    fn mod_to_sep(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
        let s = *p + 2;
        let c0 = at(text, s);

        let parsed = if c0 != 0 && c0 != ch.endc && text[s..].chars().next().is_some_and(|c| {
            let after = at(text, s + c.len_utf8());
            after == b':' || after == ch.endc
        }) {
            // A single literal character, which may itself be `:`.
            text[s..].chars().next().map(|c| (Some(c), s + c.len_utf8()))
        } else if c0 == ch.endc || c0 == b':' {
            Some((None, s))
        } else if c0 != b'\\' {
            None
        } else {
            match at(text, s + 1) {
                b'n' => Some((Some('\n'), s + 2)),
                b't' => Some((Some('\t'), s + 2)),
                _ => {
                    let (radix, q) = if at(text, s + 1) == b'x' {
                        (16, s + 2)
                    } else {
                        (8, s + 1)
                    };
                    let rest = text.get(q..).unwrap_or("");
                    let n = rest.bytes().take_while(|b| b.is_ascii_hexdigit()).count();
                    let code = u32::from_str_radix(&rest[..n], radix)
                        .ok()
                        .filter(|&v| v <= 255)
                        .and_then(char::from_u32);
                    let end = q + n;
                    match code {
                        Some(c) if at(text, end) == b':' || at(text, end) == ch.endc => {
                            Some((Some(c), end))
                        }
                        _ => None,
                    }
                }
            }
        };

        let Some((sep, end)) = parsed else {
            *p += 1;
            return Applied::Bad;
        };
        ch.sep = sep;
        *p = end;
        if ch.should_eval() {
            ch.value = modify_words(&ch.value, ch.one_big_word, ch.sep, |w, out| out.push_str(w));
        }
        Applied::Ok
    }

    fn realpath(&mut self, word: &str) -> String {
        if let Some(cached) = self.vars.realpaths.get(word) {
            return cached.clone();
        }
        match std::fs::canonicalize(word) {
            Ok(path) => {
                let resolved = path.to_string_lossy().into_owned();
                self.vars
                    .realpaths
                    .insert(word.to_string(), resolved.clone());
                resolved
            }
            Err(_) => word.to_string(),
        }
    }

    // --- :Q :q ---

    fn mod_quote(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
        if !ch.is_delim(at(text, *p + 1)) {
            return Applied::Unknown;
        }
        let quote_dollar = at(text, *p) == b'q';
        *p += 1;
        if ch.should_eval() {
            ch.value = quote(&ch.value, quote_dollar, &self.vars.shell().newline);
        }
        Applied::Ok
    }

    // --- time ---

    fn mod_time(&mut self, text: &str, p: &mut usize, ch: &mut ModChain, utc: bool) -> ModResult {
        let name = if utc { "gmtime" } else { "localtime" };
        if !named_eq(text, *p, name, ch) {
            return Ok(Applied::Unknown);
        }
        let mut q = *p + name.len();
        let mut when = None;
        if at(text, q) == b'=' {
            let digits = digits_at(text, q + 1);
            let Ok(secs) = digits.parse::<i64>() else {
                self.error(format!("Invalid time value at \"{}\"", &text[q + 1..]), text);
                return Err(ModFailed);
            };
            when = Some(secs).filter(|&s| s != 0);
            q += 1 + digits.len();
        }
        *p = q;

        if ch.should_eval() {
            match format_time(&ch.value, when, utc) {
                Some(formatted) => ch.value = formatted,
                None => {
                    self.error(format!("Invalid time format \"{}\"", ch.value), text);
                    return Err(ModFailed);
                }
            }
        }
        Ok(Applied::Ok)
    }

    fn mod_mtime(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        if !named_eq(text, *p, "mtime", ch) {
            return Ok(Applied::Unknown);
        }
        let mut q = *p + "mtime".len();
        let mut fallback = None;
        let mut strict = false;
        if at(text, q) == b'=' {
            let digits = digits_at(text, q + 1);
            if let Ok(secs) = digits.parse::<i64>() {
                fallback = Some(secs);
                q += 1 + digits.len();
            } else if text[q + 1..].starts_with("error") {
                strict = true;
                q += 1 + "error".len();
            } else {
                self.error(
                    format!("Invalid argument \"{}\" for modifier \":mtime\"", &text[q + 1..]),
                    text,
                );
                return Err(ModFailed);
            }
            if !ch.is_delim(at(text, q)) {
                self.error(
                    format!("Invalid argument \"{}\" for modifier \":mtime\"", &text[*p + 6..]),
                    text,
                );
                return Err(ModFailed);
            }
        }
        *p = q;

        if !ch.should_eval() {
            return Ok(Applied::Ok);
        }
        let now = Utc::now().timestamp();
        let mut missing = None;
        ch.value = modify_words(&ch.value, ch.one_big_word, ch.sep, |w, out| {
            if w.is_empty() {
                return;
            }
            let secs = match std::fs::metadata(w) {
                Ok(meta) => meta.mtime(),
                Err(e) => {
                    if strict && missing.is_none() {
                        missing = Some(format!("Cannot determine mtime for \"{w}\": {e}"));
                    }
                    fallback.unwrap_or(now)
                }
            };
            out.push_str(&secs.to_string());
        });
        if let Some(message) = missing {
            self.error(message, text);
            return Err(ModFailed);
        }
        Ok(Applied::Ok)
    }

    fn mod_range(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        if !named_eq(text, *p, "range", ch) {
            return Ok(Applied::Unknown);
        }
        let mut q = *p + "range".len();
        let mut n = 0usize;
        if at(text, q) == b'=' {
            let digits = digits_at(text, q + 1);
            let Ok(count) = digits.parse::<usize>() else {
                self.error(
                    format!("Invalid number \"{}\" for ':range' modifier", &text[q + 1..]),
                    text,
                );
                return Err(ModFailed);
            };
            n = count;
            q += 1 + digits.len();
        }
        if !ch.is_delim(at(text, q)) {
            *p += 1;
            return Ok(Applied::Bad);
        }
        *p = q;

        if ch.should_eval() {
            if n == 0 {
                n = split(&ch.value).len();
            }
            ch.value = (1..=n).map(|i| i.to_string()).collect::<Vec<_>>().join(" ");
        }
        Ok(Applied::Ok)
    }

    // --- SysV ---

    /// `:from=to`, where either side may contain one `%`.
    pub(crate) fn apply_sysv(&mut self, text: &str, p: &mut usize, ch: &mut ModChain) -> ModResult {
        if !is_sysv_modifier(text, *p) {
            return Ok(Applied::Unknown);
        }
        let (lhs, _) = self.parse_part(text, p, b'=', ch.mode, &ch.name, Part::Plain)?;
        let (rhs, _) = self.parse_part(text, p, ch.endc, ch.mode, &ch.name, Part::Plain)?;
        if ch.endc != 0 {
            *p -= 1;
        }

        if lhs.is_empty() && ch.value.is_empty() {
            return Ok(Applied::Ok);
        }
        if !ch.should_eval() {
            return Ok(Applied::Ok);
        }
        ch.value = modify_words(&ch.value, ch.one_big_word, ch.sep, |w, out| {
            match sysv_match(w, &lhs) {
                None => out.push_str(w),
                Some((stem, percent)) => {
                    let rhs = if rhs.contains('$') {
                        self.subst(&rhs, EvalMode::Eval)
                    } else {
                        rhs.clone()
                    };
                    sysv_replace(stem, percent, &rhs, out);
                }
            }
        });
        Ok(Applied::Ok)
    }
}

// ---------------------------------------------------------------------------
// Modifiers that need no expansion
// ---------------------------------------------------------------------------

fn mod_literal(p: &mut usize, ch: &mut ModChain) -> Applied {
    ch.define();
    if ch.should_eval() {
        ch.value = ch.name.clone();
    }
    *p += 1;
    Applied::Ok
}

fn mod_word_func(text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
    let c = at(text, *p);
    if !ch.is_delim(at(text, *p + 1)) {
        return Applied::Unknown;
    }
    *p += 1;
    if ch.should_eval() {
        let f: fn(&str) -> &str = match c {
            b'E' => suffix,
            b'H' => head,
            b'R' => root,
            _ => tail,
        };
        ch.value = modify_words(&ch.value, ch.one_big_word, ch.sep, |w, out| out.push_str(f(w)));
    }
    Applied::Ok
}

fn mod_hash(text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
    if !named(text, *p, "hash", ch) {
        return Applied::Unknown;
    }
    *p += "hash".len();
    if ch.should_eval() {
        ch.value = hash(&ch.value);
    }
    Applied::Ok
}

fn mod_unique(text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
    if !ch.is_delim(at(text, *p + 1)) {
        return Applied::Unknown;
    }
    *p += 1;
    if ch.should_eval() {
        ch.value = uniq(&ch.value);
    }
    Applied::Ok
}

/// `:O`, `:Or`, `:On`, `:Onr` and `:Ox`.
fn mod_order(text: &str, p: &mut usize, ch: &mut ModChain) -> Applied {
    #[derive(Clone, Copy)]
    enum Order {
        Ascending,
        Descending,
        Numeric,
        NumericDescending,
        Shuffle,
    }

    let c1 = at(text, *p + 1);
    let c2 = at(text, *p + 2);
    let (order, len) = if ch.is_delim(c1) {
        (Order::Ascending, 1)
    } else if c1 == b'r' && ch.is_delim(c2) {
        (Order::Descending, 2)
    } else if c1 == b'x' && ch.is_delim(c2) {
        (Order::Shuffle, 2)
    } else if c1 == b'n' && ch.is_delim(c2) {
        (Order::Numeric, 2)
    } else if ((c1 == b'n' && c2 == b'r') || (c1 == b'r' && c2 == b'n'))
        && ch.is_delim(at(text, *p + 3))
    {
        (Order::NumericDescending, 3)
    } else {
        *p += 1;
        return Applied::Bad;
    };
    *p += len;

    if ch.should_eval() {
        let mut words = split(&ch.value);
        match order {
            Order::Ascending => words.sort(),
            Order::Descending => words.sort_by(|a, b| b.cmp(a)),
            Order::Numeric => words.sort_by_key(|w| numeric_key(w)),
            Order::NumericDescending => {
                words.sort_by_key(|w| std::cmp::Reverse(numeric_key(w)))
            }
            Order::Shuffle => words.shuffle(&mut rand::thread_rng()),
        }
        ch.value = words.join(" ");
    }
    Applied::Ok
}

/// Whether the text at `start` has an `=` at the top level of the
/// modifier, which makes it a SysV substitution. Nested expressions such as
/// `${VAR:${A}=${B}}` are skipped over.
fn is_sysv_modifier(text: &str, start: usize) -> bool {
    let mut depth = 1;
    let mut q = start;
    let mut eq = false;
    loop {
        let c = at(text, q);
        if c == 0 {
            break;
        }
        match c {
            b'\\' if at(text, q + 1) != 0 => q += 1,
            b'=' if depth == 1 => eq = true,
            b'(' | b'{' => depth += 1,
            b')' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
        q += 1;
    }
    eq
}

fn subst_word(word: &str, out: &mut SepBuf, a: &mut SubstArgs<'_>) {
    if a.once && a.matched {
        out.push_str(word);
        return;
    }

    if a.anchor_start {
        let Some(rest) = word.strip_prefix(a.lhs) else {
            out.push_str(word);
            return;
        };
        if a.anchor_end && !rest.is_empty() {
            out.push_str(word);
            return;
        }
        out.push_str(a.rhs);
        out.push_str(rest);
        a.matched = true;
        return;
    }

    if a.anchor_end {
        let Some(prefix) = word.strip_suffix(a.lhs) else {
            out.push_str(word);
            return;
        };
        out.push_str(prefix);
        out.push_str(a.rhs);
        a.matched = true;
        return;
    }

    if a.lhs.is_empty() {
        out.push_str(word);
        return;
    }

    let mut rest = word;
    while let Some(i) = rest.find(a.lhs) {
        out.push_str(&rest[..i]);
        out.push_str(a.rhs);
        a.matched = true;
        rest = &rest[i + a.lhs.len()..];
        if rest.is_empty() || !a.global {
            break;
        }
    }
    out.push_str(rest);
}

/// One word of `:C`. Problems with back-references are collected rather
/// than aborting the word.
fn regex_word(
    word: &str,
    out: &mut SepBuf,
    re: &Regex,
    replace: &str,
    global: bool,
    matched: &mut bool,
    problems: &mut Vec<String>,
) {
    let mut pos = 0;
    loop {
        let Some(caps) = re.captures_at(word, pos) else {
            out.push_str(&word[pos..]);
            return;
        };
        let Some(whole) = caps.get(0) else {
            out.push_str(&word[pos..]);
            return;
        };
        *matched = true;
        out.push_str(&word[pos..whole.start()]);

        let mut expanded = String::new();
        let mut chars = replace.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if matches!(chars.peek(), Some('&' | '\\')) => {
                    if let Some(next) = chars.next() {
                        expanded.push(next);
                    }
                }
                '\\' if chars.peek().is_some_and(char::is_ascii_digit) => {
                    let n = chars
                        .next()
                        .and_then(|d| d.to_digit(10))
                        .unwrap_or(0) as usize;
                    if n >= caps.len() {
                        problems.push(format!("No subexpression \\{n}"));
                    } else {
                        match caps.get(n) {
                            Some(m) => expanded.push_str(m.as_str()),
                            None => problems.push(format!("No match for subexpression \\{n}")),
                        }
                    }
                }
                '&' => expanded.push_str(whole.as_str()),
                other => expanded.push(other),
            }
        }
        out.push_str(&expanded);

        let empty_at_start = whole.start() == pos && whole.end() == pos;
        pos = whole.end();
        if global {
            if empty_at_start {
                match word[pos..].chars().next() {
                    Some(c) => {
                        let mut one = [0u8; 4];
                        out.push_str(c.encode_utf8(&mut one));
                        pos += c.len_utf8();
                    }
                    None => return,
                }
            }
            if pos < word.len() {
                continue;
            }
            return;
        }
        out.push_str(&word[pos..]);
        return;
    }
}

/// strftime-style formatting; `None` for a malformed format.
fn format_time(fmt: &str, when: Option<i64>, utc: bool) -> Option<String> {
    let fmt = if fmt.is_empty() { "%c" } else { fmt };
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return None;
    }
    let instant = match when {
        Some(secs) => DateTime::<Utc>::from_timestamp(secs, 0)?,
        None => Utc::now(),
    };
    Some(if utc {
        instant.format_with_items(items.iter()).to_string()
    } else {
        instant
            .with_timezone(&Local)
            .format_with_items(items.iter())
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Vars;

    fn expand(vars: &mut Vars, text: &str) -> String {
        vars.subst(text, EvalMode::Eval)
    }

    fn with(pairs: &[(&str, &str)]) -> Vars {
        let mut vars = Vars::new();
        for (k, v) in pairs {
            vars.set(ScopeKind::Global, k, v);
        }
        vars
    }

    // --- word functions ---

    #[test]
    fn head_tail_suffix_root() {
        let mut vars = with(&[("F", "src/a.c lib/b.h c")]);
        assert_eq!(expand(&mut vars, "${F:H}"), "src lib .");
        assert_eq!(expand(&mut vars, "${F:T}"), "a.c b.h c");
        assert_eq!(expand(&mut vars, "${F:E}"), "c h");
        assert_eq!(expand(&mut vars, "${F:R}"), "src/a lib/b c");
    }

    #[test]
    fn match_and_exclude() {
        let mut vars = with(&[("SRCS", "a.c b.h c.c d.y")]);
        assert_eq!(expand(&mut vars, "${SRCS:M*.c}"), "a.c c.c");
        assert_eq!(expand(&mut vars, "${SRCS:N*.c}"), "b.h d.y");
        assert_eq!(expand(&mut vars, "${SRCS:M*.[hy]}"), "b.h d.y");
    }

    #[test]
    fn match_pattern_with_escaped_colon() {
        let mut vars = with(&[("L", "a:b c")]);
        assert_eq!(expand(&mut vars, "${L:Ma\\:*}"), "a:b");
    }

    #[test]
    fn match_pattern_from_variable() {
        let mut vars = with(&[("L", "x.o y.c"), ("PAT", "*.o")]);
        assert_eq!(expand(&mut vars, "${L:M${PAT}}"), "x.o");
    }

    // --- :S and :C ---

    #[test]
    fn subst_first_or_all() {
        let mut vars = with(&[("V", "aaa baa")]);
        assert_eq!(expand(&mut vars, "${V:S/a/x/}"), "xaa bxa");
        assert_eq!(expand(&mut vars, "${V:S/a/x/g}"), "xxx bxx");
        assert_eq!(expand(&mut vars, "${V:S/a/x/1}"), "xaa baa");
    }

    #[test]
    fn subst_anchors_and_ampersand() {
        let mut vars = with(&[("V", "foo.c bar.c foo")]);
        assert_eq!(expand(&mut vars, "${V:S/^foo/&&/}"), "foofoo.c bar.c foofoo");
        assert_eq!(expand(&mut vars, "${V:S/.c$/.o/}"), "foo.o bar.o foo");
        assert_eq!(expand(&mut vars, "${V:S/^foo$/x/}"), "foo.c bar.c x");
        assert_eq!(expand(&mut vars, "${V:S,foo,a\\&b,}"), "a&b.c bar.c a&b");
    }

    #[test]
    fn subst_empty_pattern_changes_nothing() {
        let mut vars = with(&[("V", "abc")]);
        assert_eq!(expand(&mut vars, "${V:S///}"), "abc");
    }

    #[test]
    fn regex_with_groups() {
        let mut vars = with(&[("V", "lib-1.2 tool-3.4")]);
        assert_eq!(expand(&mut vars, "${V:C/([a-z]+)-(.*)/\\2:\\1/}"), "1.2:lib 3.4:tool");
        assert_eq!(expand(&mut vars, "${V:C/[0-9]/N/g}"), "lib-N.N tool-N.N");
        assert_eq!(expand(&mut vars, "${V:C/[0-9]/N/1}"), "lib-N.2 tool-3.4");
    }

    #[test]
    fn regex_bad_pattern_is_an_error() {
        let mut vars = with(&[("V", "x")]);
        assert_eq!(expand(&mut vars, "${V:C/(/x/}"), "");
        assert!(vars.diagnostics()[0].message.starts_with("Regex compilation error"));
    }

    #[test]
    fn regex_missing_group() {
        let mut vars = with(&[("V", "ab")]);
        assert_eq!(expand(&mut vars, "${V:C/a/\\1/}"), "b");
        assert_eq!(vars.diagnostics()[0].message, "No subexpression \\1");
    }

    #[test]
    fn unfinished_subst() {
        let mut vars = with(&[("V", "x")]);
        assert_eq!(expand(&mut vars, "${V:S/x/y}"), "");
        assert_eq!(
            vars.diagnostics()[0].message,
            "Unfinished modifier for \"V\" ('/' missing)"
        );
    }

    // --- SysV ---

    #[test]
    fn sysv_suffix_and_percent() {
        let mut vars = with(&[("SRCS", "a.c b.c d.h")]);
        assert_eq!(expand(&mut vars, "${SRCS:.c=.o}"), "a.o b.o d.h");
        assert_eq!(expand(&mut vars, "${SRCS:%.c=obj/%.o}"), "obj/a.o obj/b.o d.h");
    }

    #[test]
    fn sysv_with_nested_expressions() {
        let mut vars = with(&[("SRCS", "a.c b.c"), ("FROM", ".c"), ("TO", ".o")]);
        assert_eq!(expand(&mut vars, "${SRCS:${FROM}=${TO}}"), "a.o b.o");
    }

    #[test]
    fn sysv_equals_inside_nested_expression_is_not_top_level() {
        let mut vars = with(&[("V", "x")]);
        expand(&mut vars, "${V:${A:S/a=b/c/}}");
        assert!(vars.diagnostics().is_empty());
    }

    // --- ordering and words ---

    #[test]
    fn sort_then_unique() {
        let mut vars = with(&[("V", "b a a b")]);
        assert_eq!(expand(&mut vars, "${V:O:u}"), "a b");
    }

    #[test]
    fn order_of_modifiers_matters() {
        let mut vars = with(&[("V", "b a a b")]);
        assert_eq!(expand(&mut vars, "${V:u:O}"), "a b b");
    }

    #[test]
    fn numeric_and_reverse_order() {
        let mut vars = with(&[("V", "10 9 1k 2")]);
        assert_eq!(expand(&mut vars, "${V:On}"), "2 9 10 1k");
        assert_eq!(expand(&mut vars, "${V:Onr}"), "1k 10 9 2");
        assert_eq!(expand(&mut vars, "${V:Or}"), "9 2 1k 10");
    }

    #[test]
    fn shuffle_keeps_the_words() {
        let mut vars = with(&[("V", "a b c d e")]);
        let shuffled = expand(&mut vars, "${V:Ox}");
        let mut words: Vec<&str> = shuffled.split(' ').collect();
        words.sort();
        assert_eq!(words, ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn word_selection() {
        let mut vars = with(&[("V", "a b c d")]);
        assert_eq!(expand(&mut vars, "${V:[2]}"), "b");
        assert_eq!(expand(&mut vars, "${V:[-1]}"), "d");
        assert_eq!(expand(&mut vars, "${V:[2..3]}"), "b c");
        assert_eq!(expand(&mut vars, "${V:[3..2]}"), "c b");
        assert_eq!(expand(&mut vars, "${V:[#]}"), "4");
        assert_eq!(expand(&mut vars, "${V:[*]:[#]}"), "1");
    }

    #[test]
    fn word_selection_rejects_junk() {
        let mut vars = with(&[("V", "a b")]);
        assert_eq!(expand(&mut vars, "${V:[x]}"), "");
        assert!(vars.diagnostics()[0].message.starts_with("Bad modifier"));
    }

    #[test]
    fn separators() {
        let mut vars = with(&[("V", "a b c")]);
        assert_eq!(expand(&mut vars, "${V:ts,}"), "a,b,c");
        assert_eq!(expand(&mut vars, "${V:ts}"), "abc");
        assert_eq!(expand(&mut vars, "${V:ts\\n}"), "a\nb\nc");
        assert_eq!(expand(&mut vars, "${V:ts\\x2d}"), "a-b-c");
        assert_eq!(expand(&mut vars, "${V:ts\\072}"), "a:b:c");
        assert_eq!(expand(&mut vars, "${V:ts:}"), "a:b:c");
    }

    #[test]
    fn separator_applies_to_later_modifiers() {
        let mut vars = with(&[("V", "a.c b.c")]);
        assert_eq!(expand(&mut vars, "${V:ts,:S/.c/.o/}"), "a.o,b.o");
    }

    #[test]
    fn case_conversion() {
        let mut vars = with(&[("V", "MiXed")]);
        assert_eq!(expand(&mut vars, "${V:tu}"), "MIXED");
        assert_eq!(expand(&mut vars, "${V:tl}"), "mixed");
    }

    #[test]
    fn range() {
        let mut vars = with(&[("V", "a b c")]);
        assert_eq!(expand(&mut vars, "${V:range}"), "1 2 3");
        assert_eq!(expand(&mut vars, "${V:range=5}"), "1 2 3 4 5");
    }

    #[test]
    fn hash_and_quote() {
        let mut vars = with(&[("V", "a b"), ("E", "")]);
        assert_eq!(expand(&mut vars, "${E:hash}"), "b2af338b");
        assert_eq!(expand(&mut vars, "${V:Q}"), "a\\ b");
    }

    // --- defined, literal, path ---

    #[test]
    fn defined_and_undefined_defaults() {
        let mut vars = with(&[("SET", "v")]);
        assert_eq!(expand(&mut vars, "${SET:Dyes}"), "yes");
        assert_eq!(expand(&mut vars, "${UNSET:Dyes}"), "");
        assert_eq!(expand(&mut vars, "${UNSET:Udefault}"), "default");
        assert_eq!(expand(&mut vars, "${SET:Udefault}"), "v");
        assert_eq!(expand(&mut vars, "${UNSET:U${SET}}"), "v");
    }

    #[test]
    fn undefined_default_is_not_an_error_in_strict_mode() {
        let mut vars = Vars::new();
        assert_eq!(vars.subst("${NOPE:Ufallback}", EvalMode::EvalDefined), "fallback");
        assert!(vars.diagnostics().is_empty());
        vars.subst("${NOPE:tu}", EvalMode::EvalDefined);
        assert_eq!(vars.diagnostics().len(), 1);
    }

    #[test]
    fn literal_uses_the_name() {
        let mut vars = Vars::new();
        assert_eq!(expand(&mut vars, "${hello world:L:tu}"), "HELLO WORLD");
        assert_eq!(expand(&mut vars, "${:Ua b:[#]}"), "2");
    }

    #[test]
    fn path_of_known_and_unknown_targets() {
        let mut vars = Vars::new();
        vars.register_target(
            "prog",
            crate::store::TargetInfo {
                path: Some("obj/prog".into()),
                has_commands: true,
            },
        );
        assert_eq!(expand(&mut vars, "${prog:P} ${other:P}"), "obj/prog other");
    }

    // --- loops, conditions, assignment ---

    #[test]
    fn loop_over_words() {
        let mut vars = with(&[("V", "a b c")]);
        assert_eq!(expand(&mut vars, "${V:@w@<${w}>@}"), "<a> <b> <c>");
        assert!(vars.lookup("w", None).is_none());
    }

    #[test]
    fn loop_variable_must_not_contain_dollar() {
        let mut vars = with(&[("V", "a")]);
        assert_eq!(expand(&mut vars, "${V:@$x@y@}"), "");
        assert!(vars.diagnostics()[0].message.contains("must not contain a dollar"));
    }

    #[test]
    fn conditional_on_name() {
        let mut vars = with(&[("ON", "1")]);
        assert_eq!(expand(&mut vars, "${ON:?yes:no}"), "yes");
        assert_eq!(expand(&mut vars, "${OFF:?yes:no}"), "no");
        assert_eq!(expand(&mut vars, "${${ON} == 1:?eq:ne}"), "eq");
    }

    #[test]
    fn conditional_only_evaluates_the_taken_branch() {
        let mut vars = with(&[("ON", "1")]);
        expand(&mut vars, "${ON:?${A::=then}:${B::=else}}");
        assert_eq!(vars.lookup("A", None).as_deref(), Some("then"));
        assert!(vars.lookup("B", None).is_none());
    }

    #[test]
    fn assignment_modifiers() {
        let mut vars = Vars::new();
        assert_eq!(expand(&mut vars, "${X::=one}"), "");
        assert_eq!(vars.lookup("X", None).as_deref(), Some("one"));
        expand(&mut vars, "${X::+=two}");
        assert_eq!(vars.lookup("X", None).as_deref(), Some("one two"));
        expand(&mut vars, "${X::?=three}");
        assert_eq!(vars.lookup("X", None).as_deref(), Some("one two"));
        expand(&mut vars, "${Y::?=three}");
        assert_eq!(vars.lookup("Y", None).as_deref(), Some("three"));
    }

    #[test]
    fn assignment_from_command() {
        let mut vars = Vars::new();
        expand(&mut vars, "${OUT::!=echo captured}");
        assert_eq!(vars.lookup("OUT", None).as_deref(), Some("captured"));
    }

    #[test]
    fn remember_saves_intermediate_value() {
        let mut vars = with(&[("V", "a b")]);
        assert_eq!(expand(&mut vars, "${V:_=saved:tu}"), "A B");
        assert_eq!(vars.lookup("saved", None).as_deref(), Some("a b"));
    }

    #[test]
    fn shell_modifiers() {
        let mut vars = with(&[("CMD", "echo hi")]);
        assert_eq!(expand(&mut vars, "${CMD:sh}"), "hi");
        assert_eq!(expand(&mut vars, "${:!echo a; echo b!}"), "a b");
    }

    #[test]
    fn indirect_modifiers() {
        let mut vars = with(&[("V", "a.c b.c"), ("MODS", "S/.c/.o/:tu")]);
        assert_eq!(expand(&mut vars, "${V:${MODS}}"), "A.O B.O");
        assert_eq!(expand(&mut vars, "${V:${MODS}:ts,}"), "A.O,B.O");
    }

    // --- time ---

    #[test]
    fn gmtime_with_fixed_timestamp() {
        let mut vars = Vars::new();
        assert_eq!(expand(&mut vars, "${%Y-%m-%d:L:gmtime=86400}"), "1970-01-02");
    }

    #[test]
    fn mtime_of_missing_file_uses_fallback() {
        let mut vars = with(&[("F", "/nonexistent/file")]);
        assert_eq!(expand(&mut vars, "${F:mtime=42}"), "42");
        assert_eq!(expand(&mut vars, "${F:mtime=error}"), "");
        assert!(vars.diagnostics()[0].message.starts_with("Cannot determine mtime"));
    }

    #[test]
    fn mtime_of_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "x").unwrap();
        let expected = std::fs::metadata(&file).unwrap().mtime().to_string();
        let mut vars = with(&[("F", file.to_str().unwrap())]);
        assert_eq!(expand(&mut vars, "${F:mtime}"), expected);
    }

    #[test]
    fn realpath_resolves_existing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let real = std::fs::canonicalize(dir.path()).unwrap();
        let dotted = format!("{}/.", dir.path().display());
        let mut vars = with(&[("D", dotted.as_str()), ("M", "/no/such/path")]);
        assert_eq!(expand(&mut vars, "${D:tA}"), real.to_str().unwrap());
        assert_eq!(expand(&mut vars, "${M:tA}"), "/no/such/path");
    }
}
