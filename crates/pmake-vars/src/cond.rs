//! Conditional expressions, as used by the `:?` modifier.
//!
//! The text is parsed into a small tree first and evaluated afterwards, so
//! `&&` and `||` only evaluate (and expand) the operands they need.

use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, opt, preceded, separated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{any, take_while};
use winnow::{ModalResult, Parser};

use crate::expand::{EvalMode, Expander};
use crate::pattern::WordPattern;
use crate::words::split;

#[derive(Debug, Clone, PartialEq)]
enum Cond {
    Or(Vec<Cond>),
    And(Vec<Cond>),
    Not(Box<Cond>),
    Call(Func, String),
    Compare(Operand, CmpOp, Operand),
    /// An operand without a comparison.
    Bare(Operand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Defined,
    Make,
    Exists,
    Empty,
    Target,
    Commands,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Quoted(String),
    Word(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

fn cut(desc: &'static str) -> ErrMode<ContextError> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

fn or_expr(input: &mut &str) -> ModalResult<Cond> {
    let mut terms: Vec<Cond> = separated(1.., and_expr, (ws, "||")).parse_next(input)?;
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        Cond::Or(terms)
    })
}

fn and_expr(input: &mut &str) -> ModalResult<Cond> {
    let mut terms: Vec<Cond> = separated(1.., unary, (ws, "&&")).parse_next(input)?;
    Ok(if terms.len() == 1 {
        terms.remove(0)
    } else {
        Cond::And(terms)
    })
}

fn unary(input: &mut &str) -> ModalResult<Cond> {
    ws.parse_next(input)?;
    alt((
        preceded('!', unary).map(|c| Cond::Not(Box::new(c))),
        delimited('(', or_expr, (ws, cut_err(')'))),
        call,
        comparison,
    ))
    .parse_next(input)
}

fn call(input: &mut &str) -> ModalResult<Cond> {
    let name = take_while(1.., |c: char| c.is_ascii_lowercase()).parse_next(input)?;
    let func = match name {
        "defined" => Func::Defined,
        "make" => Func::Make,
        "exists" => Func::Exists,
        "empty" => Func::Empty,
        "target" => Func::Target,
        "commands" => Func::Commands,
        _ => return Err(ErrMode::Backtrack(ContextError::new())),
    };
    ws.parse_next(input)?;
    '('.parse_next(input)?;
    let arg = balanced_arg.parse_next(input)?;
    ')'.parse_next(input)?;
    Ok(Cond::Call(func, arg.trim().to_string()))
}

/// Everything up to the `)` that closes a function call.
fn balanced_arg<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let mut depth = 0usize;
    let mut end = None;
    for (i, c) in input.char_indices() {
        match c {
            '(' | '{' => depth += 1,
            ')' | '}' if depth > 0 => depth -= 1,
            ')' => {
                end = Some(i);
                break;
            }
            _ => {}
        }
    }
    let end = end.ok_or_else(|| cut("')' after function argument"))?;
    let (arg, rest) = input.split_at(end);
    *input = rest;
    Ok(arg)
}

fn comparison(input: &mut &str) -> ModalResult<Cond> {
    let lhs = operand.parse_next(input)?;
    let op = opt(preceded(ws, cmp_op)).parse_next(input)?;
    match op {
        None => Ok(Cond::Bare(lhs)),
        Some(op) => {
            ws.parse_next(input)?;
            let rhs = cut_err(operand).parse_next(input)?;
            Ok(Cond::Compare(lhs, op, rhs))
        }
    }
}

fn cmp_op(input: &mut &str) -> ModalResult<CmpOp> {
    alt((
        "==".value(CmpOp::Eq),
        "!=".value(CmpOp::Ne),
        "<=".value(CmpOp::Le),
        ">=".value(CmpOp::Ge),
        "<".value(CmpOp::Lt),
        ">".value(CmpOp::Gt),
    ))
    .parse_next(input)
}

fn operand(input: &mut &str) -> ModalResult<Operand> {
    alt((
        quoted.map(Operand::Quoted),
        bare_word.map(|w: &str| Operand::Word(w.to_string())),
    ))
    .parse_next(input)
}

fn quoted(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = any
            .parse_next(input)
            .map_err(|_: ErrMode<ContextError>| cut("closing '\"'"))?;
        match c {
            '"' => break,
            '\\' => {
                let escaped = any.parse_next(input)?;
                s.push(escaped);
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

/// A run of characters up to whitespace or an operator. Embedded
/// expressions such as `${A:M* }` are taken whole.
fn bare_word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'$' && matches!(bytes.get(i + 1), Some(b'{' | b'(')) {
            let mut depth = 0usize;
            i += 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'{' | b'(' => depth += 1,
                    b'}' | b')' => {
                        depth -= 1;
                        if depth == 0 {
                            i += 1;
                            break;
                        }
                    }
                    _ => {}
                }
                i += 1;
            }
            continue;
        }
        if c.is_ascii_whitespace() || b"!=<>()&|\"".contains(&c) {
            break;
        }
        i += 1;
    }
    if i == 0 {
        return Err(ErrMode::Backtrack(ContextError::new()));
    }
    let (word, rest) = input.split_at(i);
    *input = rest;
    Ok(word)
}

fn parse(text: &str) -> Result<Cond, String> {
    let mut remaining = text;
    let cond = or_expr
        .parse_next(&mut remaining)
        .map_err(|e| format!("{e}"))?;
    ws.parse_next(&mut remaining)
        .map_err(|e: ErrMode<ContextError>| format!("{e}"))?;
    if !remaining.is_empty() {
        return Err(format!("unexpected \"{remaining}\""));
    }
    Ok(cond)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate `text` as a condition.
pub(crate) fn evaluate(ex: &mut Expander<'_>, text: &str) -> Result<bool, String> {
    let cond = parse(text)?;
    eval(ex, &cond)
}

fn eval(ex: &mut Expander<'_>, cond: &Cond) -> Result<bool, String> {
    match cond {
        Cond::Or(terms) => {
            for t in terms {
                if eval(ex, t)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Cond::And(terms) => {
            for t in terms {
                if !eval(ex, t)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Cond::Not(inner) => Ok(!eval(ex, inner)?),
        Cond::Call(func, arg) => Ok(call_func(ex, *func, arg)),
        Cond::Bare(Operand::Word(w)) if !w.starts_with('$') && parse_number(w).is_none() => {
            let name = ex.subst(w, EvalMode::Eval);
            Ok(ex.is_defined(&name))
        }
        Cond::Bare(op) => {
            let value = operand_value(ex, op);
            Ok(match parse_number(&value) {
                Some(n) => n != 0.0,
                None => !value.trim().is_empty(),
            })
        }
        Cond::Compare(lhs, op, rhs) => {
            let l = operand_value(ex, lhs);
            let r = operand_value(ex, rhs);
            compare(&l, *op, &r)
        }
    }
}

fn call_func(ex: &mut Expander<'_>, func: Func, arg: &str) -> bool {
    if func == Func::Empty {
        let value = ex.subst(&format!("${{{arg}}}"), EvalMode::Eval);
        return value.trim().is_empty();
    }
    let arg = ex.subst(arg, EvalMode::Eval);
    match func {
        Func::Defined => ex.is_defined(&arg),
        Func::Make => {
            let goals = ex.find(".TARGETS").map(|v| v.value).unwrap_or_default();
            let pattern = WordPattern::new(&arg);
            split(&goals).iter().any(|g| pattern.matches(g))
        }
        Func::Exists => !arg.is_empty() && std::path::Path::new(&arg).exists(),
        Func::Target => ex.vars.target(&arg).is_some(),
        Func::Commands | Func::Empty => ex.vars.target(&arg).is_some_and(|t| t.has_commands),
    }
}

fn operand_value(ex: &mut Expander<'_>, op: &Operand) -> String {
    match op {
        Operand::Quoted(s) | Operand::Word(s) => ex.subst(s, EvalMode::Eval),
    }
}

/// Decimal, floating point or `0x` hexadecimal.
fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()? as f64
    } else {
        if !body.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return None;
        }
        body.parse::<f64>().ok()?
    };
    Some(if negative { -value } else { value })
}

fn compare(l: &str, op: CmpOp, r: &str) -> Result<bool, String> {
    if let (Some(a), Some(b)) = (parse_number(l), parse_number(r)) {
        return Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        });
    }
    match op {
        CmpOp::Eq => Ok(l == r),
        CmpOp::Ne => Ok(l != r),
        _ => Err(format!(
            "comparison with '{}' requires both operands '{l}' and '{r}' to be numeric",
            op.symbol()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ScopeKind;
    use crate::store::{TargetInfo, Vars};

    fn check(vars: &mut Vars, text: &str) -> Result<bool, String> {
        let mut ex = Expander::new(vars, None);
        evaluate(&mut ex, text)
    }

    fn vars() -> Vars {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "ONE", "1");
        vars.set(ScopeKind::Global, "NAME", "pmake");
        vars.set(ScopeKind::Global, "BLANK", "  ");
        vars.set(ScopeKind::Global, ".TARGETS", "all install");
        vars
    }

    // --- parsing ---

    #[test]
    fn parses_precedence() {
        let cond = parse("a || b && !c").unwrap();
        assert!(matches!(cond, Cond::Or(ref t) if t.len() == 2));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("a )").is_err());
        assert!(parse("").is_err());
        assert!(parse("a ==").is_err());
    }

    // --- functions ---

    #[test]
    fn defined_and_bare_words() {
        let mut v = vars();
        assert_eq!(check(&mut v, "defined(ONE)"), Ok(true));
        assert_eq!(check(&mut v, "ONE"), Ok(true));
        assert_eq!(check(&mut v, "!MISSING"), Ok(true));
        assert_eq!(check(&mut v, "ONE && MISSING"), Ok(false));
        assert_eq!(check(&mut v, "MISSING || (NAME && ONE)"), Ok(true));
    }

    #[test]
    fn empty_applies_modifiers() {
        let mut v = vars();
        assert_eq!(check(&mut v, "empty(BLANK)"), Ok(true));
        assert_eq!(check(&mut v, "empty(MISSING)"), Ok(true));
        assert_eq!(check(&mut v, "empty(NAME:Mp*)"), Ok(false));
        assert_eq!(check(&mut v, "empty(NAME:Mx*)"), Ok(true));
    }

    #[test]
    fn make_matches_goals() {
        let mut v = vars();
        assert_eq!(check(&mut v, "make(install)"), Ok(true));
        assert_eq!(check(&mut v, "make(inst*)"), Ok(true));
        assert_eq!(check(&mut v, "make(clean)"), Ok(false));
    }

    #[test]
    fn target_and_commands() {
        let mut v = vars();
        v.register_target(
            "lib",
            TargetInfo {
                path: None,
                has_commands: false,
            },
        );
        assert_eq!(check(&mut v, "target(lib)"), Ok(true));
        assert_eq!(check(&mut v, "commands(lib)"), Ok(false));
        assert_eq!(check(&mut v, "target(nope)"), Ok(false));
    }

    #[test]
    fn exists_checks_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = vars();
        let present = format!("exists({})", dir.path().display());
        assert_eq!(check(&mut v, &present), Ok(true));
        assert_eq!(check(&mut v, "exists(/no/such/file)"), Ok(false));
    }

    // --- comparisons ---

    #[test]
    fn numeric_comparisons() {
        let mut v = vars();
        assert_eq!(check(&mut v, "${ONE} == 1"), Ok(true));
        assert_eq!(check(&mut v, "${ONE} < 0x10"), Ok(true));
        assert_eq!(check(&mut v, "1.5 >= 2"), Ok(false));
    }

    #[test]
    fn string_comparisons() {
        let mut v = vars();
        assert_eq!(check(&mut v, "${NAME} == \"pmake\""), Ok(true));
        assert_eq!(check(&mut v, "\"${NAME}\" != pmake"), Ok(false));
        assert!(check(&mut v, "${NAME} < abc").is_err());
    }

    #[test]
    fn bare_expressions_use_truthiness() {
        let mut v = vars();
        assert_eq!(check(&mut v, "${ONE}"), Ok(true));
        assert_eq!(check(&mut v, "0"), Ok(false));
        assert_eq!(check(&mut v, "\"\""), Ok(false));
        assert_eq!(check(&mut v, "${NAME}"), Ok(true));
    }

    #[test]
    fn short_circuit_skips_side_effects() {
        let mut v = vars();
        assert_eq!(check(&mut v, "ONE || ${X::=set}"), Ok(true));
        assert!(v.lookup("X", None).is_none());
    }
}
