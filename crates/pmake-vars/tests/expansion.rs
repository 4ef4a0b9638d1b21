//! End-to-end tests for the variable store and expansion engine.
//!
//! Each test builds a store the way a makefile reader would, then checks
//! what a recipe line or a child process would see.

use pmake_vars::{EvalMode, ExportKind, Scope, ScopeKind, Vars};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn store(assignments: &[(&str, &str)]) -> Vars {
    let mut vars = Vars::new();
    for (name, value) in assignments {
        vars.set(ScopeKind::Global, name, value);
    }
    vars
}

fn target_scope(name: &str, allsrc: &str) -> Scope {
    let mut scope = Scope::for_target(name);
    scope.set(".TARGET", name);
    scope.set(".ALLSRC", allsrc);
    scope.set(".IMPSRC", allsrc.split(' ').next().unwrap_or(""));
    scope
}

// ---------------------------------------------------------------------------
// Recipe lines
// ---------------------------------------------------------------------------

#[test]
fn typical_compile_line() {
    let mut vars = store(&[
        ("CC", "cc"),
        ("CFLAGS", "-O2 ${DEBUG:D-g}"),
        ("SRCS", "main.c util.c"),
        ("OBJS", "${SRCS:.c=.o}"),
    ]);
    let mut scope = target_scope("prog", "main.o util.o");
    let line = vars.subst_in("${CC} ${CFLAGS} -o $@ ${OBJS}", &mut scope, EvalMode::Eval);
    assert_eq!(line, "cc -O2  -o prog main.o util.o");

    vars.set(ScopeKind::Global, "DEBUG", "yes");
    let line = vars.subst_in("${CC} ${CFLAGS} -c $<", &mut scope, EvalMode::Eval);
    assert_eq!(line, "cc -O2 -g -c main.o");
}

#[test]
fn command_line_wins_over_makefile() {
    let mut vars = Vars::new();
    vars.set(ScopeKind::Cmdline, "PREFIX", "/opt");
    vars.set(ScopeKind::Global, "PREFIX", "/usr/local");
    assert_eq!(vars.subst("${PREFIX}/bin", EvalMode::Eval), "/opt/bin");
}

#[test]
fn environment_is_consulted_last() {
    let mut vars = Vars::with_env([("HOME", "/home/me"), ("EDITOR", "vi")]);
    vars.set(ScopeKind::Global, "EDITOR", "ed");
    assert_eq!(vars.subst("${HOME} ${EDITOR}", EvalMode::Eval), "/home/me ed");
}

#[test]
fn modifier_chains_apply_left_to_right() {
    let mut vars = store(&[("LIST", "b a a b")]);
    assert_eq!(vars.subst("${LIST:O:u}", EvalMode::Eval), "a b");
    assert_eq!(vars.subst("${LIST:u:O}", EvalMode::Eval), "a b b");
    assert_eq!(vars.subst("${LIST:O:u:[#]}", EvalMode::Eval), "2");
}

#[test]
fn loops_and_conditionals_compose() {
    let mut vars = store(&[("DIRS", "lib bin"), ("VERBOSE", "1")]);
    let text = "${DIRS:@d@${VERBOSE:?${d}/v:${d}}@}";
    assert_eq!(vars.subst(text, EvalMode::Eval), "lib/v bin/v");
    vars.delete(ScopeKind::Global, "VERBOSE");
    assert_eq!(vars.subst(text, EvalMode::Eval), "lib bin");
}

#[test]
fn assignment_modifiers_in_target_context() {
    let mut vars = Vars::new();
    let mut scope = target_scope("all", "");
    vars.subst_in("${COUNT::=1}${.TARGET::=renamed}", &mut scope, EvalMode::Eval);
    // An unknown name assigns in the scope being expanded; a name the
    // target has assigns there as well.
    assert_eq!(scope.value("COUNT"), Some("1"));
    assert_eq!(scope.value("@"), Some("renamed"));
    assert!(vars.lookup("COUNT", None).is_none());

    vars.set(ScopeKind::Global, "GLOBAL", "g");
    vars.subst_in("${GLOBAL::=changed}", &mut scope, EvalMode::Eval);
    assert_eq!(vars.lookup("GLOBAL", None).as_deref(), Some("changed"));
}

// ---------------------------------------------------------------------------
// Strictness
// ---------------------------------------------------------------------------

#[test]
fn strict_mode_fails_on_undefined() {
    let mut vars = store(&[("A", "${B}")]);
    let err = vars
        .subst_checked("x ${A}", None, EvalMode::EvalDefined)
        .unwrap_err();
    assert_eq!(err.to_string(), "Variable \"B\" is undefined");

    vars.set(ScopeKind::Global, "B", "b");
    assert_eq!(
        vars.subst_checked("x ${A}", None, EvalMode::EvalDefined)
            .unwrap(),
        "x b"
    );
}

#[test]
fn errors_are_collected_not_fatal() {
    let mut vars = store(&[("A", "a")]);
    let out = vars.subst("${A:Z} ${A} ${A:S/x}", EvalMode::Eval);
    assert_eq!(out, " a ");
    let diags = vars.take_diagnostics();
    assert_eq!(diags.len(), 2);
    assert!(vars.diagnostics().is_empty());
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[test]
fn exported_variables_reach_children() {
    let mut vars = store(&[("OPT", "-v"), ("FLAGS", "${OPT} -x")]);
    vars.export("FLAGS", ExportKind::Normal);

    let mut scope = target_scope("t", "");
    let env = vars.child_env(Some(&mut scope));
    let flags = env.iter().find(|(k, _)| k == "FLAGS").map(|(_, v)| v.as_str());
    assert_eq!(flags, Some("-v -x"));
    let level = env.iter().find(|(k, _)| k == "MAKELEVEL").map(|(_, v)| v.as_str());
    assert_eq!(level, Some("1"));
}

#[test]
fn export_directive_forms() {
    let mut vars = store(&[("A", "1"), ("B", "$$literal")]);
    vars.export_directive(" A");
    vars.export_directive("-literal B");
    let env = vars.child_env(None);
    let get = |name: &str| {
        env.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(get("A").as_deref(), Some("1"));
    assert_eq!(get("B").as_deref(), Some("$$literal"));
}
