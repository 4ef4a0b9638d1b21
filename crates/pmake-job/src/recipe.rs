//! Expanding a node's commands just before they run.

use pmake_types::Result;
use pmake_vars::{EvalMode, Scope, Vars};

use crate::graph::Node;

/// A line consisting of `...`: the rest of the commands run at the very end.
pub fn is_save_marker(line: &str) -> bool {
    line.trim() == "..."
}

/// Expand one command line in its target's scope.
///
/// In strict mode an undefined variable is an error instead of expanding to
/// nothing.
pub fn expand_line(vars: &mut Vars, locals: &mut Scope, line: &str, strict: bool) -> Result<String> {
    let mode = if strict {
        EvalMode::EvalDefined
    } else {
        EvalMode::Eval
    };
    vars.subst_checked(line, Some(locals), mode)
}

/// Expanded commands of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Recipe {
    /// Lines to run now.
    pub lines: Vec<String>,
    /// Lines after `...`, for `.END`.
    pub deferred: Vec<String>,
}

pub fn expand_recipe(vars: &mut Vars, node: &mut Node, strict: bool) -> Result<Recipe> {
    let mut recipe = Recipe::default();
    for cmd in &node.commands {
        if is_save_marker(cmd) {
            node.flags.save_cmds = true;
            continue;
        }
        let line = expand_line(vars, &mut node.locals, cmd, strict)?;
        if node.flags.save_cmds {
            recipe.deferred.push(line);
        } else {
            recipe.lines.push(line);
        }
    }
    Ok(recipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use pmake_vars::ScopeKind;

    fn node(commands: &[&str]) -> Node {
        let json = serde_json::json!({"targets": [{"name": "t", "commands": commands}]});
        let mut g = Graph::from_json(&json.to_string()).unwrap();
        let id = g.find("t").unwrap();
        g.set_locals(id);
        g.node(id).clone()
    }

    #[test]
    fn commands_after_marker_are_deferred() {
        let mut vars = Vars::new();
        vars.set(ScopeKind::Global, "MSG", "done");
        let mut n = node(&["echo $@", "...", "echo ${MSG}"]);
        let recipe = expand_recipe(&mut vars, &mut n, false).unwrap();
        assert_eq!(recipe.lines, ["echo t"]);
        assert_eq!(recipe.deferred, ["echo done"]);
        assert!(n.flags.save_cmds);
    }

    #[test]
    fn strict_mode_names_the_undefined_variable() {
        let mut vars = Vars::new();
        let mut n = node(&["echo ${UNDEFINED}"]);
        let err = expand_recipe(&mut vars, &mut n, true).unwrap_err();
        assert!(err.to_string().contains("UNDEFINED"));
        let lax = expand_recipe(&mut vars, &mut n, false).unwrap();
        assert_eq!(lax.lines, ["echo "]);
    }

    #[test]
    fn dollar_dollar_reaches_the_shell() {
        let mut vars = Vars::new();
        let mut n = node(&["echo $$HOME"]);
        let recipe = expand_recipe(&mut vars, &mut n, false).unwrap();
        assert_eq!(recipe.lines, ["echo $HOME"]);
    }
}
