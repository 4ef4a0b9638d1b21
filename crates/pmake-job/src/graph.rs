//! The dependency graph walked by both executors.
//!
//! Nodes live in an arena and point at each other with [`NodeId`]s. A graph is
//! normally loaded from a JSON description ([`GraphFile`]); the makefile
//! reader that would otherwise build it is not part of pmake.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use pmake_shell::Shell;
use pmake_types::{MadeState, MakeError, NodeFlags, Result};
use pmake_vars::{ExportKind, Scope, ScopeKind, TargetInfo, Vars};

pub const BEGIN: &str = ".BEGIN";
pub const END: &str = ".END";
pub const INTERRUPT: &str = ".INTERRUPT";

const SPECIALS: &[&str] = &[BEGIN, END, INTERRUPT];

// ---------------------------------------------------------------------------
// JSON description
// ---------------------------------------------------------------------------

/// On-disk form of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphFile {
    /// A `.SHELL` specification such as `name=ksh`.
    pub shell: Option<String>,
    /// Global variable assignments, applied in name order.
    pub vars: BTreeMap<String, String>,
    /// Global variables exported to every command.
    pub exports: Vec<String>,
    /// Targets made when none are named on the command line.
    pub goals: Vec<String>,
    pub targets: Vec<TargetDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetDef {
    pub name: String,
    pub depends: Vec<String>,
    pub commands: Vec<String>,
    pub flags: NodeFlags,
    /// File the target lives in, when it differs from its name.
    pub path: Option<String>,
    /// A `::` entry: a repeated definition becomes a separate cohort.
    pub double_colon: bool,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub flags: NodeFlags,
    pub made: MadeState,
    pub commands: Vec<String>,
    pub children: Vec<NodeId>,
    pub parents: Vec<NodeId>,
    /// Further `::` entries for this target.
    pub cohorts: Vec<NodeId>,
    pub path: PathBuf,
    pub mtime: Option<SystemTime>,
    /// The child with the newest modification time seen so far.
    pub youngest_child: Option<NodeId>,
    /// Children not finished yet.
    pub unmade: usize,
    /// Some child was remade during this run.
    pub child_made: bool,
    pub locals: Scope,
}

impl Node {
    fn new(name: &str) -> Self {
        let mut flags = NodeFlags::default();
        if SPECIALS.contains(&name) {
            flags.special = true;
            flags.phony = true;
        }
        Self {
            name: name.to_string(),
            flags,
            made: MadeState::Unmade,
            commands: Vec::new(),
            children: Vec::new(),
            parents: Vec::new(),
            cohorts: Vec::new(),
            path: PathBuf::from(name),
            mtime: None,
            youngest_child: None,
            unmade: 0,
            child_made: false,
            locals: Scope::for_target(name),
        }
    }
}

/// What to do with a node whose children have all finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Its commands must run.
    Run,
    /// Nothing to run; the node ends in this state.
    Skip(MadeState),
    /// A child failed.
    Abort,
    /// No commands, no file and not phony.
    NoRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    /// Declaration order of the targets defined by the description.
    defined: Vec<NodeId>,
    shell: Option<String>,
    vars: BTreeMap<String, String>,
    exports: Vec<String>,
    goals: Vec<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON graph description from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let file: GraphFile = serde_json::from_str(text)?;
        Self::from_file(file)
    }

    pub fn from_file(file: GraphFile) -> Result<Self> {
        let mut graph = Graph {
            shell: file.shell,
            vars: file.vars,
            exports: file.exports,
            goals: file.goals,
            ..Graph::default()
        };

        for def in file.targets {
            if def.name.is_empty() {
                return Err(MakeError::Graph("target without a name".into()));
            }
            let id = match graph.find(&def.name) {
                Some(existing) if def.double_colon && graph.is_defined(existing) => {
                    let cohort = graph.push_node(&def.name);
                    graph.nodes[existing.0].cohorts.push(cohort);
                    cohort
                }
                Some(existing) => existing,
                None => graph.add_node(&def.name),
            };
            graph.define(id, def);
        }

        // Whatever depends on a target also depends on its cohorts.
        for i in 0..graph.nodes.len() {
            let cohorts = graph.nodes[i].cohorts.clone();
            let parents = graph.nodes[i].parents.clone();
            for parent in parents {
                for &cohort in &cohorts {
                    graph.add_edge(parent, cohort);
                }
            }
        }

        tracing::debug!(nodes = graph.nodes.len(), "graph loaded");
        Ok(graph)
    }

    fn is_defined(&self, id: NodeId) -> bool {
        self.defined.contains(&id)
    }

    fn define(&mut self, id: NodeId, def: TargetDef) {
        if !self.is_defined(id) {
            self.defined.push(id);
        }
        for dep in &def.depends {
            let child = self.add_node(dep);
            self.add_edge(id, child);
        }
        let node = &mut self.nodes[id.0];
        if !def.commands.is_empty() {
            if node.commands.is_empty() {
                node.commands = def.commands;
            } else {
                tracing::warn!(target = %def.name, "duplicate script for target ignored");
            }
        }
        if let Some(path) = def.path {
            node.path = PathBuf::from(path);
        }
        merge_flags(&mut node.flags, def.flags);
    }

    fn push_node(&mut self, name: &str) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(name));
        id
    }

    /// The node named `name`, created as a plain file target if missing.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        if let Some(id) = self.find(name) {
            return id;
        }
        let id = self.push_node(name);
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn add_edge(&mut self, parent: NodeId, child: NodeId) {
        if parent == child || self.nodes[parent.0].children.contains(&child) {
            return;
        }
        self.nodes[parent.0].children.push(child);
        self.nodes[child.0].parents.push(parent);
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// State of the (first) node named `name`.
    pub fn state(&self, name: &str) -> Option<MadeState> {
        self.find(name).map(|id| self.nodes[id.0].made)
    }

    pub fn begin(&self) -> Option<NodeId> {
        self.find(BEGIN)
    }

    pub fn end(&self) -> Option<NodeId> {
        self.find(END)
    }

    pub fn interrupt(&self) -> Option<NodeId> {
        self.find(INTERRUPT)
    }

    // --- settings ---

    /// Install the description's shell, variables, exports and target
    /// information into `vars`.
    pub fn apply_settings(&self, vars: &mut Vars) -> Result<()> {
        if let Some(spec) = &self.shell {
            vars.set_shell(Shell::parse_spec(spec)?);
        }
        for (name, value) in &self.vars {
            vars.set(ScopeKind::Global, name, value);
        }
        for name in &self.exports {
            vars.export(name, ExportKind::Normal);
        }
        for node in &self.nodes {
            let path = node.path.to_string_lossy();
            vars.register_target(
                node.name.clone(),
                TargetInfo {
                    path: (path != node.name.as_str()).then(|| path.into_owned()),
                    has_commands: !node.commands.is_empty(),
                },
            );
        }
        Ok(())
    }

    /// Goals named in the description, or the first ordinary target.
    pub fn default_goals(&self) -> Vec<String> {
        if !self.goals.is_empty() {
            return self.goals.clone();
        }
        self.defined
            .iter()
            .map(|id| &self.nodes[id.0])
            .find(|node| !node.name.starts_with('.'))
            .map(|node| vec![node.name.clone()])
            .unwrap_or_default()
    }

    /// Map goal names to nodes, creating leaf nodes for unknown names so that
    /// existing files are simply up to date.
    pub fn resolve_goals(&mut self, names: &[String]) -> Result<Vec<NodeId>> {
        let names = if names.is_empty() {
            self.default_goals()
        } else {
            names.to_vec()
        };
        if names.is_empty() {
            return Err(MakeError::Fatal("no target to make.".into()));
        }
        let mut goals = Vec::new();
        for name in &names {
            let id = self.add_node(name);
            goals.push(id);
            goals.extend(self.nodes[id.0].cohorts.iter().copied());
        }
        Ok(goals)
    }

    // --- examination ---

    /// Examine everything reachable from `goals`, children first, and return
    /// the nodes that can be considered right away.
    pub fn prepare(&mut self, goals: &[NodeId]) -> Result<VecDeque<NodeId>> {
        let mut mark = vec![Mark::Unvisited; self.nodes.len()];
        let mut ready = VecDeque::new();

        for &goal in goals {
            if mark[goal.0] != Mark::Unvisited {
                continue;
            }
            mark[goal.0] = Mark::OnStack;
            let mut stack = vec![(goal, 0usize)];
            while let Some(top) = stack.last_mut() {
                let (id, next) = *top;
                top.1 += 1;
                match self.nodes[id.0].children.get(next).copied() {
                    Some(child) => match mark[child.0] {
                        Mark::Unvisited => {
                            mark[child.0] = Mark::OnStack;
                            stack.push((child, 0));
                        }
                        Mark::OnStack => {
                            return Err(MakeError::Graph(format!(
                                "Graph cycles through `{}'",
                                self.nodes[child.0].name
                            )));
                        }
                        Mark::Done => {}
                    },
                    None => {
                        stack.pop();
                        mark[id.0] = Mark::Done;
                        self.examine(id);
                        if self.nodes[id.0].unmade == 0 {
                            self.nodes[id.0].made = MadeState::Requested;
                            ready.push_back(id);
                        }
                    }
                }
            }
        }
        Ok(ready)
    }

    fn examine(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.0];
        node.mtime = if node.flags.phony {
            None
        } else {
            file_mtime(&node.path)
        };
        node.made = MadeState::Deferred;
        node.unmade = node.children.len();
        node.child_made = false;
        node.youngest_child = None;
        tracing::trace!(target = %node.name, unmade = node.unmade, "examined");
    }

    /// Phony, missing, or older than something it depends on.
    pub fn out_of_date(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        if node.flags.phony || node.child_made {
            return true;
        }
        let Some(mtime) = node.mtime else {
            return true;
        };
        node.youngest_child
            .and_then(|c| self.nodes[c.0].mtime)
            .is_some_and(|child| child > mtime)
    }

    pub fn verdict(&self, id: NodeId) -> Verdict {
        let node = &self.nodes[id.0];
        if node
            .children
            .iter()
            .any(|c| self.nodes[c.0].made.is_failure())
        {
            return Verdict::Abort;
        }
        if !self.out_of_date(id) {
            return Verdict::Skip(MadeState::UpToDate);
        }
        if node.commands.is_empty() {
            if node.mtime.is_none() && node.children.is_empty() && !node.flags.phony {
                return Verdict::NoRule;
            }
            return Verdict::Skip(MadeState::Made);
        }
        Verdict::Run
    }

    /// Set `.TARGET`, `.ALLSRC`, `.OODATE`, `.IMPSRC` and `.PREFIX` for a node
    /// about to run.
    pub fn set_locals(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        let allsrc: Vec<&str> = node
            .children
            .iter()
            .map(|c| self.nodes[c.0].name.as_str())
            .collect();
        let oodate: Vec<&str> = node
            .children
            .iter()
            .map(|c| &self.nodes[c.0])
            .filter(|child| match (node.mtime, child.mtime) {
                (None, _) => true,
                _ if child.made == MadeState::Made => true,
                (Some(ours), Some(theirs)) => theirs > ours,
                (Some(_), None) => true,
            })
            .map(|child| child.name.as_str())
            .collect();
        let target = node.name.clone();
        let prefix = strip_suffix(&node.name).to_string();
        let impsrc = allsrc.first().copied().unwrap_or_default().to_string();
        let allsrc = allsrc.join(" ");
        let oodate = oodate.join(" ");

        let locals = &mut self.nodes[id.0].locals;
        locals.set(".TARGET", target);
        locals.set(".ALLSRC", allsrc);
        locals.set(".OODATE", oodate);
        locals.set(".IMPSRC", impsrc);
        locals.set(".PREFIX", prefix);
    }

    /// Record that `id` reached `state` and return the parents that became
    /// ready as a result.
    pub fn finish(&mut self, id: NodeId, state: MadeState) -> Vec<NodeId> {
        let node = &mut self.nodes[id.0];
        node.made = state;
        if state == MadeState::Made {
            node.mtime = if node.flags.phony {
                Some(SystemTime::now())
            } else {
                file_mtime(&node.path).or_else(|| Some(SystemTime::now()))
            };
        }
        let mtime = node.mtime;
        let parents = node.parents.clone();

        let mut ready = Vec::new();
        for parent in parents {
            let youngest = self.nodes[parent.0]
                .youngest_child
                .and_then(|c| self.nodes[c.0].mtime);
            let p = &mut self.nodes[parent.0];
            if p.made != MadeState::Deferred {
                continue;
            }
            p.unmade = p.unmade.saturating_sub(1);
            if state == MadeState::Made {
                p.child_made = true;
            }
            if mtime.is_some() && (youngest.is_none() || mtime > youngest) {
                p.youngest_child = Some(id);
            }
            if p.unmade == 0 {
                p.made = MadeState::Requested;
                ready.push(parent);
            }
        }
        ready
    }

    /// Delete the file of a target whose commands failed or were interrupted.
    /// Returns the path when something was removed.
    pub fn remove_target_file(&self, id: NodeId) -> Option<PathBuf> {
        let node = &self.nodes[id.0];
        if node.flags.precious || node.flags.phony || node.flags.special {
            return None;
        }
        let meta = std::fs::symlink_metadata(&node.path).ok()?;
        if meta.is_dir() {
            return None;
        }
        match std::fs::remove_file(&node.path) {
            Ok(()) => Some(node.path.clone()),
            Err(e) => {
                tracing::warn!(path = %node.path.display(), error = %e, "could not remove target");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn merge_flags(into: &mut NodeFlags, from: NodeFlags) {
    into.silent |= from.silent;
    into.ignore |= from.ignore;
    into.phony |= from.phony;
    into.precious |= from.precious;
    into.special |= from.special;
    into.save_cmds |= from.save_cmds;
    into.make |= from.make;
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// The target name without its last suffix, keeping any directory part.
fn strip_suffix(name: &str) -> &str {
    let base = name.rfind('/').map_or(0, |i| i + 1);
    match name[base..].rfind('.') {
        Some(dot) if dot > 0 => &name[..base + dot],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(json: &str) -> Graph {
        Graph::from_json(json).unwrap()
    }

    fn names(g: &Graph, ids: impl IntoIterator<Item = NodeId>) -> Vec<String> {
        ids.into_iter().map(|id| g.node(id).name.clone()).collect()
    }

    // --- loading ---

    #[test]
    fn loads_targets_and_dependencies() {
        let g = graph(
            r#"{"targets": [
                {"name": "all", "depends": ["prog"], "flags": {"phony": true}},
                {"name": "prog", "depends": ["a.o", "b.o"], "commands": ["cc -o $@ $>"]}
            ]}"#,
        );
        let prog = g.find("prog").unwrap();
        assert_eq!(names(&g, g.node(prog).children.clone()), ["a.o", "b.o"]);
        assert!(g.node(g.find("all").unwrap()).flags.phony);
        assert_eq!(g.default_goals(), ["all"]);
        assert_eq!(g.node(g.find("a.o").unwrap()).parents, vec![prog]);
    }

    #[test]
    fn special_targets_are_not_default_goals() {
        let g = graph(
            r#"{"targets": [
                {"name": ".BEGIN", "commands": ["echo start"]},
                {"name": "lib"}
            ]}"#,
        );
        assert_eq!(g.default_goals(), ["lib"]);
        assert!(g.node(g.begin().unwrap()).flags.special);
    }

    #[test]
    fn repeated_double_colon_entries_become_cohorts() {
        let g = graph(
            r#"{"targets": [
                {"name": "all", "depends": ["log"]},
                {"name": "log", "commands": ["echo one"], "double_colon": true},
                {"name": "log", "commands": ["echo two"], "double_colon": true}
            ]}"#,
        );
        let log = g.find("log").unwrap();
        assert_eq!(g.node(log).cohorts.len(), 1);
        let cohort = g.node(log).cohorts[0];
        assert_eq!(g.node(cohort).commands, ["echo two"]);
        let all = g.find("all").unwrap();
        assert_eq!(g.node(all).children, vec![log, cohort]);
    }

    #[test]
    fn nameless_target_is_rejected() {
        let err = Graph::from_json(r#"{"targets": [{"depends": ["x"]}]}"#).unwrap_err();
        assert!(matches!(err, MakeError::Graph(_)));
    }

    #[test]
    fn settings_reach_the_variable_store() {
        let g = graph(
            r#"{"shell": "name=ksh", "vars": {"CC": "cc"}, "exports": ["CC"],
                "targets": [{"name": "x", "path": "obj/x", "commands": ["true"]}]}"#,
        );
        let mut vars = Vars::new();
        g.apply_settings(&mut vars).unwrap();
        assert_eq!(vars.shell().name, "ksh");
        assert_eq!(vars.lookup("CC", None).as_deref(), Some("cc"));
        let info = vars.target("x").unwrap();
        assert_eq!(info.path.as_deref(), Some("obj/x"));
        assert!(info.has_commands);
        assert!(vars.child_env(None).iter().any(|(k, v)| k == "CC" && v == "cc"));
    }

    // --- examination ---

    #[test]
    fn prepare_returns_leaves_first() {
        let mut g = graph(
            r#"{"targets": [
                {"name": "a", "depends": ["b", "c"], "flags": {"phony": true}},
                {"name": "b", "flags": {"phony": true}},
                {"name": "c", "flags": {"phony": true}}
            ]}"#,
        );
        let goals = g.resolve_goals(&[]).unwrap();
        let ready = g.prepare(&goals).unwrap();
        assert_eq!(names(&g, ready), ["b", "c"]);
        let a = g.find("a").unwrap();
        assert_eq!(g.node(a).made, MadeState::Deferred);
        assert_eq!(g.node(a).unmade, 2);
    }

    #[test]
    fn finishing_children_releases_parent() {
        let mut g = graph(
            r#"{"targets": [
                {"name": "a", "depends": ["b", "c"], "flags": {"phony": true}},
                {"name": "b", "flags": {"phony": true}},
                {"name": "c", "flags": {"phony": true}}
            ]}"#,
        );
        let goals = g.resolve_goals(&["a".to_string()]).unwrap();
        g.prepare(&goals).unwrap();
        let (b, c) = (g.find("b").unwrap(), g.find("c").unwrap());
        assert!(g.finish(b, MadeState::Made).is_empty());
        let ready = g.finish(c, MadeState::UpToDate);
        assert_eq!(names(&g, ready), ["a"]);
        let a = g.find("a").unwrap();
        assert!(g.node(a).child_made);
        assert_eq!(g.node(a).made, MadeState::Requested);
    }

    #[test]
    fn cycles_are_reported() {
        let mut g = graph(
            r#"{"targets": [
                {"name": "a", "depends": ["b"]},
                {"name": "b", "depends": ["a"]}
            ]}"#,
        );
        let goals = g.resolve_goals(&[]).unwrap();
        let err = g.prepare(&goals).unwrap_err();
        assert!(err.to_string().contains("Graph cycles through"));
    }

    #[test]
    fn verdicts_follow_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.c");
        std::fs::write(&src, "int x;").unwrap();
        let json = serde_json::json!({
            "targets": [
                {"name": "a.o", "path": dir.path().join("a.o"), "depends": ["a.c"], "commands": ["cc -c a.c"]},
                {"name": "a.c", "path": src},
                {"name": "ghost"}
            ]
        });
        let mut g = Graph::from_json(&json.to_string()).unwrap();
        let goals = g.resolve_goals(&["a.o".into(), "ghost".into()]).unwrap();
        let ready = g.prepare(&goals).unwrap();
        let (obj, csrc, ghost) = (
            g.find("a.o").unwrap(),
            g.find("a.c").unwrap(),
            g.find("ghost").unwrap(),
        );
        assert_eq!(ready, VecDeque::from(vec![csrc, ghost]));
        assert_eq!(g.verdict(csrc), Verdict::Skip(MadeState::UpToDate));
        assert_eq!(g.verdict(ghost), Verdict::NoRule);

        g.finish(csrc, MadeState::UpToDate);
        assert_eq!(g.node(obj).youngest_child, Some(csrc));
        // The object file does not exist yet.
        assert_eq!(g.verdict(obj), Verdict::Run);
    }

    #[test]
    fn failed_child_aborts_parent() {
        let mut g = graph(
            r#"{"targets": [
                {"name": "a", "depends": ["b"], "commands": ["true"]},
                {"name": "b", "commands": ["false"]}
            ]}"#,
        );
        let goals = g.resolve_goals(&[]).unwrap();
        g.prepare(&goals).unwrap();
        let b = g.find("b").unwrap();
        g.finish(b, MadeState::Error);
        assert_eq!(g.verdict(g.find("a").unwrap()), Verdict::Abort);
    }

    #[test]
    fn locals_describe_the_target() {
        let mut g = graph(
            r#"{"targets": [
                {"name": "src/prog.out", "depends": ["main.o", "util.o"], "commands": ["ld"]},
                {"name": "main.o", "flags": {"phony": true}},
                {"name": "util.o", "flags": {"phony": true}}
            ]}"#,
        );
        let goals = g.resolve_goals(&[]).unwrap();
        g.prepare(&goals).unwrap();
        let main = g.find("main.o").unwrap();
        g.finish(main, MadeState::Made);
        let prog = g.find("src/prog.out").unwrap();
        g.set_locals(prog);
        let locals = &g.node(prog).locals;
        assert_eq!(locals.value("@"), Some("src/prog.out"));
        assert_eq!(locals.value(">"), Some("main.o util.o"));
        assert_eq!(locals.value("?"), Some("main.o util.o"));
        assert_eq!(locals.value("<"), Some("main.o"));
        assert_eq!(locals.value("*"), Some("src/prog"));
    }

    #[test]
    fn suffix_stripping() {
        assert_eq!(strip_suffix("a.tar.gz"), "a.tar");
        assert_eq!(strip_suffix("dir.d/file"), "dir.d/file");
        assert_eq!(strip_suffix(".profile"), ".profile");
    }

    #[test]
    fn unknown_goal_becomes_leaf() {
        let mut g = graph(r#"{"targets": [{"name": "x"}]}"#);
        let goals = g.resolve_goals(&["nothing-here".into()]).unwrap();
        assert_eq!(g.node(goals[0]).name, "nothing-here");
        assert!(g.node(goals[0]).children.is_empty());
    }

    #[test]
    fn empty_graph_has_no_goal() {
        let mut g = Graph::new();
        assert!(matches!(g.resolve_goals(&[]), Err(MakeError::Fatal(_))));
    }
}
