//! DOT rendering of a stack's dependency graph.

use std::collections::BTreeSet;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use crate::stack::Stack;

/// A `(module, dependency)` edge.
pub type Edge = (PathBuf, PathBuf);

impl Stack {
    /// Render the dependency graph in DOT format.
    ///
    /// Each module is a node; each edge points from a module to one of its
    /// dependencies. Excluded modules are drawn red, assume-applied ones
    /// dashed.
    pub fn graph(&self) -> String {
        let mut out = String::from("digraph {\n");
        for module in self.modules() {
            let name = quote(&module.path);
            let mut attrs = Vec::new();
            if module.flag_excluded {
                attrs.push("color=red");
            }
            if module.assume_already_applied {
                attrs.push("style=dashed");
            }
            if attrs.is_empty() {
                let _ = writeln!(out, "\t{} ;", name);
            } else {
                let _ = writeln!(out, "\t{} [{}];", name, attrs.join(", "));
            }
            for dep in &module.dependencies {
                let _ = writeln!(out, "\t{} -> {};", name, quote(dep));
            }
        }
        out.push_str("}\n");
        out
    }

    /// The stack's edge set.
    pub fn edges(&self) -> BTreeSet<Edge> {
        self.modules()
            .iter()
            .flat_map(|m| m.dependencies.iter().map(|d| (m.path.clone(), d.clone())))
            .collect()
    }
}

/// Parse the edges back out of [`Stack::graph`] output.
pub fn parse_dot_edges(dot: &str) -> BTreeSet<Edge> {
    dot.lines()
        .filter_map(|line| {
            let (from, rest) = unquote(line)?;
            let rest = rest.trim_start().strip_prefix("->")?;
            let (to, _) = unquote(rest)?;
            Some((PathBuf::from(from), PathBuf::from(to)))
        })
        .collect()
}

/// DOT quoted ID for `path`.
fn quote(path: &Path) -> String {
    let mut out = String::from("\"");
    for c in path.display().to_string().chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Read one quoted ID at the start of `s`, returning it and the remainder.
fn unquote(s: &str) -> Option<(String, &str)> {
    let body = s.trim_start().strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &body[i + 1..])),
            '\\' => match chars.next()?.1 {
                'n' => out.push('\n'),
                escaped => out.push(escaped),
            },
            c => out.push(c),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackOptions;
    use crate::module::Module;

    #[test]
    fn test_graph_marks_flags() {
        let stack = Stack::build(
            vec![
                Module::new("/s/vpc").assume_applied(),
                Module::new("/s/app").depends_on("../vpc").excluded(),
            ],
            StackOptions::default(),
        )
        .unwrap();

        let dot = stack.graph();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("\"/s/vpc\" [style=dashed];"));
        assert!(dot.contains("\"/s/app\" [color=red];"));
        assert!(dot.contains("\"/s/app\" -> \"/s/vpc\";"));
    }

    #[test]
    fn test_graph_round_trip() {
        let stack = Stack::build(
            vec![
                Module::new("/s/vpc"),
                Module::new("/s/db").depends_on("../vpc"),
                Module::new("/s/app").depends_on("../db").depends_on("../vpc"),
                Module::new("/s/standalone"),
            ],
            StackOptions::default(),
        )
        .unwrap();

        assert_eq!(parse_dot_edges(&stack.graph()), stack.edges());
        assert_eq!(stack.edges().len(), 3);
    }

    #[test]
    fn test_graph_round_trip_with_awkward_names() {
        let stack = Stack::build(
            vec![
                Module::new("/s/say \"hi\""),
                Module::new("/s/a->b").depends_on("../say \"hi\""),
                Module::new("/s/back\\slash").depends_on("../a->b"),
            ],
            StackOptions::default(),
        )
        .unwrap();

        let dot = stack.graph();
        assert!(dot.contains(r#""/s/say \"hi\"" ;"#));
        assert_eq!(parse_dot_edges(&dot), stack.edges());
        assert_eq!(stack.edges().len(), 2);
    }
}
