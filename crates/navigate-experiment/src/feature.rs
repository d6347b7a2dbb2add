//! Feature programs.
//!
//! A program is an immutable tree: atomic calls (`name` + `args`) and loop
//! nodes whose body runs once per item of an iteration source. Editing a
//! program builds a new one; nothing mutates a program while it runs.
//!
//! Programs can be written as JSON lists. A nested list is a group; a group
//! (or the top-level list) ending in `LoopByCount` loops over the rest of
//! its elements:
//!
//! ```json
//! [
//!   [{"name": "ZStackAcquisition"}, {"name": "StackPause"},
//!    {"name": "LoopByCount", "args": "timepoints"}]
//! ]
//! ```

use navigate_core::error::{NavigateError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const LOOP_BY_COUNT: &str = "LoopByCount";

/// Context quantity a loop can iterate over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedSource {
    Channels,
    Timepoints,
    ZSteps,
    Positions,
}

impl NamedSource {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "channels" => Some(NamedSource::Channels),
            "timepoints" => Some(NamedSource::Timepoints),
            "z_steps" | "zsteps" | "z" => Some(NamedSource::ZSteps),
            "positions" => Some(NamedSource::Positions),
            _ => None,
        }
    }
}

/// How many times a loop body runs. Resolved once, at loop entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationSource {
    Count(usize),
    Named(NamedSource),
}

impl fmt::Display for IterationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IterationSource::Count(n) => write!(f, "{n}"),
            IterationSource::Named(source) => write!(f, "{source:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureNode {
    Atomic(FeatureCall),
    Loop {
        source: IterationSource,
        body: Vec<FeatureNode>,
    },
}

impl FeatureNode {
    pub fn atomic(name: impl Into<String>) -> Self {
        Self::atomic_with(name, Value::Null)
    }

    pub fn atomic_with(name: impl Into<String>, args: Value) -> Self {
        FeatureNode::Atomic(FeatureCall {
            name: name.into(),
            args,
        })
    }

    pub fn repeat(source: IterationSource, body: Vec<FeatureNode>) -> Self {
        FeatureNode::Loop { source, body }
    }

    pub fn over(source: NamedSource, body: Vec<FeatureNode>) -> Self {
        Self::repeat(IterationSource::Named(source), body)
    }

    fn collect_calls<'a>(&'a self, out: &mut Vec<&'a FeatureCall>) {
        match self {
            FeatureNode::Atomic(call) => out.push(call),
            FeatureNode::Loop { body, .. } => {
                for node in body {
                    node.collect_calls(out);
                }
            }
        }
    }
}

/// Whether a program runs once or until a stop is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    #[default]
    Once,
    UntilStopped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProgram {
    name: String,
    nodes: Vec<FeatureNode>,
    #[serde(default)]
    repeat: Repeat,
}

impl FeatureProgram {
    pub fn new(name: impl Into<String>, nodes: Vec<FeatureNode>, repeat: Repeat) -> Self {
        Self {
            name: name.into(),
            nodes,
            repeat,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[FeatureNode] {
        &self.nodes
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    /// Copy of this program with a different repeat mode.
    pub fn with_repeat(&self, repeat: Repeat) -> Self {
        Self {
            repeat,
            ..self.clone()
        }
    }

    /// Copy of this program with `node` appended.
    pub fn with_node(&self, node: FeatureNode) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.push(node);
        Self {
            nodes,
            ..self.clone()
        }
    }

    /// Every atomic call, depth-first.
    pub fn calls(&self) -> Vec<&FeatureCall> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.collect_calls(&mut out);
        }
        out
    }

    /// Parse the JSON list form described in the module docs.
    pub fn from_json(name: impl Into<String>, json: &str, repeat: Repeat) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| NavigateError::Configuration(format!("feature list is not JSON: {e}")))?;
        let items = value.as_array().ok_or_else(|| {
            NavigateError::Configuration("feature list must be a JSON array".into())
        })?;
        let nodes = match parse_group(items)? {
            Group::Sequence(nodes) => nodes,
            Group::Loop(node) => vec![node],
        };
        Ok(Self::new(name, nodes, repeat))
    }
}

enum Group {
    Sequence(Vec<FeatureNode>),
    Loop(FeatureNode),
}

fn parse_group(items: &[Value]) -> Result<Group> {
    let mut nodes = Vec::with_capacity(items.len());
    let mut source = None;
    for (i, item) in items.iter().enumerate() {
        match item {
            Value::Array(inner) => nodes.push(match parse_group(inner)? {
                Group::Loop(node) => node,
                Group::Sequence(body) => FeatureNode::repeat(IterationSource::Count(1), body),
            }),
            Value::Object(_) => {
                let call: FeatureCall = serde_json::from_value(item.clone()).map_err(|e| {
                    NavigateError::Configuration(format!("invalid feature {item}: {e}"))
                })?;
                if call.name == LOOP_BY_COUNT {
                    if i + 1 != items.len() {
                        return Err(NavigateError::Configuration(
                            "LoopByCount must be the last element of its group".into(),
                        ));
                    }
                    source = Some(parse_source(&call.args)?);
                } else {
                    nodes.push(FeatureNode::Atomic(call));
                }
            }
            other => {
                return Err(NavigateError::Configuration(format!(
                    "feature list entries must be objects or lists, got {other}"
                )))
            }
        }
    }
    Ok(match source {
        Some(source) => Group::Loop(FeatureNode::repeat(source, nodes)),
        None => Group::Sequence(nodes),
    })
}

fn parse_source(args: &Value) -> Result<IterationSource> {
    let arg = match args {
        Value::Array(values) if values.len() == 1 => &values[0],
        other => other,
    };
    match arg {
        Value::Number(n) => n
            .as_u64()
            .map(|n| IterationSource::Count(n as usize))
            .ok_or_else(|| {
                NavigateError::Configuration(format!(
                    "loop count must be a non-negative integer, got {n}"
                ))
            }),
        Value::String(name) => NamedSource::parse(name)
            .map(IterationSource::Named)
            .ok_or_else(|| NavigateError::Configuration(format!("unknown loop source '{name}'"))),
        other => Err(NavigateError::Configuration(format!(
            "invalid LoopByCount argument {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn trailing_loop_wraps_the_list() {
        let program = FeatureProgram::from_json(
            "continuous",
            r#"[{"name": "PrepareNextChannel"}, {"name": "LoopByCount", "args": "channels"}]"#,
            Repeat::UntilStopped,
        )
        .unwrap();
        assert_eq!(
            program.nodes(),
            &[FeatureNode::over(
                NamedSource::Channels,
                vec![FeatureNode::atomic("PrepareNextChannel")]
            )]
        );
    }

    #[test]
    fn nested_groups() {
        let program = FeatureProgram::from_json(
            "nested",
            r#"[
                {"name": "SetZoom", "args": "1x"},
                [
                    {"name": "MoveToPosition"},
                    [{"name": "Acquire"}, {"name": "LoopByCount", "args": 3}],
                    {"name": "LoopByCount", "args": ["positions"]}
                ]
            ]"#,
            Repeat::Once,
        )
        .unwrap();
        assert_eq!(
            program.nodes(),
            &[
                FeatureNode::atomic_with("SetZoom", json!("1x")),
                FeatureNode::over(
                    NamedSource::Positions,
                    vec![
                        FeatureNode::atomic("MoveToPosition"),
                        FeatureNode::repeat(
                            IterationSource::Count(3),
                            vec![FeatureNode::atomic("Acquire")]
                        ),
                    ]
                ),
            ]
        );
        let names: Vec<&str> = program.calls().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["SetZoom", "MoveToPosition", "Acquire"]);
    }

    #[test]
    fn malformed_lists_rejected() {
        let cases = [
            r#"{"name": "Acquire"}"#,
            r#"[{"name": "LoopByCount", "args": 2}, {"name": "Acquire"}]"#,
            r#"[{"name": "Acquire"}, {"name": "LoopByCount", "args": -1}]"#,
            r#"[{"name": "Acquire"}, {"name": "LoopByCount", "args": "galaxies"}]"#,
            r#"["Acquire"]"#,
        ];
        for case in cases {
            let err = FeatureProgram::from_json("bad", case, Repeat::Once).unwrap_err();
            assert!(err.is_configuration(), "{case}");
        }
    }

    #[test]
    fn editing_produces_a_new_program() {
        let original = FeatureProgram::new("p", vec![FeatureNode::atomic("Acquire")], Repeat::Once);
        let edited = original.with_node(FeatureNode::atomic("StackPause"));
        assert_eq!(original.nodes().len(), 1);
        assert_eq!(edited.nodes().len(), 2);
        assert_eq!(edited.with_repeat(Repeat::UntilStopped).repeat(), Repeat::UntilStopped);
    }
}
