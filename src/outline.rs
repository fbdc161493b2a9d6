use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use thiserror::Error;

/// Hierarchical mind-map content: one central topic, ordered main branches,
/// and ordered leaf concepts under each branch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    pub central_topic: String,
    #[serde(default)]
    pub main_nodes: Vec<MainNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MainNode {
    pub title: String,
    #[serde(default)]
    pub children: Vec<ChildNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChildNode {
    pub title: String,
}

/// Identity of a node inside an [`Outline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeId {
    Central,
    Main { branch: usize },
    Child { branch: usize, child: usize },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OutlineError {
    #[error("outline is empty")]
    Empty,
    #[error("outline is missing a central topic")]
    MissingCentralTopic,
    #[error("line {line}: child '{title}' appears before any main branch")]
    OrphanChild { line: usize, title: String },
    #[error("line {line}: nesting deeper than two levels is not supported")]
    TooDeep { line: usize },
    #[error("line {line}: unexpected text '{text}' after the central topic")]
    UnexpectedText { line: usize, text: String },
    #[error("invalid outline JSON: {0}")]
    Json(String),
    #[error("outline pattern failed to compile: {0}")]
    Pattern(String),
    #[error("invalid node id '{0}'")]
    InvalidNodeId(String),
}

impl MainNode {
    pub fn new(title: impl Into<String>, children: Vec<ChildNode>) -> Self {
        Self {
            title: title.into(),
            children,
        }
    }

    pub fn leaf(title: impl Into<String>) -> Self {
        Self::new(title, Vec::new())
    }
}

impl ChildNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

impl Outline {
    pub fn new(central_topic: impl Into<String>, main_nodes: Vec<MainNode>) -> Self {
        Self {
            central_topic: central_topic.into(),
            main_nodes,
        }
    }

    /// Every node id, root first, then each main node followed by its children.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::with_capacity(self.node_count());
        ids.push(NodeId::Central);
        for (branch, main) in self.main_nodes.iter().enumerate() {
            ids.push(NodeId::Main { branch });
            ids.extend((0..main.children.len()).map(|child| NodeId::Child { branch, child }));
        }
        ids
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .main_nodes
            .iter()
            .map(|main| 1 + main.children.len())
            .sum::<usize>()
    }

    pub fn label(&self, id: &NodeId) -> Option<&str> {
        match *id {
            NodeId::Central => Some(self.central_topic.as_str()),
            NodeId::Main { branch } => self.main_nodes.get(branch).map(|m| m.title.as_str()),
            NodeId::Child { branch, child } => self
                .main_nodes
                .get(branch)
                .and_then(|m| m.children.get(child))
                .map(|c| c.title.as_str()),
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.label(id).is_some()
    }

    /// Content hash used to tell one outline generation from another.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Parses either the JSON form or the indented bullet form.
    pub fn parse(source: &str) -> Result<Self, OutlineError> {
        let trimmed = source.trim_start();
        if trimmed.starts_with('{') {
            return serde_json::from_str(trimmed).map_err(|err| OutlineError::Json(err.to_string()));
        }
        parse_text_outline(source)
    }

    pub fn to_text(&self) -> String {
        let mut output = format!("# {}\n", self.central_topic);
        for main in &self.main_nodes {
            output.push_str(&format!("- {}\n", main.title));
            for child in &main.children {
                output.push_str(&format!("  - {}\n", child.title));
            }
        }
        output
    }
}

const BULLET_PATTERN: &str = r"^(?P<indent>[ \t]*)(?:[-*+]|\d+[.)])\s+(?P<title>.+?)\s*$";

fn indent_width(indent: &str) -> usize {
    indent
        .chars()
        .map(|ch| if ch == '\t' { 4 } else { 1 })
        .sum()
}

fn parse_text_outline(source: &str) -> Result<Outline, OutlineError> {
    let bullet = Regex::new(BULLET_PATTERN).map_err(|err| OutlineError::Pattern(err.to_string()))?;
    let mut central: Option<String> = None;
    let mut main_nodes: Vec<MainNode> = Vec::new();
    let mut child_indent: Option<usize> = None;
    let mut saw_content = false;

    for (idx, raw) in source.lines().enumerate() {
        let line_no = idx + 1;
        if raw.trim().is_empty() || raw.trim_start().starts_with("%%") {
            continue;
        }
        saw_content = true;

        let Some(caps) = bullet.captures(raw) else {
            let text = raw.trim().trim_start_matches('#').trim();
            if central.is_none() && main_nodes.is_empty() && !text.is_empty() {
                central = Some(text.to_string());
                continue;
            }
            return Err(OutlineError::UnexpectedText {
                line: line_no,
                text: raw.trim().to_string(),
            });
        };

        if central.is_none() {
            return Err(OutlineError::MissingCentralTopic);
        }

        let indent = indent_width(&caps["indent"]);
        let title = caps["title"].to_string();

        if indent == 0 {
            main_nodes.push(MainNode::leaf(title));
            continue;
        }

        let Some(parent) = main_nodes.last_mut() else {
            return Err(OutlineError::OrphanChild {
                line: line_no,
                title,
            });
        };

        match child_indent {
            None => child_indent = Some(indent),
            Some(expected) if indent > expected => {
                return Err(OutlineError::TooDeep { line: line_no });
            }
            Some(_) => {}
        }

        parent.children.push(ChildNode::new(title));
    }

    if !saw_content {
        return Err(OutlineError::Empty);
    }

    let central_topic = central.ok_or(OutlineError::MissingCentralTopic)?;
    Ok(Outline::new(central_topic, main_nodes))
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Central => write!(f, "root"),
            NodeId::Main { branch } => write!(f, "main-{branch}"),
            NodeId::Child { branch, child } => write!(f, "child-{branch}-{child}"),
        }
    }
}

impl FromStr for NodeId {
    type Err = OutlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || OutlineError::InvalidNodeId(s.to_string());
        let mut parts = s.trim().split('-');
        let id = match (parts.next(), parts.next(), parts.next()) {
            (Some("root"), None, None) => NodeId::Central,
            (Some("main"), Some(branch), None) => NodeId::Main {
                branch: branch.parse().map_err(|_| invalid())?,
            },
            (Some("child"), Some(branch), Some(child)) => NodeId::Child {
                branch: branch.parse().map_err(|_| invalid())?,
                child: child.parse().map_err(|_| invalid())?,
            },
            _ => return Err(invalid()),
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(id)
    }
}

impl NodeId {
    /// Branch index owning this node; `None` for the central node.
    pub fn branch(&self) -> Option<usize> {
        match *self {
            NodeId::Central => None,
            NodeId::Main { branch } | NodeId::Child { branch, .. } => Some(branch),
        }
    }
}
