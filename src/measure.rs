use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::outline::{NodeId, Outline};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width >= 0.0 && self.height >= 0.0
    }
}

/// Serialized `{id, width, height}` triple, as read from measurement files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasuredNode {
    #[serde(flatten)]
    pub id: NodeId,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum MeasureError {
    #[error("node '{0}' is not part of the outline being measured")]
    UnknownNode(NodeId),
    #[error("node '{id}' has an invalid size {width}x{height}")]
    InvalidSize { id: NodeId, width: f64, height: f64 },
}

/// Rendered footprint of a label drawn with the fixed node style.
pub trait Measure {
    fn measure(&self, id: &NodeId, label: &str) -> Size;
}

/// Node sizes taken for one specific outline.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurements {
    fingerprint: u64,
    sizes: HashMap<NodeId, Size>,
}

impl Measurements {
    pub fn for_outline(outline: &Outline) -> Self {
        Self {
            fingerprint: outline.fingerprint(),
            sizes: HashMap::new(),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn get(&self, id: &NodeId) -> Option<Size> {
        self.sizes.get(id).copied()
    }

    pub fn insert(&mut self, id: NodeId, size: Size) {
        self.sizes.insert(id, size);
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Ids of `outline` that have no recorded size, in outline order.
    pub fn missing(&self, outline: &Outline) -> Vec<NodeId> {
        outline
            .node_ids()
            .into_iter()
            .filter(|id| !self.sizes.contains_key(id))
            .collect()
    }

    pub fn to_measured_nodes(&self) -> Vec<MeasuredNode> {
        let mut nodes: Vec<MeasuredNode> = self
            .sizes
            .iter()
            .map(|(id, size)| MeasuredNode {
                id: *id,
                width: size.width,
                height: size.height,
            })
            .collect();
        nodes.sort_by_key(|node| node.id);
        nodes
    }
}

pub enum MeasurementStatus<'a> {
    Pending { missing: usize },
    Ready(&'a Measurements),
}

/// Collects sizes for one outline generation. A pass only becomes ready once
/// every node of its outline has been recorded.
#[derive(Debug, Clone)]
pub struct MeasurementPass {
    expected: Vec<NodeId>,
    measurements: Measurements,
}

impl MeasurementPass {
    pub fn new(outline: &Outline) -> Self {
        Self {
            expected: outline.node_ids(),
            measurements: Measurements::for_outline(outline),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.measurements.fingerprint
    }

    pub fn record(&mut self, id: NodeId, size: Size) -> Result<(), MeasureError> {
        if !self.expected.contains(&id) {
            return Err(MeasureError::UnknownNode(id));
        }
        if !size.is_valid() {
            return Err(MeasureError::InvalidSize {
                id,
                width: size.width,
                height: size.height,
            });
        }
        self.measurements.insert(id, size);
        Ok(())
    }

    pub fn record_all<I>(&mut self, nodes: I) -> Result<(), MeasureError>
    where
        I: IntoIterator<Item = MeasuredNode>,
    {
        for node in nodes {
            self.record(node.id, Size::new(node.width, node.height))?;
        }
        Ok(())
    }

    pub fn missing(&self) -> Vec<NodeId> {
        self.expected
            .iter()
            .filter(|id| self.measurements.get(id).is_none())
            .copied()
            .collect()
    }

    pub fn status(&self) -> MeasurementStatus<'_> {
        let missing = self.missing().len();
        if missing == 0 {
            MeasurementStatus::Ready(&self.measurements)
        } else {
            MeasurementStatus::Pending { missing }
        }
    }

    pub fn into_ready(self) -> Option<Measurements> {
        if self.missing().is_empty() {
            Some(self.measurements)
        } else {
            None
        }
    }
}

/// Measures every node of `outline` in one synchronous pass.
pub fn measure_outline<M: Measure + ?Sized>(outline: &Outline, measurer: &M) -> Measurements {
    let mut measurements = Measurements::for_outline(outline);
    for id in outline.node_ids() {
        if let Some(label) = outline.label(&id) {
            measurements.insert(id, measurer.measure(&id, label));
        }
    }
    tracing::debug!(nodes = measurements.len(), "measured outline");
    measurements
}

/// Font and box style of one node kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeStyle {
    pub font_size: f64,
    pub padding_x: f64,
    pub padding_y: f64,
    pub max_line_chars: usize,
    pub min_width: f64,
}

/// Deterministic measurer: approximates glyph advance from font size and
/// wraps labels on word boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextMetrics {
    pub central: NodeStyle,
    pub main: NodeStyle,
    pub child: NodeStyle,
    /// Average glyph advance as a fraction of the font size.
    pub char_width_ratio: f64,
    pub line_height_ratio: f64,
}

impl Default for TextMetrics {
    fn default() -> Self {
        Self {
            central: NodeStyle {
                font_size: 18.0,
                padding_x: 24.0,
                padding_y: 16.0,
                max_line_chars: 24,
                min_width: 120.0,
            },
            main: NodeStyle {
                font_size: 15.0,
                padding_x: 18.0,
                padding_y: 12.0,
                max_line_chars: 28,
                min_width: 90.0,
            },
            child: NodeStyle {
                font_size: 13.0,
                padding_x: 14.0,
                padding_y: 10.0,
                max_line_chars: 32,
                min_width: 70.0,
            },
            char_width_ratio: 0.56,
            line_height_ratio: 1.35,
        }
    }
}

impl TextMetrics {
    pub fn style(&self, id: &NodeId) -> &NodeStyle {
        match id {
            NodeId::Central => &self.central,
            NodeId::Main { .. } => &self.main,
            NodeId::Child { .. } => &self.child,
        }
    }

    pub fn line_height(&self, style: &NodeStyle) -> f64 {
        style.font_size * self.line_height_ratio
    }

    /// Splits `label` into the lines a node of kind `id` draws.
    pub fn wrap_label(&self, id: &NodeId, label: &str) -> Vec<String> {
        let max_chars = self.style(id).max_line_chars.max(1);
        let mut lines = Vec::new();

        for paragraph in label.split('\n') {
            let mut current = String::new();
            for word in paragraph.split_whitespace() {
                let word_len = word.chars().count();
                let current_len = current.chars().count();
                if current.is_empty() {
                    current.push_str(word);
                } else if current_len + 1 + word_len <= max_chars {
                    current.push(' ');
                    current.push_str(word);
                } else {
                    lines.push(std::mem::take(&mut current));
                    current.push_str(word);
                }
            }
            if !current.is_empty() {
                lines.push(current);
            }
        }

        if lines.is_empty() {
            lines.push(String::new());
        }
        lines
    }
}

impl Measure for TextMetrics {
    fn measure(&self, id: &NodeId, label: &str) -> Size {
        let style = self.style(id);
        let lines = self.wrap_label(id, label);
        let max_chars = lines.iter().map(|line| line.chars().count()).max().unwrap_or(0);

        let text_width = max_chars as f64 * style.font_size * self.char_width_ratio;
        let width = (text_width + style.padding_x * 2.0).max(style.min_width).ceil();
        let height = (lines.len() as f64 * self.line_height(style) + style.padding_y * 2.0).ceil();

        Size::new(width, height)
    }
}

/// Measures every node with the same fixed size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformSize(pub Size);

impl Measure for UniformSize {
    fn measure(&self, _id: &NodeId, _label: &str) -> Size {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::{ChildNode, MainNode};

    fn outline() -> Outline {
        Outline::new(
            "X",
            vec![
                MainNode::new("A", vec![ChildNode::new("A1")]),
                MainNode::leaf("B"),
            ],
        )
    }

    #[test]
    fn pass_is_pending_until_every_node_is_recorded() {
        let outline = outline();
        let mut pass = MeasurementPass::new(&outline);
        assert!(matches!(
            pass.status(),
            MeasurementStatus::Pending { missing: 4 }
        ));

        for id in outline.node_ids().into_iter().take(3) {
            pass.record(id, Size::new(10.0, 10.0)).unwrap();
        }
        assert_eq!(pass.missing(), vec![NodeId::Main { branch: 1 }]);
        assert!(pass.clone().into_ready().is_none());

        pass.record(NodeId::Main { branch: 1 }, Size::new(10.0, 10.0))
            .unwrap();
        match pass.status() {
            MeasurementStatus::Ready(measurements) => assert_eq!(measurements.len(), 4),
            MeasurementStatus::Pending { .. } => panic!("pass should be ready"),
        }
        assert_eq!(
            pass.into_ready().unwrap().fingerprint(),
            outline.fingerprint()
        );
    }

    #[test]
    fn pass_rejects_foreign_ids_and_bad_sizes() {
        let mut pass = MeasurementPass::new(&outline());
        assert_eq!(
            pass.record(NodeId::Main { branch: 7 }, Size::new(1.0, 1.0)),
            Err(MeasureError::UnknownNode(NodeId::Main { branch: 7 }))
        );
        assert!(matches!(
            pass.record(NodeId::Central, Size::new(-1.0, 4.0)),
            Err(MeasureError::InvalidSize { .. })
        ));
        assert!(matches!(
            pass.record(NodeId::Central, Size::new(f64::NAN, 4.0)),
            Err(MeasureError::InvalidSize { .. })
        ));
    }

    #[test]
    fn measure_outline_covers_all_nodes() {
        let outline = outline();
        let measurements = measure_outline(&outline, &UniformSize(Size::new(100.0, 40.0)));
        assert!(measurements.missing(&outline).is_empty());
        assert_eq!(
            measurements.get(&NodeId::Child { branch: 0, child: 0 }),
            Some(Size::new(100.0, 40.0))
        );
    }

    #[test]
    fn wrap_label_breaks_on_word_boundaries() {
        let metrics = TextMetrics::default();
        let id = NodeId::Main { branch: 0 };
        let lines = metrics.wrap_label(&id, "The light dependent reactions of photosynthesis");
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|line| line.chars().count() <= 28));
        assert_eq!(lines.join(" "), "The light dependent reactions of photosynthesis");
        assert_eq!(metrics.wrap_label(&id, "   "), vec![String::new()]);
    }

    #[test]
    fn longer_labels_measure_larger() {
        let metrics = TextMetrics::default();
        let id = NodeId::Child { branch: 0, child: 0 };
        let short = metrics.measure(&id, "ATP");
        let long = metrics.measure(&id, "Adenosine triphosphate production in the thylakoid membrane");
        assert!(short.width >= metrics.child.min_width);
        assert!(long.width > short.width);
        assert!(long.height > short.height);
        assert_eq!(metrics.measure(&id, "ATP"), short);
    }

    #[test]
    fn measured_nodes_serialize_as_tagged_triples() {
        let json = r#"[{"type":"child","branch":1,"child":0,"width":80.0,"height":30.0}]"#;
        let nodes: Vec<MeasuredNode> = serde_json::from_str(json).unwrap();
        assert_eq!(nodes[0].id, NodeId::Child { branch: 1, child: 0 });
        assert_eq!(nodes[0].width, 80.0);
    }
}
