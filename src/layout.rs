use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::measure::{Measure, MeasureError, Measurements, Size, measure_outline};
use crate::outline::{NodeId, Outline};
use crate::utils::fmt_coord;

pub const PADDING: f64 = 60.0;
pub const HORIZONTAL_GAP: f64 = 50.0;
pub const PARENT_CHILD_GAP: f64 = 60.0;
pub const CHILD_GAP: f64 = 20.0;
pub const CHILD_INDENT: f64 = 30.0;
pub const BRANCH_GAP: f64 = 40.0;

const DEFAULT_BRANCH_COLORS: [&str; 8] = [
    "#6366f1", "#ec4899", "#f59e0b", "#10b981", "#3b82f6", "#ef4444", "#8b5cf6", "#14b8a6",
];
const DEFAULT_ROOT_COLOR: &str = "#1f2937";

#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    #[error("measurement pass incomplete: {} node(s) still unmeasured", .missing.len())]
    NotReady { missing: Vec<NodeId> },
    #[error("measurements were taken for a different outline")]
    StaleMeasurements,
    #[error("palette must contain at least one branch color")]
    EmptyPalette,
    #[error(transparent)]
    Measurement(#[from] MeasureError),
}

/// Branch colors cycled by branch index, plus the color reserved for the
/// central node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    colors: Vec<String>,
    root: String,
}

impl Palette {
    pub fn new(colors: Vec<String>, root: impl Into<String>) -> Result<Self, LayoutError> {
        if colors.is_empty() {
            return Err(LayoutError::EmptyPalette);
        }
        Ok(Self {
            colors,
            root: root.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[String] {
        &self.colors
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Color index of branch `branch`.
    pub fn index_for(&self, branch: usize) -> usize {
        branch % self.colors.len().max(1)
    }

    /// `None` selects the root color. Branch indices wrap around, so a
    /// layout colored with a longer palette still renders branch colors.
    pub fn color(&self, index: Option<usize>) -> &str {
        match index {
            Some(idx) if !self.colors.is_empty() => &self.colors[self.index_for(idx)],
            _ => &self.root,
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: DEFAULT_BRANCH_COLORS.iter().map(|c| c.to_string()).collect(),
            root: DEFAULT_ROOT_COLOR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnSide {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionedNode {
    #[serde(flatten)]
    pub id: NodeId,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub side: ColumnSide,
    /// Branch color slot; `None` for the central node.
    pub color_index: Option<usize>,
}

impl PositionedNode {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    /// Axis-aligned overlap; touching edges do not count.
    pub fn overlaps(&self, other: &PositionedNode) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    pub from: NodeId,
    pub to: NodeId,
    pub path_data: String,
    pub color_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Canvas {
    pub width: f64,
    pub height: f64,
}

/// Final running heights of both columns, trailing branch gap included.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnTotals {
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub side: ColumnSide,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindMapLayout {
    pub nodes: Vec<PositionedNode>,
    pub connectors: Vec<Connector>,
    pub canvas: Canvas,
    pub columns: ColumnTotals,
    pub branches: Vec<BranchSummary>,
}

impl MindMapLayout {
    pub fn node(&self, id: &NodeId) -> Option<&PositionedNode> {
        self.nodes.iter().find(|node| node.id == *id)
    }

    pub fn central(&self) -> Option<&PositionedNode> {
        self.node(&NodeId::Central)
    }

    pub fn overlapping_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let mut pairs = Vec::new();
        for (idx, a) in self.nodes.iter().enumerate() {
            for b in &self.nodes[idx + 1..] {
                if a.overlaps(b) {
                    pairs.push((a.id, b.id));
                }
            }
        }
        pairs
    }
}

struct Branch {
    main: Size,
    children: Vec<Size>,
    height: f64,
    width: f64,
    side: ColumnSide,
}

impl Branch {
    fn new(main: Size, children: Vec<Size>) -> Self {
        let mut height = main.height;
        if !children.is_empty() {
            height += PARENT_CHILD_GAP;
            height += children.iter().map(|child| child.height).sum::<f64>();
            height += CHILD_GAP * (children.len() - 1) as f64;
        }

        let widest_child = children.iter().map(|child| child.width).fold(0.0, f64::max);
        let width = if children.is_empty() {
            main.width
        } else {
            main.width.max(CHILD_INDENT + widest_child)
        };

        Self {
            main,
            children,
            height,
            width,
            side: ColumnSide::Left,
        }
    }
}

/// Measures `outline` with `measurer` and lays it out in one step.
pub fn layout_outline<M: Measure + ?Sized>(
    outline: &Outline,
    measurer: &M,
    palette: &Palette,
) -> Result<MindMapLayout, LayoutError> {
    let measurements = measure_outline(outline, measurer);
    compute_layout(outline, &measurements, palette)
}

/// Places every node of `outline` into a two-column tree around the central
/// topic and routes the connectors. Declines to run on an incomplete
/// measurement map.
pub fn compute_layout(
    outline: &Outline,
    measurements: &Measurements,
    palette: &Palette,
) -> Result<MindMapLayout, LayoutError> {
    if palette.is_empty() {
        return Err(LayoutError::EmptyPalette);
    }
    if measurements.fingerprint() != outline.fingerprint() {
        return Err(LayoutError::StaleMeasurements);
    }

    let missing = measurements.missing(outline);
    if !missing.is_empty() {
        tracing::debug!(missing = missing.len(), "layout requested before measurement completed");
        return Err(LayoutError::NotReady { missing });
    }

    let size_of = |id: NodeId| {
        let size = measurements
            .get(&id)
            .ok_or_else(|| LayoutError::NotReady { missing: vec![id] })?;
        if !size.is_valid() {
            return Err(LayoutError::Measurement(MeasureError::InvalidSize {
                id,
                width: size.width,
                height: size.height,
            }));
        }
        Ok(size)
    };

    let central = size_of(NodeId::Central)?;
    let mut branches = Vec::with_capacity(outline.main_nodes.len());
    for (branch, main) in outline.main_nodes.iter().enumerate() {
        let main_size = size_of(NodeId::Main { branch })?;
        let mut children = Vec::with_capacity(main.children.len());
        for child in 0..main.children.len() {
            children.push(size_of(NodeId::Child { branch, child })?);
        }
        branches.push(Branch::new(main_size, children));
    }

    // Greedy balance in outline order; ties go left.
    let mut columns = ColumnTotals::default();
    for branch in &mut branches {
        if columns.left <= columns.right {
            branch.side = ColumnSide::Left;
            columns.left += branch.height + BRANCH_GAP;
        } else {
            branch.side = ColumnSide::Right;
            columns.right += branch.height + BRANCH_GAP;
        }
    }

    let column_width = |side: ColumnSide| {
        branches
            .iter()
            .filter(|branch| branch.side == side)
            .map(|branch| branch.width)
            .fold(None, |acc: Option<f64>, width| Some(acc.map_or(width, |w| w.max(width))))
    };
    let left_span = column_width(ColumnSide::Left).map_or(0.0, |w| w + HORIZONTAL_GAP);
    let right_span = column_width(ColumnSide::Right).map_or(0.0, |w| w + HORIZONTAL_GAP);

    let canvas = Canvas {
        width: left_span + central.width + right_span + PADDING * 2.0,
        height: columns.left.max(columns.right).max(central.height) + PADDING * 2.0,
    };

    let central_x = PADDING + left_span;
    let central_y = (canvas.height - central.height) / 2.0;
    let central_node = PositionedNode {
        id: NodeId::Central,
        label: outline.central_topic.clone(),
        x: central_x,
        y: central_y,
        width: central.width,
        height: central.height,
        side: ColumnSide::Center,
        color_index: None,
    };

    let column_start = |total: f64| (canvas.height - (total - BRANCH_GAP)) / 2.0;
    let mut left_cursor = column_start(columns.left);
    let mut right_cursor = column_start(columns.right);

    let mut nodes = Vec::with_capacity(outline.node_count());
    let mut connectors = Vec::new();
    nodes.push(central_node.clone());

    for (index, (branch, main)) in branches.iter().zip(&outline.main_nodes).enumerate() {
        let color_index = palette.index_for(index);
        let (cursor, main_x) = match branch.side {
            ColumnSide::Right => (
                &mut right_cursor,
                central_x + central.width + HORIZONTAL_GAP,
            ),
            _ => (&mut left_cursor, central_x - HORIZONTAL_GAP - branch.width),
        };

        let main_id = NodeId::Main { branch: index };
        let main_node = PositionedNode {
            id: main_id,
            label: main.title.clone(),
            x: main_x,
            y: *cursor,
            width: branch.main.width,
            height: branch.main.height,
            side: branch.side,
            color_index: Some(color_index),
        };

        connectors.push(Connector {
            from: NodeId::Central,
            to: main_id,
            path_data: root_connector_path(&central_node, &main_node),
            color_index,
        });

        let mut child_y = main_node.bottom() + PARENT_CHILD_GAP;
        let mut child_nodes = Vec::with_capacity(branch.children.len());
        for (child_index, (size, child)) in branch.children.iter().zip(&main.children).enumerate() {
            let child_node = PositionedNode {
                id: NodeId::Child {
                    branch: index,
                    child: child_index,
                },
                label: child.title.clone(),
                x: main_x + CHILD_INDENT,
                y: child_y,
                width: size.width,
                height: size.height,
                side: branch.side,
                color_index: Some(color_index),
            };
            child_y += size.height + CHILD_GAP;

            connectors.push(Connector {
                from: main_id,
                to: child_node.id,
                path_data: child_connector_path(&main_node, &child_node),
                color_index,
            });
            child_nodes.push(child_node);
        }

        *cursor += branch.height + BRANCH_GAP;
        nodes.push(main_node);
        nodes.extend(child_nodes);
    }

    tracing::debug!(
        nodes = nodes.len(),
        connectors = connectors.len(),
        left = columns.left,
        right = columns.right,
        "computed mind-map layout"
    );

    Ok(MindMapLayout {
        nodes,
        connectors,
        canvas,
        columns,
        branches: branches
            .iter()
            .map(|branch| BranchSummary {
                side: branch.side,
                width: branch.width,
                height: branch.height,
            })
            .collect(),
    })
}

/// Quadratic curve from the main node's inner edge to the central node's
/// facing edge, bending at the main node's height.
fn root_connector_path(central: &PositionedNode, main: &PositionedNode) -> String {
    let (start_x, end_x) = match main.side {
        ColumnSide::Right => (main.x, central.right()),
        _ => (main.right(), central.x),
    };
    let start_y = main.center_y();
    let end_y = central.center_y();
    let control_x = (start_x + end_x) / 2.0;

    format!(
        "M {} {} Q {} {} {} {}",
        fmt_coord(start_x),
        fmt_coord(start_y),
        fmt_coord(control_x),
        fmt_coord(start_y),
        fmt_coord(end_x),
        fmt_coord(end_y)
    )
}

/// Cubic curve from the child's top center up to the parent's bottom
/// center; both control points sit at the vertical midpoint.
fn child_connector_path(parent: &PositionedNode, child: &PositionedNode) -> String {
    let start_x = child.center_x();
    let start_y = child.y;
    let end_x = parent.center_x();
    let end_y = parent.bottom();
    let mid_y = start_y - (start_y - end_y) / 2.0;

    format!(
        "M {} {} C {} {} {} {} {} {}",
        fmt_coord(start_x),
        fmt_coord(start_y),
        fmt_coord(start_x),
        fmt_coord(mid_y),
        fmt_coord(end_x),
        fmt_coord(mid_y),
        fmt_coord(end_x),
        fmt_coord(end_y)
    )
}
