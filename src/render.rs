use anyhow::{Result, anyhow, bail};
use std::fmt::Write as FmtWrite;
use tiny_skia::{Pixmap, Transform};

use crate::layout::{MindMapLayout, Palette};
use crate::measure::TextMetrics;
use crate::outline::NodeId;
use crate::utils::{escape_xml, fmt_coord};

const NODE_CORNER_RADIUS: f64 = 10.0;
const CONNECTOR_WIDTH: f64 = 2.5;
const TEXT_ON_ROOT: &str = "#ffffff";
const TEXT_ON_BRANCH: &str = "#111827";

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub background: String,
    pub palette: Palette,
    pub metrics: TextMetrics,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            background: "white".to_string(),
            palette: Palette::default(),
            metrics: TextMetrics::default(),
        }
    }
}

pub fn render_svg(layout: &MindMapLayout, options: &RenderOptions) -> Result<String> {
    let width = layout.canvas.width;
    let height = layout.canvas.height;

    let mut svg = String::new();
    write!(
        svg,
        r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="Inter, system-ui, sans-serif">
  <rect width="100%" height="100%" fill="{}" />
"##,
        escape_xml(&options.background),
        w = fmt_coord(width),
        h = fmt_coord(height),
    )?;

    svg.push_str("  <g class=\"connectors\" fill=\"none\">\n");
    for connector in &layout.connectors {
        let color = options.palette.color(Some(connector.color_index));
        write!(
            svg,
            "    <path d=\"{}\" stroke=\"{}\" stroke-width=\"{}\" stroke-linecap=\"round\" />\n",
            connector.path_data,
            escape_xml(color),
            CONNECTOR_WIDTH
        )?;
    }
    svg.push_str("  </g>\n");

    svg.push_str("  <g class=\"nodes\">\n");
    for node in &layout.nodes {
        let fill = options.palette.color(node.color_index);
        let (fill_opacity, text_color, weight) = match node.id {
            NodeId::Central => ("1", TEXT_ON_ROOT, "700"),
            NodeId::Main { .. } => ("0.9", TEXT_ON_ROOT, "600"),
            NodeId::Child { .. } => ("0.18", TEXT_ON_BRANCH, "400"),
        };

        write!(
            svg,
            "    <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" rx=\"{r}\" ry=\"{r}\" fill=\"{}\" fill-opacity=\"{}\" stroke=\"{}\" stroke-width=\"1.5\" />\n",
            fmt_coord(node.x),
            fmt_coord(node.y),
            fmt_coord(node.width),
            fmt_coord(node.height),
            escape_xml(fill),
            fill_opacity,
            escape_xml(fill),
            r = NODE_CORNER_RADIUS,
        )?;

        let style = options.metrics.style(&node.id);
        let line_height = options.metrics.line_height(style);
        let lines = options.metrics.wrap_label(&node.id, &node.label);
        let start_y = node.center_y() - line_height * (lines.len() as f64 - 1.0) / 2.0;

        if lines.len() <= 1 {
            write!(
                svg,
                "    <text x=\"{}\" y=\"{}\" fill=\"{}\" font-size=\"{}\" font-weight=\"{}\" text-anchor=\"middle\" dominant-baseline=\"middle\">{}</text>\n",
                fmt_coord(node.center_x()),
                fmt_coord(node.center_y()),
                text_color,
                fmt_coord(style.font_size),
                weight,
                escape_xml(lines.first().map(String::as_str).unwrap_or_default())
            )?;
        } else {
            write!(
                svg,
                "    <text x=\"{}\" fill=\"{}\" font-size=\"{}\" font-weight=\"{}\" text-anchor=\"middle\">\n",
                fmt_coord(node.center_x()),
                text_color,
                fmt_coord(style.font_size),
                weight
            )?;
            for (idx, line) in lines.iter().enumerate() {
                write!(
                    svg,
                    "      <tspan x=\"{}\" y=\"{}\" dominant-baseline=\"middle\">{}</tspan>\n",
                    fmt_coord(node.center_x()),
                    fmt_coord(start_y + line_height * idx as f64),
                    escape_xml(line)
                )?;
            }
            svg.push_str("    </text>\n");
        }
    }
    svg.push_str("  </g>\n");

    svg.push_str("</svg>\n");
    Ok(svg)
}

pub fn render_png(layout: &MindMapLayout, options: &RenderOptions, scale: f32) -> Result<Vec<u8>> {
    if !scale.is_finite() || scale <= 0.0 {
        bail!("scale must be greater than zero when rendering PNG output");
    }

    let svg = render_svg(layout, options)?;

    let mut usvg_options = resvg::usvg::Options::default();
    usvg_options.font_family = "Inter".to_string();
    usvg_options.fontdb_mut().load_system_fonts();

    let tree = resvg::usvg::Tree::from_str(&svg, &usvg_options)
        .map_err(|err| anyhow!("failed to parse generated SVG for PNG export: {err}"))?;

    let size = tree.size().to_int_size();
    let scaled_width = ((size.width() as f32) * scale).ceil();
    let scaled_height = ((size.height() as f32) * scale).ceil();

    if !scaled_width.is_finite() || !scaled_height.is_finite() {
        bail!("scaled dimensions are not finite; try a smaller scale factor");
    }

    if scaled_width < 1.0 || scaled_height < 1.0 {
        bail!("scaled dimensions collapsed below 1px; try a larger scale factor");
    }

    if scaled_width > u32::MAX as f32 || scaled_height > u32::MAX as f32 {
        bail!("scaled dimensions exceed supported limits; try a smaller scale factor");
    }

    let scaled_width = scaled_width as u32;
    let scaled_height = scaled_height as u32;

    let mut pixmap = Pixmap::new(scaled_width, scaled_height).ok_or_else(|| {
        anyhow!("failed to allocate {scaled_width}x{scaled_height} surface for PNG export")
    })?;

    resvg::render(&tree, Transform::from_scale(scale, scale), &mut pixmap.as_mut());

    let png_data = pixmap
        .encode_png()
        .map_err(|err| anyhow!("failed to encode PNG output: {err}"))?;

    tracing::debug!(
        width = scaled_width,
        height = scaled_height,
        bytes = png_data.len(),
        "rasterized mind map"
    );

    Ok(png_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::layout_outline;
    use crate::outline::{ChildNode, MainNode, Outline};

    fn layout() -> MindMapLayout {
        let outline = Outline::new(
            "Cells & <Tissues>",
            vec![
                MainNode::new(
                    "Organelles",
                    vec![
                        ChildNode::new("Mitochondria"),
                        ChildNode::new("The endoplasmic reticulum and the Golgi apparatus"),
                    ],
                ),
                MainNode::leaf("Membranes"),
            ],
        );
        layout_outline(&outline, &TextMetrics::default(), &Palette::default()).unwrap()
    }

    #[test]
    fn svg_contains_every_node_and_connector() {
        let layout = layout();
        let svg = render_svg(&layout, &RenderOptions::default()).unwrap();

        assert!(svg.starts_with("<?xml"));
        assert_eq!(svg.matches("<rect x=").count(), layout.nodes.len());
        assert_eq!(svg.matches("<path d=").count(), layout.connectors.len());
        assert!(svg.contains("Cells &amp; &lt;Tissues&gt;"));
        assert!(svg.contains("<tspan"), "long child labels wrap onto several lines");
        for connector in &layout.connectors {
            assert!(svg.contains(&connector.path_data));
        }
    }

    #[test]
    fn svg_uses_palette_colors() {
        let layout = layout();
        let options = RenderOptions {
            palette: Palette::new(vec!["#123456".into()], "#abcdef").unwrap(),
            ..RenderOptions::default()
        };
        let svg = render_svg(&layout, &options).unwrap();
        assert!(svg.contains("fill=\"#abcdef\""));
        assert!(svg.contains("stroke=\"#123456\""));
    }

    #[test]
    fn shorter_render_palette_keeps_branch_colors() {
        let outline = Outline::new(
            "Seasons",
            ["Spring", "Summer", "Autumn", "Winter"]
                .into_iter()
                .map(MainNode::leaf)
                .collect(),
        );
        let layout = layout_outline(&outline, &TextMetrics::default(), &Palette::default()).unwrap();
        assert_eq!(layout.connectors[3].color_index, 3);

        let options = RenderOptions {
            palette: Palette::new(vec!["#123456".into(), "#654321".into()], "#abcdef").unwrap(),
            ..RenderOptions::default()
        };
        let svg = render_svg(&layout, &options).unwrap();
        let strokes: Vec<&str> = svg.lines().filter(|line| line.contains("<path d=")).collect();
        assert_eq!(strokes.len(), 4);
        assert!(strokes[2].contains("stroke=\"#123456\""));
        assert!(strokes[3].contains("stroke=\"#654321\""));
        assert!(strokes.iter().all(|line| !line.contains("#abcdef")));
    }

    #[test]
    fn png_rejects_invalid_scale() {
        let layout = layout();
        assert!(render_png(&layout, &RenderOptions::default(), 0.0).is_err());
        assert!(render_png(&layout, &RenderOptions::default(), f32::NAN).is_err());
    }

    #[test]
    fn png_has_png_header() {
        let png = render_png(&layout(), &RenderOptions::default(), 1.0).unwrap();
        const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
        assert!(png.starts_with(PNG_MAGIC));
    }
}
