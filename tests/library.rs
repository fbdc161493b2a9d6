use anyhow::Result;
use studymap::{
    ColumnSide, LayoutDriver, MeasurementPass, MeasurementStatus, MindMapLayout, NodeId, Outline,
    Palette, RenderOptions, Size, TextMetrics, UniformSize, compute_layout, layout_outline,
    measure_outline, render_png, render_svg,
};

fn photosynthesis() -> Result<Outline> {
    Ok(Outline::parse(include_str!("input/photosynthesis.md"))?)
}

fn cells() -> Result<Outline> {
    Ok(Outline::parse(include_str!("input/cells.json"))?)
}

fn assert_within_canvas(layout: &MindMapLayout) {
    for node in &layout.nodes {
        assert!(node.x >= 0.0 && node.y >= 0.0, "{} starts off canvas", node.id);
        assert!(node.right() <= layout.canvas.width, "{} overflows the canvas width", node.id);
        assert!(node.bottom() <= layout.canvas.height, "{} overflows the canvas height", node.id);
    }
}

#[test]
fn text_outline_lays_out_without_overlap() -> Result<()> {
    let outline = photosynthesis()?;
    assert_eq!(outline.node_count(), 12);

    let layout = layout_outline(&outline, &TextMetrics::default(), &Palette::default())?;

    assert_eq!(layout.nodes.len(), 12);
    assert_eq!(layout.connectors.len(), 11);
    assert!(layout.overlapping_pairs().is_empty());
    assert_within_canvas(&layout);

    let central = layout.central().expect("central node");
    assert_eq!(central.side, ColumnSide::Center);
    assert_eq!(central.color_index, None);
    assert!((central.center_y() - layout.canvas.height / 2.0).abs() < 1e-9);

    for node in &layout.nodes {
        match node.side {
            ColumnSide::Left => assert!(node.right() < central.x),
            ColumnSide::Right => assert!(node.x > central.right()),
            ColumnSide::Center => assert_eq!(node.id, NodeId::Central),
        }
    }

    Ok(())
}

#[test]
fn uniform_sizes_give_known_geometry() -> Result<()> {
    let outline = cells()?;
    let layout = layout_outline(&outline, &UniformSize(Size::new(100.0, 40.0)), &Palette::default())?;

    assert_eq!((layout.canvas.width, layout.canvas.height), (550.0, 360.0));

    let position = |id: NodeId| {
        let node = layout.node(&id).expect("node present");
        (node.x, node.y)
    };
    assert_eq!(position(NodeId::Central), (240.0, 160.0));
    assert_eq!(position(NodeId::Main { branch: 0 }), (60.0, 80.0));
    assert_eq!(position(NodeId::Child { branch: 0, child: 0 }), (90.0, 180.0));
    assert_eq!(position(NodeId::Child { branch: 0, child: 1 }), (90.0, 240.0));
    assert_eq!(position(NodeId::Main { branch: 1 }), (390.0, 160.0));

    let paths: Vec<&str> = layout.connectors.iter().map(|c| c.path_data.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "M 160 100 Q 200 100 240 180",
            "M 140 180 C 140 150 110 150 110 120",
            "M 140 240 C 140 180 110 180 110 120",
            "M 390 180 Q 365 180 340 180",
        ]
    );

    Ok(())
}

#[test]
fn layout_is_deterministic_and_serializable() -> Result<()> {
    let outline = photosynthesis()?;
    let first = layout_outline(&outline, &TextMetrics::default(), &Palette::default())?;
    let second = layout_outline(&outline, &TextMetrics::default(), &Palette::default())?;
    assert_eq!(first, second);

    let json = serde_json::to_value(&first)?;
    assert_eq!(json["nodes"][0]["type"], "central");
    assert_eq!(json["nodes"][1]["type"], "main");
    assert_eq!(json["connectors"][0]["from"]["type"], "central");
    Ok(())
}

#[test]
fn incremental_measurement_gates_layout() -> Result<()> {
    let outline = cells()?;
    let measurements = measure_outline(&outline, &TextMetrics::default());

    let mut pass = MeasurementPass::new(&outline);
    for id in outline.node_ids().into_iter().skip(1) {
        pass.record(id, measurements.get(&id).expect("measured"))?;
    }
    assert!(matches!(pass.status(), MeasurementStatus::Pending { missing: 1 }));
    assert!(pass.clone().into_ready().is_none());

    pass.record(NodeId::Central, measurements.get(&NodeId::Central).expect("measured"))?;
    let ready = pass.into_ready().expect("pass complete");
    let gated = compute_layout(&outline, &ready, &Palette::default())?;
    let direct = compute_layout(&outline, &measurements, &Palette::default())?;
    assert_eq!(gated, direct);
    Ok(())
}

#[test]
fn driver_discards_measurements_for_replaced_outline() -> Result<()> {
    let mut driver = LayoutDriver::new(cells()?, Palette::default());
    let stale_generation = driver.generation();
    let stale = measure_outline(driver.outline(), &TextMetrics::default()).to_measured_nodes();

    driver.set_outline(photosynthesis()?);
    driver.record_batch(stale_generation, &stale)?;
    assert!(driver.layout().is_none());

    let fresh = measure_outline(driver.outline(), &TextMetrics::default()).to_measured_nodes();
    driver.record_batch(driver.generation(), &fresh)?;
    assert_eq!(driver.layout().expect("layout ready").nodes.len(), 12);
    Ok(())
}

#[test]
fn renders_svg_and_png() -> Result<()> {
    let layout = layout_outline(&photosynthesis()?, &TextMetrics::default(), &Palette::default())?;
    let options = RenderOptions::default();

    let svg = render_svg(&layout, &options)?;
    assert!(svg.contains("<svg"), "rendered svg should contain root element");
    assert!(svg.contains("Calvin cycle"), "node labels should appear in output");

    let png = render_png(&layout, &options, 1.0)?;
    const PNG_MAGIC: &[u8; 8] = b"\x89PNG\r\n\x1a\n";
    assert!(png.starts_with(PNG_MAGIC), "rendered png should start with PNG header");
    Ok(())
}
