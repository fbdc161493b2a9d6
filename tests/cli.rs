use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/input").join(name)
}

#[test]
fn generates_svg_from_text_outline() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let output_path = tmp.path().join("map.svg");

    let mut cmd = Command::cargo_bin("studymap")?;
    cmd.arg("--input")
        .arg(fixture("photosynthesis.md"))
        .arg("--output")
        .arg(&output_path);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Generated mind map"));

    let svg_contents = fs::read_to_string(&output_path)?;
    assert!(svg_contents.contains("<svg"), "output should contain an <svg> element");
    assert!(svg_contents.contains("Photosynthesis"));

    Ok(())
}

#[test]
fn render_subcommand_writes_layout_json_to_stdout() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("studymap")?;
    cmd.args(["render", "-o", "-", "-e", "json", "-i"])
        .arg(fixture("cells.json"));

    let output = cmd.assert().success().get_output().stdout.clone();
    let layout: serde_json::Value = serde_json::from_slice(&output)?;
    assert_eq!(layout["nodes"].as_array().map(Vec::len), Some(5));
    assert_eq!(layout["connectors"].as_array().map(Vec::len), Some(4));

    Ok(())
}

#[test]
fn reads_outline_from_stdin() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("studymap")?;
    cmd.args(["-o", "-"])
        .write_stdin("Rivers\n- Source\n  - Spring\n- Mouth\n");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Spring").and(predicate::str::starts_with("<?xml")));

    Ok(())
}

#[test]
fn incomplete_measurements_fail() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempdir()?;
    let measurements = tmp.path().join("sizes.json");
    fs::write(
        &measurements,
        r#"[{ "type": "central", "width": 120, "height": 40 }]"#,
    )?;

    let mut cmd = Command::cargo_bin("studymap")?;
    cmd.args(["render", "-o", "-", "-e", "json", "-i"])
        .arg(fixture("cells.json"))
        .arg("--measurements")
        .arg(&measurements);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("main-0").and(predicate::str::contains("unmeasured")));

    Ok(())
}

#[test]
fn malformed_outline_is_reported() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("studymap")?;
    cmd.args(["-o", "-"]).write_stdin("  - orphan child\n");

    cmd.assert().failure().stderr(predicate::str::contains("Error"));
    Ok(())
}

#[test]
fn generate_requires_mode_without_terminal() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("studymap")?;
    cmd.args(["generate", "-i"]).arg(fixture("photosynthesis.md"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--mode is required"));
    Ok(())
}
