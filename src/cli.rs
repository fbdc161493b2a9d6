use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser, ValueEnum};
use dialoguer::Select;
use std::fs;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

#[cfg(feature = "server")]
use studymap::serve::{ServeArgs, run_serve};
use studymap::{
    BackendConfig, Difficulty, Document, GenerationMode, GenerationOptions, Generator, HttpBackend,
    LayoutError, MeasuredNode, MeasurementPass, MeasurementStatus, MindMapLayout, Outline, Palette,
    RenderOptions, TextMetrics, compute_layout, layout_outline, render_png, render_svg,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum InputSource {
    Stdin,
    File(PathBuf),
}

#[derive(Debug, Clone)]
enum OutputDestination {
    Stdout,
    File(PathBuf),
}

#[derive(Debug, Parser)]
#[command(
    name = "studymap",
    about = "Lay out two-column mind maps and render them to SVG, PNG or JSON."
)]
pub struct RenderArgs {
    /// Path to the outline (JSON or indented text). Use '-' to read from stdin.
    #[arg(short = 'i', long = "input")]
    input: Option<String>,

    /// Path to the output file. Use '-' to write to stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Output format (defaults to the output file extension or svg).
    #[arg(short = 'e', long = "output-format")]
    output_format: Option<OutputFormat>,

    /// Convenience flag to force PNG output without specifying --output-format.
    #[arg(long = "png", action = ArgAction::SetTrue, conflicts_with = "output_format")]
    png: bool,

    /// Scale factor when rasterizing PNG output.
    #[arg(long = "scale", default_value_t = 2.0)]
    scale: f32,

    /// JSON file with measured node sizes; every node must be present.
    #[arg(long = "measurements")]
    measurements: Option<PathBuf>,

    /// Comma-separated branch colors.
    #[arg(long = "palette", value_delimiter = ',')]
    palette: Vec<String>,

    /// Background color for the rendered output.
    #[arg(short = 'b', long = "background-color", default_value = "white")]
    background_color: String,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

#[derive(Debug, Parser)]
#[command(
    name = "studymap generate",
    about = "Generate study material from a document with a generative backend."
)]
pub struct GenerateArgs {
    /// Document to study (txt, md, pdf, png, jpg or webp).
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// What to generate. Prompts interactively when omitted on a terminal.
    #[arg(long = "mode", value_enum)]
    mode: Option<GenerationMode>,

    /// Where to write the generated JSON. Use '-' or omit for stdout.
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Also render the generated mind map to this SVG or PNG file.
    #[arg(long = "render")]
    render: Option<PathBuf>,

    /// Generative backend endpoint.
    #[arg(long = "api-url")]
    api_url: Option<String>,

    /// Bearer key for the generative backend.
    #[arg(long = "api-key")]
    api_key: Option<String>,

    /// Model name sent to the generative backend.
    #[arg(long = "model")]
    model: Option<String>,

    /// Number of quiz questions.
    #[arg(long = "question-count", default_value_t = studymap::study::DEFAULT_QUESTION_COUNT)]
    question_count: u32,

    /// Quiz difficulty.
    #[arg(long = "difficulty", value_enum, default_value_t = Difficulty::Medium)]
    difficulty: Difficulty,

    /// Extra instructions appended to the prompt.
    #[arg(long = "prompt")]
    prompt: Option<String>,

    /// Suppress informational output.
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Svg,
    Png,
    Json,
}

impl OutputFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
        {
            Some(ext) if ext == "svg" => Some(OutputFormat::Svg),
            Some(ext) if ext == "png" => Some(OutputFormat::Png),
            Some(ext) if ext == "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Json => "json",
        }
    }
}

pub async fn dispatch() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            #[cfg(feature = "server")]
            {
                let serve_args = ServeArgs::parse_from(
                    std::iter::once(args[0].clone()).chain(args.iter().skip(2).cloned()),
                );
                run_serve(serve_args).await
            }
            #[cfg(not(feature = "server"))]
            {
                Err(anyhow!(
                    "'serve' command requires the 'server' feature to be enabled"
                ))
            }
        }
        Some("generate") => {
            let generate_args = GenerateArgs::parse_from(
                std::iter::once(args[0].clone()).chain(args.iter().skip(2).cloned()),
            );
            run_generate(generate_args).await
        }
        Some("render") => {
            let render_args = RenderArgs::parse_from(
                std::iter::once(args[0].clone()).chain(args.iter().skip(2).cloned()),
            );
            run_render(render_args)
        }
        _ => {
            let render_args = RenderArgs::parse_from(args);
            run_render(render_args)
        }
    }
}

fn run_render(cli: RenderArgs) -> Result<()> {
    let input_source = parse_input(cli.input.as_deref())?;
    let format_preference = if cli.png {
        Some(OutputFormat::Png)
    } else {
        cli.output_format
    };

    let output_dest = parse_output(cli.output.as_deref(), &input_source, format_preference)?;
    let format = determine_format(format_preference, &output_dest)?;

    if format == OutputFormat::Png && cli.scale <= 0.0 {
        bail!("--scale must be greater than zero for PNG output");
    }

    let outline = Outline::parse(&load_source(&input_source)?)?;

    let palette = if cli.palette.is_empty() {
        Palette::default()
    } else {
        Palette::new(cli.palette.clone(), Palette::default().root())?
    };

    let options = RenderOptions {
        background: cli.background_color.clone(),
        palette,
        metrics: TextMetrics::default(),
    };

    let layout = match &cli.measurements {
        Some(path) => layout_from_measurements(&outline, path, &options.palette)?,
        None => layout_outline(&outline, &options.metrics, &options.palette)?,
    };

    let output_bytes = match format {
        OutputFormat::Svg => render_svg(&layout, &options)?.into_bytes(),
        OutputFormat::Png => render_png(&layout, &options, cli.scale)?,
        OutputFormat::Json => serde_json::to_vec_pretty(&layout)?,
    };

    write_output(output_dest, &output_bytes, cli.quiet, "mind map")?;

    Ok(())
}

fn layout_from_measurements(outline: &Outline, path: &Path, palette: &Palette) -> Result<MindMapLayout> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read '{}'", path.display()))?;
    let nodes: Vec<MeasuredNode> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse measurements in '{}'", path.display()))?;

    let mut pass = MeasurementPass::new(outline);
    pass.record_all(nodes)?;

    match pass.status() {
        MeasurementStatus::Ready(measurements) => Ok(compute_layout(outline, measurements, palette)?),
        MeasurementStatus::Pending { .. } => {
            let missing = pass.missing();
            let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
            Err(anyhow::Error::new(LayoutError::NotReady { missing }))
                .with_context(|| format!("no size recorded for: {}", names.join(", ")))
        }
    }
}

async fn run_generate(cli: GenerateArgs) -> Result<()> {
    let mode = match cli.mode {
        Some(mode) => mode,
        None if io::stdin().is_terminal() => select_mode()?,
        None => bail!("--mode is required when not running in a terminal"),
    };

    let options = GenerationOptions {
        question_count: cli.question_count,
        difficulty: cli.difficulty,
        instructions: cli.prompt.clone(),
    };
    options.validate()?;

    if let Some(path) = &cli.render {
        if mode != GenerationMode::MindMap && mode != GenerationMode::GuidedStudy {
            bail!("--render needs a mode that produces a mind map (mind-map or guided-study)");
        }
        if !matches!(
            OutputFormat::from_path(path),
            Some(OutputFormat::Svg | OutputFormat::Png)
        ) {
            bail!("--render expects a .svg or .png path, got '{}'", path.display());
        }
    }

    let document = Document::from_path(&cli.input)?;

    let mut backend_config = BackendConfig::default();
    if let Some(url) = cli.api_url.clone() {
        backend_config.api_url = url;
    }
    if cli.api_key.is_some() {
        backend_config.api_key = cli.api_key.clone();
    }
    if let Some(model) = cli.model.clone() {
        backend_config.model = model;
    }

    if !cli.quiet {
        eprintln!("Generating {} from {}...", mode.description().to_lowercase(), cli.input.display());
    }

    let generator = Generator::new(HttpBackend::new(backend_config)?);
    let content = generator.generate(mode, &document, &options).await?;

    let output_dest = match cli.output.as_deref() {
        None | Some("-") => OutputDestination::Stdout,
        Some(path) => OutputDestination::File(PathBuf::from(path)),
    };
    let json = serde_json::to_vec_pretty(&content)?;
    write_output(output_dest, &json, cli.quiet, "study material")?;

    if let (Some(path), Some(outline)) = (&cli.render, content.mind_map()) {
        let options = RenderOptions::default();
        let layout = layout_outline(outline, &options.metrics, &options.palette)?;
        let bytes = match OutputFormat::from_path(path) {
            Some(OutputFormat::Png) => render_png(&layout, &options, 2.0)?,
            _ => render_svg(&layout, &options)?.into_bytes(),
        };
        write_output(OutputDestination::File(path.clone()), &bytes, cli.quiet, "mind map")?;
    }

    Ok(())
}

fn select_mode() -> Result<GenerationMode> {
    let modes = GenerationMode::value_variants();
    let options: Vec<&str> = modes.iter().map(|mode| mode.description()).collect();

    let selection = Select::new()
        .with_prompt("What should studymap generate?")
        .items(&options)
        .default(0)
        .interact()
        .context("mode selection was cancelled")?;

    Ok(modes[selection])
}

fn parse_input(input: Option<&str>) -> Result<InputSource> {
    match input {
        Some("-") => Ok(InputSource::Stdin),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if !path.exists() {
                return Err(anyhow!("input file '{path_str}' does not exist"));
            }
            Ok(InputSource::File(path))
        }
        None => Ok(InputSource::Stdin),
    }
}

fn parse_output(
    output: Option<&str>,
    input: &InputSource,
    format_hint: Option<OutputFormat>,
) -> Result<OutputDestination> {
    match output {
        Some("-") => Ok(OutputDestination::Stdout),
        Some(path_str) => {
            let path = PathBuf::from(path_str);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(anyhow!(
                        "output directory '{}' does not exist",
                        parent.display()
                    ));
                }
            }
            Ok(OutputDestination::File(path))
        }
        None => {
            let ext = format_hint.unwrap_or(OutputFormat::Svg).extension();
            match input {
                InputSource::File(path) => {
                    let mut default_path = path.to_path_buf();
                    default_path.set_extension(ext);
                    Ok(OutputDestination::File(default_path))
                }
                InputSource::Stdin => Ok(OutputDestination::File(PathBuf::from(format!("out.{ext}")))),
            }
        }
    }
}

fn determine_format(
    preference: Option<OutputFormat>,
    output: &OutputDestination,
) -> Result<OutputFormat> {
    if let Some(fmt) = preference {
        return Ok(fmt);
    }

    match output {
        OutputDestination::Stdout => Ok(OutputFormat::Svg),
        OutputDestination::File(path) => OutputFormat::from_path(path).ok_or_else(|| {
            anyhow!(
                "unable to determine output format from '{}'; please specify --output-format",
                path.display()
            )
        }),
    }
}

fn load_source(source: &InputSource) -> Result<String> {
    match source {
        InputSource::Stdin => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            if buffer.trim().is_empty() {
                Err(anyhow!("no outline supplied on stdin"))
            } else {
                Ok(buffer)
            }
        }
        InputSource::File(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            if contents.trim().is_empty() {
                Err(anyhow!("input file '{}' was empty", path.display()))
            } else {
                Ok(contents)
            }
        }
    }
}

fn write_output(dest: OutputDestination, bytes: &[u8], quiet: bool, what: &str) -> Result<()> {
    match dest {
        OutputDestination::Stdout => {
            let mut stdout = io::stdout();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        }
        OutputDestination::File(path) => {
            fs::write(&path, bytes)
                .with_context(|| format!("failed to write '{}'", path.display()))?;
            if !quiet {
                println!("Generated {} -> {}", what, path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        let dest = OutputDestination::File(PathBuf::from("map.JSON"));
        assert_eq!(determine_format(None, &dest).unwrap(), OutputFormat::Json);
        let unknown = OutputDestination::File(PathBuf::from("map.txt"));
        assert!(determine_format(None, &unknown).is_err());
        assert_eq!(
            determine_format(None, &OutputDestination::Stdout).unwrap(),
            OutputFormat::Svg
        );
    }

    #[test]
    fn default_output_replaces_input_extension() {
        let input = InputSource::File(PathBuf::from("notes/outline.md"));
        match parse_output(None, &input, Some(OutputFormat::Png)).unwrap() {
            OutputDestination::File(path) => assert_eq!(path, PathBuf::from("notes/outline.png")),
            OutputDestination::Stdout => panic!("expected a file destination"),
        }
    }
}
