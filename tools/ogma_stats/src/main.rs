//! Batch overlay statistics for OGMA polygons.
//! Reads targets and reference layers (WKT geometry) from one JSON file, runs
//! the analysis and writes the report as JSON.

use anyhow::{bail, Context, Result};
use clap::Parser;
use geo::Geometry;
use ogma_core::{
    round_for_display, AnalysisConfig, AnalysisReport, Attributes, Crs, OgmaAnalyzer, ReferenceFeature,
    ReferenceLayer, Target,
};
use serde::Deserialize;
use std::{fs, path::Path};
use wkt::TryFromWkt;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ogma_stats", about = "Per-target category composition of OGMA polygons")]
struct Args {
    /// Input JSON with `targets`, `layers` and optional `exclusions`.
    input: String,

    /// Analysis config JSON. Defaults apply for anything omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Output report JSON.
    #[arg(short, long, default_value = "ogma_report.json")]
    output: String,

    /// trace, debug, info, warn or error.
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

// ── Input ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct InputFile {
    targets: Vec<TargetInput>,
    #[serde(default)]
    layers: Vec<LayerInput>,
    #[serde(default)]
    exclusions: Vec<LayerInput>,
}

#[derive(Deserialize)]
struct TargetInput {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    designation: String,
    /// EPSG code; absent means undefined.
    #[serde(default)]
    crs: Option<u32>,
    wkt: String,
}

#[derive(Deserialize)]
struct LayerInput {
    id: String,
    #[serde(default)]
    crs: Option<u32>,
    features: Vec<FeatureInput>,
}

#[derive(Deserialize)]
struct FeatureInput {
    id: String,
    #[serde(default)]
    attributes: Attributes,
    wkt: String,
}

fn parse_wkt(text: &str, what: &str) -> Result<Geometry<f64>> {
    match Geometry::try_from_wkt_str(text) {
        Ok(geometry) => Ok(geometry),
        Err(e) => bail!("Failed to parse WKT for {what}: {e}"),
    }
}

fn load_target(input: TargetInput) -> Result<Target> {
    let geometry = parse_wkt(&input.wkt, &format!("target '{}'", input.id))?;
    Ok(Target::new(input.id, Crs::from(input.crs), geometry).with_metadata(input.name, input.designation))
}

fn load_layer(input: LayerInput) -> Result<ReferenceLayer> {
    let mut layer = ReferenceLayer::new(input.id, Crs::from(input.crs));
    for feature in input.features {
        let geometry = parse_wkt(&feature.wkt, &format!("feature '{}' of layer '{}'", feature.id, layer.id))?;
        layer.push(ReferenceFeature::new(feature.id, feature.attributes, geometry));
    }
    Ok(layer)
}

fn load_config(path: Option<&str>) -> Result<AnalysisConfig> {
    let Some(path) = path else {
        return Ok(AnalysisConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
    Ok(AnalysisConfig::from_json_str(&text)?)
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_summary(report: &AnalysisReport) {
    eprintln!(
        "\n{:<16} {:<14} {:>12} {:<20} {:>12} {:>8}",
        "Target", "Layer", "Net area", "Category", "Area", "%"
    );
    eprintln!("{}", "-".repeat(87));

    for record in &report.records {
        let unit = if record.crs().is_metric() { "ha" } else { "u²" };
        let scale = |area: f64| record.hectares(area).unwrap_or(area);
        eprintln!(
            "{:<16} {:<14} {:>9} {unit}",
            record.target_id(),
            record.layer_id(),
            round_for_display(scale(record.total_area())),
        );
        for category in record.categories() {
            eprintln!(
                "{:<16} {:<14} {:>12} {:<20} {:>9} {unit} {:>8}",
                "",
                "",
                "",
                category.category,
                round_for_display(scale(category.area)),
                round_for_display(category.percent),
            );
        }
        if record.unclassified_area() > 0.0 {
            eprintln!(
                "{:<16} {:<14} {:>12} {:<20} {:>9} {unit} {:>8}",
                "",
                "",
                "",
                "(unclassified)",
                round_for_display(scale(record.unclassified_area())),
                round_for_display(record.unclassified_percent()),
            );
        }
        for assessment in record.assessments() {
            eprintln!(
                "{:<16} {:<14} {:>12} target {:<13} {:?} (surplus {})",
                "",
                "",
                "",
                assessment.category,
                assessment.status,
                round_for_display(scale(assessment.surplus)),
            );
        }
    }

    if !report.failures.is_empty() {
        eprintln!("\nFailed targets:");
        for failure in &report.failures {
            eprintln!("  {failure}");
        }
    }
    if !report.excluded_features.is_empty() {
        eprintln!("\n{} reference features excluded.", report.excluded_features.len());
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_deref())?;
    let text = fs::read_to_string(&args.input).with_context(|| format!("reading input {}", args.input))?;
    let input: InputFile = serde_json::from_str(&text).with_context(|| format!("parsing input {}", args.input))?;

    let targets = input.targets.into_iter().map(load_target).collect::<Result<Vec<_>>>()?;
    let layers = input.layers.into_iter().map(load_layer).collect::<Result<Vec<_>>>()?;
    let exclusions = input.exclusions.into_iter().map(load_layer).collect::<Result<Vec<_>>>()?;
    tracing::info!(
        targets = targets.len(),
        layers = layers.len(),
        exclusions = exclusions.len(),
        "input loaded"
    );

    let analyzer = OgmaAnalyzer::new(config)?;
    let report = analyzer.run(&targets, &layers, &exclusions);

    let out = Path::new(&args.output);
    if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(out, serde_json::to_string_pretty(&report)?)?;

    print_summary(&report);
    eprintln!(
        "\n{} records, {} failed targets -> {}",
        report.records.len(),
        report.failures.len(),
        args.output
    );
    Ok(())
}
