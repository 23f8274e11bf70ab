use std::collections::HashSet;
use std::fs;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use alt_profile::chart::{
    render_profile_3d_png, render_profile_chart, ChartKind, ChartOptions,
};
use alt_profile::{
    aggregate_profile, build_workbook, download_link, load_input, parse_samples,
    write_profile_csv, DistanceUnit, InputFormat, Params, Profile, RawTable, SheetChart,
    WorkbookOptions, DEFAULT_EXPORT_NAME, DEFAULT_LINK_LABEL,
};
use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Altitude profile spreadsheet export CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate CSV/GPX tracks into per-interval altitude profiles and export them
    Profile(ProfileArgs),
    /// Show the loaded table, column statistics and the aggregated profile of one input
    Inspect(InspectArgs),
}

/// Flags shared by every subcommand that reads a track.
#[derive(Args, Debug)]
struct ProcessingArgs {
    /// JSON parameter file; explicit flags override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Bucket width in kilometres
    #[arg(long)]
    interval_km: Option<f64>,

    /// Header of the distance column
    #[arg(long)]
    distance_column: Option<String>,

    /// Header of the altitude column
    #[arg(long)]
    altitude_column: Option<String>,

    /// Unit of the distance column
    #[arg(long, value_enum)]
    distance_unit: Option<DistanceUnitOpt>,

    /// CSV field delimiter
    #[arg(long)]
    delimiter: Option<char>,

    /// Decimal places kept when rounding distances and means
    #[arg(long)]
    decimals: Option<u32>,

    /// Input format (auto picks from the file extension)
    #[arg(long, value_enum, default_value_t = FormatOpt::Auto)]
    format: FormatOpt,
}

#[derive(Parser, Debug)]
struct ProfileArgs {
    /// CSV/GPX files to process
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Directory receiving the exports (created when missing)
    #[arg(short, long, default_value = "static", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// Output file stem (single input only; defaults to the input stem)
    #[arg(long)]
    name: Option<String>,

    /// Skip the PNG profile chart
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Also write an SVG profile chart
    #[arg(long, action = ArgAction::SetTrue)]
    svg: bool,

    /// Also write the aggregated table as CSV
    #[arg(long, action = ArgAction::SetTrue)]
    csv: bool,

    /// Also write an HTML page holding the base64 download link
    #[arg(long, action = ArgAction::SetTrue)]
    link: bool,

    /// How the chart sheet of the workbook is populated
    #[arg(long, value_enum, default_value_t = SheetChartOpt::Image)]
    sheet_chart: SheetChartOpt,

    #[command(flatten)]
    processing: ProcessingArgs,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// CSV/GPX file to inspect
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Number of loaded rows to show
    #[arg(long, default_value_t = 5)]
    rows: usize,

    /// Write the report here instead of stdout
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    #[command(flatten)]
    processing: ProcessingArgs,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DistanceUnitOpt {
    #[value(name = "m")]
    Meters,
    #[value(name = "km")]
    Kilometers,
}

impl From<DistanceUnitOpt> for DistanceUnit {
    fn from(value: DistanceUnitOpt) -> Self {
        match value {
            DistanceUnitOpt::Meters => DistanceUnit::Meters,
            DistanceUnitOpt::Kilometers => DistanceUnit::Kilometers,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Auto,
    Csv,
    Gpx,
}

impl From<FormatOpt> for InputFormat {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Auto => InputFormat::Auto,
            FormatOpt::Csv => InputFormat::Csv,
            FormatOpt::Gpx => InputFormat::Gpx,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SheetChartOpt {
    /// Rendered 3D PNG inserted at A1
    Image,
    /// Excel scatter chart over the data sheet
    Native,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Profile(args) => args.verbose,
        Command::Inspect(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Profile(args) => handle_profile(args).map(|_| ()),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn load_params(path: &Path) -> Result<Params> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid parameter file", path.display()))
}

fn build_params(args: &ProcessingArgs) -> Result<Params> {
    let mut params = match args.config.as_ref() {
        Some(path) => load_params(path)?,
        None => Params::default(),
    };
    if let Some(interval_km) = args.interval_km {
        params.interval_km = interval_km;
    }
    if let Some(column) = args.distance_column.as_ref() {
        params.distance_column = column.clone();
    }
    if let Some(column) = args.altitude_column.as_ref() {
        params.altitude_column = column.clone();
    }
    if let Some(unit) = args.distance_unit {
        params.distance_unit = unit.into();
    }
    if let Some(delimiter) = args.delimiter {
        params.delimiter = delimiter;
    }
    if let Some(decimals) = args.decimals {
        params.decimals = decimals;
    }
    params.validate().context("invalid processing parameters")?;
    Ok(params)
}

fn resolve_format(path: &Path, format: FormatOpt) -> Result<InputFormat> {
    let hint = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("");
    InputFormat::from(format)
        .resolve(hint)
        .with_context(|| format!("cannot determine the format of {}", path.display()))
}

fn output_stem(path: &Path, name: Option<&str>) -> String {
    if let Some(name) = name {
        return name.to_string();
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(DEFAULT_EXPORT_NAME)
        .to_string()
}

#[derive(Debug)]
struct Export {
    input: PathBuf,
    workbook: PathBuf,
    buckets: usize,
}

fn handle_profile(args: ProfileArgs) -> Result<Vec<Export>> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    if args.name.is_some() && args.inputs.len() > 1 {
        bail!("--name only applies to a single input");
    }

    let params = build_params(&args.processing)?;
    let chart_opts = ChartOptions {
        tick_step_m: params.tick_step_m,
        ..ChartOptions::default()
    };
    let wb_opts = WorkbookOptions::default();

    let mut seen = HashSet::new();
    let jobs: Vec<(PathBuf, String)> = args
        .inputs
        .iter()
        .map(|path| (path.clone(), output_stem(path, args.name.as_deref())))
        .collect();
    for (path, stem) in &jobs {
        if !seen.insert(stem.clone()) {
            bail!(
                "{} would overwrite another export named '{}'",
                path.display(),
                stem
            );
        }
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;

    let t_total = Instant::now();
    let exports = jobs
        .par_iter()
        .map(|(path, stem)| export_one(path, stem, &args, &params, &chart_opts, &wb_opts))
        .collect::<Result<Vec<_>>>()?;

    for export in &exports {
        debug!(
            "{} -> {} ({} buckets)",
            export.input.display(),
            export.workbook.display(),
            export.buckets
        );
    }
    if args.profile || args.verbose {
        info!(
            "All inputs: {:.1} ms",
            t_total.elapsed().as_secs_f64() * 1000.0
        );
    }
    info!(
        "Exported {} profile(s) to {}",
        exports.len(),
        args.output_dir.display()
    );
    Ok(exports)
}

fn export_one(
    path: &Path,
    stem: &str,
    args: &ProfileArgs,
    params: &Params,
    chart_opts: &ChartOptions,
    wb_opts: &WorkbookOptions,
) -> Result<Export> {
    let timings = args.profile || args.verbose;

    let t_parse = Instant::now();
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let format = resolve_format(path, args.processing.format)?;
    let samples = parse_samples(&data, format, params)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    if timings {
        info!(
            "{}: parse stage {:.1} ms ({} samples)",
            path.display(),
            t_parse.elapsed().as_secs_f64() * 1000.0,
            samples.len()
        );
    }

    let t_aggregate = Instant::now();
    let profile = aggregate_profile(&samples, params)
        .with_context(|| format!("failed to aggregate {}", path.display()))?;
    if timings {
        info!(
            "{}: aggregate stage {:.1} ms",
            path.display(),
            t_aggregate.elapsed().as_secs_f64() * 1000.0
        );
    }
    log_summary(path, &profile);

    let t_workbook = Instant::now();
    let sheet_chart = match args.sheet_chart {
        SheetChartOpt::Native => SheetChart::Native,
        SheetChartOpt::Image => match render_profile_3d_png(&profile, chart_opts) {
            Ok(png) => SheetChart::Image(png),
            Err(err) => {
                warn!(
                    "{}: 3D chart image failed ({}), using a native sheet chart",
                    path.display(),
                    err
                );
                SheetChart::Native
            }
        },
    };
    let bytes = build_workbook(&profile, &sheet_chart, wb_opts)
        .with_context(|| format!("failed to build workbook for {}", path.display()))?;
    let workbook_name = format!("{stem}.xlsx");
    let workbook_path = args.output_dir.join(&workbook_name);
    fs::write(&workbook_path, &bytes)
        .with_context(|| format!("failed to write {}", workbook_path.display()))?;
    info!("Wrote workbook: {}", workbook_path.display());
    if timings {
        info!(
            "{}: workbook stage {:.1} ms ({} bytes)",
            path.display(),
            t_workbook.elapsed().as_secs_f64() * 1000.0,
            bytes.len()
        );
    }

    if !args.no_plot {
        let png_path = args.output_dir.join(format!("{stem}.png"));
        let t_plot = Instant::now();
        match render_profile_chart(&profile, &png_path, ChartKind::Png, chart_opts) {
            Err(err) => warn!("Skipping PNG render ({}): {}", png_path.display(), err),
            Ok(()) => info!("Wrote plot: {}", png_path.display()),
        }
        if timings {
            info!(
                "{}: plot stage {:.1} ms",
                path.display(),
                t_plot.elapsed().as_secs_f64() * 1000.0
            );
        }
    }

    if args.svg {
        let svg_path = args.output_dir.join(format!("{stem}.svg"));
        match render_profile_chart(&profile, &svg_path, ChartKind::Svg, chart_opts) {
            Err(err) => warn!("Skipping SVG render ({}): {}", svg_path.display(), err),
            Ok(()) => info!("Wrote plot: {}", svg_path.display()),
        }
    }

    if args.csv {
        let csv_path = args.output_dir.join(format!("{stem}.csv"));
        let file = File::create(&csv_path)
            .with_context(|| format!("failed to create {}", csv_path.display()))?;
        write_profile_csv(&profile, BufWriter::new(file))
            .with_context(|| format!("failed to write {}", csv_path.display()))?;
        info!("Wrote profile CSV: {}", csv_path.display());
    }

    if args.link {
        let link_path = args.output_dir.join(format!("{stem}.html"));
        fs::write(&link_path, link_page(&bytes, &workbook_name))
            .with_context(|| format!("failed to write {}", link_path.display()))?;
        info!("Wrote download link: {}", link_path.display());
    }

    Ok(Export {
        input: path.to_path_buf(),
        workbook: workbook_path,
        buckets: profile.len(),
    })
}

fn log_summary(path: &Path, profile: &Profile) {
    let summary = profile.summary();
    info!(
        "{}: {} samples -> {} buckets of {} km, {:.2}-{:.2} km",
        path.display(),
        summary.samples,
        summary.buckets,
        profile.interval_km,
        summary.distance_min_km,
        summary.distance_max_km
    );
    match (summary.altitude_min_m, summary.altitude_max_m) {
        (Some(min), Some(max)) => info!(
            "{}: altitude {:.1}-{:.1} m, ascent {:.1} m",
            path.display(),
            min,
            max,
            summary.total_ascent_m
        ),
        _ => warn!("{}: no altitude readings in any bucket", path.display()),
    }
}

fn link_page(bytes: &[u8], filename: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Altitude profile</title></head>\n<body>\n{}\n</body>\n</html>\n",
        download_link(bytes, filename, DEFAULT_LINK_LABEL)
    )
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let params = build_params(&args.processing)?;
    let data =
        fs::read(&args.input).with_context(|| format!("failed to read {}", args.input.display()))?;
    let format = resolve_format(&args.input, args.processing.format)?;

    let (table, samples) = load_input(&data, format, &params)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    let profile = aggregate_profile(&samples, &params)
        .with_context(|| format!("failed to aggregate {}", args.input.display()))?;

    let report = inspect_report(&args.input, format, &table, &profile, args.rows)?;
    match args.output.as_ref() {
        Some(path) => {
            fs::write(path, &report)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Inspection report written: {}", path.display());
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(report.as_bytes())
                .context("failed to write report to stdout")?;
        }
    }
    Ok(())
}

#[derive(Default, Clone, Debug, PartialEq)]
struct KeyStats {
    count: usize,
    numeric: usize,
    min: Option<f64>,
    max: Option<f64>,
}

fn column_stats(table: &RawTable) -> Vec<(String, KeyStats)> {
    table
        .headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let mut stats = KeyStats::default();
            for cell in table.rows.iter().filter_map(|row| row.get(idx)) {
                if cell.is_empty() {
                    continue;
                }
                stats.count += 1;
                if let Some(val) = cell.parse::<f64>().ok().filter(|v| v.is_finite()) {
                    stats.numeric += 1;
                    stats.min = Some(stats.min.map_or(val, |m| m.min(val)));
                    stats.max = Some(stats.max.map_or(val, |m| m.max(val)));
                }
            }
            (name.clone(), stats)
        })
        .collect()
}

fn push_table(out: &mut String, headers: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }
    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| format!("{:<w$}", cell, w = widths.get(i).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    out.push_str(&format!("    {}\n", line(headers)));
    for row in rows {
        out.push_str(&format!("    {}\n", line(row)));
    }
}

fn inspect_report(
    path: &Path,
    format: InputFormat,
    table: &RawTable,
    profile: &Profile,
    rows: usize,
) -> Result<String> {
    let fmt_opt = |v: Option<f64>| v.map_or("n/a".into(), |v| format!("{:.3}", v));

    let mut report = String::new();
    report.push_str(&format!("FILE: {}\n", path.display()));
    report.push_str(&format!("  format: {:?}\n", format).to_ascii_lowercase());
    report.push_str(&format!("  rows: {}\n", table.len()));

    report.push_str("  columns:\n");
    for (name, stats) in column_stats(table) {
        report.push_str(&format!(
            "    - {}: count={}, numeric={}, min={}, max={}\n",
            name,
            stats.count,
            stats.numeric,
            fmt_opt(stats.min),
            fmt_opt(stats.max)
        ));
    }

    let shown = rows.min(table.len());
    report.push_str(&format!("  first {} rows:\n", shown));
    push_table(&mut report, &table.headers, &table.rows[..shown]);

    report.push_str(&format!(
        "  profile: {} buckets of {} km\n",
        profile.len(),
        profile.interval_km
    ));
    let mut csv = Vec::new();
    write_profile_csv(profile, &mut csv)?;
    for line in String::from_utf8(csv)?.lines() {
        report.push_str(&format!("    {}\n", line));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    const TRACK_CSV: &str = "Distance,Altitude\n0,100\n400,110\n1000,200\n1500,220\n2600,300\n";

    fn parse(args: &[&str]) -> Command {
        let argv = std::iter::once("alt-profile").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().command
    }

    fn profile_args(args: &[&str]) -> ProfileArgs {
        let mut argv = vec!["profile"];
        argv.extend_from_slice(args);
        match parse(&argv) {
            Command::Profile(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn profile_defaults() {
        let args = profile_args(&["track.csv"]);
        assert_eq!(args.output_dir, PathBuf::from("static"));
        assert_eq!(args.sheet_chart, SheetChartOpt::Image);
        assert!(!args.no_plot);
        let params = build_params(&args.processing).unwrap();
        assert_eq!(params.interval_km, 1.0);
        assert_eq!(params.distance_unit, DistanceUnit::Meters);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("params.json");
        fs::write(
            &config,
            r#"{"interval_km": 2.0, "distance_column": "dist", "decimals": 3}"#,
        )
        .unwrap();
        let config_arg = config.to_str().unwrap();
        let args = profile_args(&[
            "track.csv",
            "--config",
            config_arg,
            "--interval-km",
            "0.5",
            "--distance-unit",
            "km",
        ]);
        let params = build_params(&args.processing).unwrap();
        assert_eq!(params.interval_km, 0.5);
        assert_eq!(params.distance_column, "dist");
        assert_eq!(params.decimals, 3);
        assert_eq!(params.distance_unit, DistanceUnit::Kilometers);
        assert_eq!(params.altitude_column, "Altitude");
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let args = profile_args(&["track.csv", "--interval-km=-1"]);
        assert!(build_params(&args.processing).is_err());
    }

    #[test]
    fn stems_follow_inputs_unless_named() {
        assert_eq!(output_stem(Path::new("runs/morning.csv"), None), "morning");
        assert_eq!(
            output_stem(Path::new("runs/morning.csv"), Some("profil_altimetry")),
            "profil_altimetry"
        );
    }

    #[test]
    fn profile_writes_requested_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("track.csv");
        fs::write(&input, TRACK_CSV).unwrap();
        let out_dir = dir.path().join("static");

        let args = profile_args(&[
            input.to_str().unwrap(),
            "--output-dir",
            out_dir.to_str().unwrap(),
            "--name",
            "profil_altimetry",
            "--sheet-chart",
            "native",
            "--no-plot",
            "--csv",
            "--link",
        ]);
        let exports = handle_profile(args).unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].buckets, 3);

        let xlsx = fs::read(out_dir.join("profil_altimetry.xlsx")).unwrap();
        assert_eq!(&xlsx[..2], b"PK");
        assert!(!out_dir.join("profil_altimetry.png").exists());

        let csv = fs::read_to_string(out_dir.join("profil_altimetry.csv")).unwrap();
        assert!(csv.starts_with("interval,distance_km,altitude_m,samples\n0,0.20,105.00,2\n"));

        let html = fs::read_to_string(out_dir.join("profil_altimetry.html")).unwrap();
        assert!(html.contains("data:application/vnd.openxmlformats-officedocument.spreadsheetml.sheet;base64,"));
        assert!(html.contains("download=\"profil_altimetry.xlsx\""));
    }

    #[test]
    fn profile_with_image_chart_and_plot() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ride.csv");
        fs::write(&input, TRACK_CSV).unwrap();
        let out_dir = dir.path().join("out");

        let args = profile_args(&[
            input.to_str().unwrap(),
            "--output-dir",
            out_dir.to_str().unwrap(),
        ]);
        handle_profile(args).unwrap();
        assert!(out_dir.join("ride.xlsx").exists());
        assert!(out_dir.join("ride.png").exists());
    }

    #[test]
    fn name_requires_single_input_and_stems_must_differ() {
        let args = profile_args(&["a.csv", "b.csv", "--name", "x"]);
        assert!(handle_profile(args).is_err());

        let args = profile_args(&["one/a.csv", "two/a.csv"]);
        let err = handle_profile(args).unwrap_err();
        assert!(err.to_string().contains("would overwrite"));
    }

    #[test]
    fn inspect_report_lists_columns_rows_and_profile() {
        let params = Params::default();
        let (table, samples) =
            load_input(TRACK_CSV.as_bytes(), InputFormat::Csv, &params).unwrap();
        let profile = aggregate_profile(&samples, &params).unwrap();

        let report =
            inspect_report(Path::new("track.csv"), InputFormat::Csv, &table, &profile, 2).unwrap();
        assert!(report.contains("  format: csv\n"));
        assert!(report.contains("  rows: 5\n"));
        assert!(report.contains("    - Altitude: count=5, numeric=5, min=100.000, max=300.000\n"));
        assert!(report.contains("  first 2 rows:\n"));
        assert!(report.contains("    Distance  Altitude\n"));
        assert!(report.contains("  profile: 3 buckets of 1 km\n"));
        assert!(report.contains("    2,2.60,300.00,1\n"));
    }

    #[test]
    fn column_stats_skip_blank_and_count_text() {
        let table = RawTable {
            headers: vec!["a".into(), "b".into()],
            rows: vec![
                vec!["1".into(), "x".into()],
                vec!["".into(), "3".into()],
                vec!["-2".into()],
            ],
        };
        let stats = column_stats(&table);
        assert_eq!(
            stats[0].1,
            KeyStats {
                count: 2,
                numeric: 2,
                min: Some(-2.0),
                max: Some(1.0)
            }
        );
        assert_eq!(stats[1].1.count, 2);
        assert_eq!(stats[1].1.numeric, 1);
    }
}
