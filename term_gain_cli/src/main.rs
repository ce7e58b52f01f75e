use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use image::Rgba;
use plotters::style::RGBColor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use term_gain::{
    choose_placements, circular_portrait, compute_event_gains, load_prices, palette_color,
    parse_color, DatasetConfig, ErrorCategory, EventGain, FallbackPolicy, GainError, GainReport,
    LoadOptions, Params, PlacementMode, PriceSeries, SkippedEvent, StudyConfig,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod render;

use render::{render_bar_chart, render_guard, render_line_chart, Bar, ChartKind, ChartText, Line, Overlay};

#[derive(Parser, Debug)]
#[command(author, version, about = "Index gains over the first trading days of each term", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compute gain windows and write CSV plus bar/line charts per dataset
    Render(RenderArgs),
    /// Summarise price files: rows, date span, columns, gaps in the data
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Study configuration JSON (events, datasets, cutoff, ...)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    /// Price CSV files; replaces the datasets listed in the study
    #[arg(value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Latest date included in any window (YYYY-MM-DD)
    #[arg(long)]
    cutoff: Option<NaiveDate>,

    /// Price column name
    #[arg(long)]
    price_column: Option<String>,

    /// Date format of the price files (chrono syntax)
    #[arg(long)]
    date_format: Option<String>,

    /// Directory holding the event portraits
    #[arg(long, value_hint = ValueHint::DirPath)]
    image_dir: Option<PathBuf>,

    /// Maximum trading days per window
    #[arg(long)]
    max_window: Option<usize>,

    /// Minimum trading days for an event to be charted
    #[arg(long)]
    min_window: Option<usize>,

    /// Portrait placement on the line chart
    #[arg(long, value_enum)]
    placement: Option<PlacementOpt>,

    /// What random placement does when no spot is free
    #[arg(long, value_enum)]
    fallback: Option<FallbackOpt>,

    /// Seed for random placement
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for charts and CSV output
    #[arg(short, long, default_value = "charts", value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,

    /// Also write SVG charts
    #[arg(long, action = ArgAction::SetTrue)]
    svg: bool,

    /// Disable chart generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Disable gain CSV output
    #[arg(long, action = ArgAction::SetTrue)]
    no_csv: bool,

    /// Write gain rows to stdout instead of per-dataset CSV files
    #[arg(long, action = ArgAction::SetTrue)]
    stdout: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Profile major stages with timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// Price CSV files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Price column name
    #[arg(long, default_value = "Close")]
    price_column: String,

    /// Date format of the price files (chrono syntax)
    #[arg(long, default_value = "%m/%d/%y")]
    date_format: String,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PlacementOpt {
    Last,
    Random,
}

impl From<PlacementOpt> for PlacementMode {
    fn from(value: PlacementOpt) -> Self {
        match value {
            PlacementOpt::Last => PlacementMode::Last,
            PlacementOpt::Random => PlacementMode::Random,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FallbackOpt {
    Last,
    Skip,
}

impl From<FallbackOpt> for FallbackPolicy {
    fn from(value: FallbackOpt) -> Self {
        match value {
            FallbackOpt::Last => FallbackPolicy::Last,
            FallbackOpt::Skip => FallbackPolicy::Skip,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Render(args) => args.verbose,
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
        Command::Render(args) => handle_render(args),
        Command::Inspect(args) => handle_inspect(args),
    }
}

fn apply_overrides(study: &mut StudyConfig, args: &RenderArgs) {
    if let Some(cutoff) = args.cutoff {
        study.cutoff = Some(cutoff);
    }
    if let Some(column) = args.price_column.as_ref() {
        study.price_column = column.clone();
    }
    if let Some(format) = args.date_format.as_ref() {
        study.date_format = format.clone();
    }
    if let Some(dir) = args.image_dir.as_ref() {
        study.image_dir = dir.clone();
    }
    if let Some(max) = args.max_window {
        study.max_window = max;
    }
    if let Some(min) = args.min_window {
        study.min_window = min;
    }
    if let Some(mode) = args.placement {
        study.placement.mode = mode.into();
    }
    if let Some(fallback) = args.fallback {
        study.placement.fallback = fallback.into();
    }
    if args.seed.is_some() {
        study.placement.seed = args.seed;
    }
    if !args.inputs.is_empty() {
        study.datasets = args
            .inputs
            .iter()
            .map(|p| DatasetConfig::from_path(p))
            .collect();
    }
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let mut study = StudyConfig::load(&args.config)
        .with_context(|| format!("failed to load study {}", args.config.display()))?;
    apply_overrides(&mut study, &args);
    study.validate()?;
    let params = study.params(Utc::now().date_naive());
    params.validate()?;

    if study.datasets.is_empty() {
        bail!("no price files: pass them as arguments or list them under \"datasets\"");
    }
    if !(args.no_csv && args.no_plot) {
        fs::create_dir_all(&args.out_dir)
            .with_context(|| format!("failed to create {}", args.out_dir.display()))?;
    }
    info!(
        "{} events, cutoff {}, window {}..={} days",
        study.events.len(),
        params.cutoff,
        params.min_window,
        params.max_window
    );

    let t_load = Instant::now();
    let opts = study.load_options();
    let loaded: Vec<(DatasetConfig, Result<PriceSeries, GainError>)> = study
        .datasets
        .clone()
        .into_par_iter()
        .map(|dataset| {
            let result = load_prices(&dataset.path, &opts).map(|loaded| loaded.series);
            (dataset, result)
        })
        .collect();
    if args.profile || args.verbose {
        info!(
            "Load stage: {:.1} ms ({} files)",
            t_load.elapsed().as_secs_f64() * 1000.0,
            loaded.len()
        );
    }

    let mut processed = 0usize;
    for (dataset, result) in loaded {
        match result {
            Ok(series) => {
                process_dataset(&dataset, &series, &study, &params, &args)?;
                processed += 1;
            }
            Err(err) => error!(
                "Skipping dataset {} ({}): {}",
                dataset.name,
                dataset.path.display(),
                err
            ),
        }
    }
    if processed == 0 {
        return Err(anyhow!("none of the configured price files could be loaded"));
    }
    Ok(())
}

fn process_dataset(
    dataset: &DatasetConfig,
    series: &PriceSeries,
    study: &StudyConfig,
    params: &Params,
    args: &RenderArgs,
) -> Result<()> {
    if let (Some(first), Some(last)) = (series.first_date(), series.last_date()) {
        info!(
            "{}: {} rows from {} to {}",
            dataset.name,
            series.len(),
            first,
            last
        );
    }

    let t_compute = Instant::now();
    let report = GainReport::from_outcomes(compute_event_gains(series, &study.events, params));
    for skipped in &report.skipped {
        log_skipped(&dataset.name, skipped);
    }
    info!(
        "{}: {} of {} events computed",
        dataset.name,
        report.computed.len(),
        study.events.len()
    );
    if args.profile || args.verbose {
        info!(
            "Compute stage: {:.1} ms",
            t_compute.elapsed().as_secs_f64() * 1000.0
        );
    }

    if !args.no_csv {
        if args.stdout {
            write_gains_stdout(&dataset.name, &report.computed)?;
        } else {
            let path = args.out_dir.join(format!("{}_gains.csv", dataset.slug()));
            write_gains_csv(&dataset.name, &report.computed, &path)?;
            info!("Wrote gains CSV: {}", path.display());
        }
    }

    if args.no_plot {
        return Ok(());
    }
    if report.computed.is_empty() {
        warn!("{}: no event has enough data to plot", dataset.name);
        return Ok(());
    }

    let t_plot = Instant::now();
    let colors = series_colors(&report.computed);
    let overlays = build_overlays(&report.computed, &colors, study, params);

    let bars = build_bars(&report, &colors);
    let lines: Vec<Line> = report
        .computed
        .iter()
        .zip(&colors)
        .zip(overlays)
        .map(|((gain, color), overlay)| Line {
            label: gain.label(),
            gains: &gain.gains,
            color: to_rgb(*color),
            overlay,
        })
        .collect();

    let days = params.max_window;
    let bar_text = ChartText {
        title: dataset
            .title
            .clone()
            .unwrap_or_else(|| format!("{} % Gain After First {} Trading Days", dataset.name, days)),
        x_desc: String::new(),
        y_desc: "Cumulative % Gain".to_string(),
    };
    let line_text = ChartText {
        title: dataset
            .title
            .clone()
            .unwrap_or_else(|| format!("{} % Gain in First {} Trading Days", dataset.name, days)),
        x_desc: "Trading Days Since Term Start".to_string(),
        y_desc: "Cumulative % Gain".to_string(),
    };

    let mut kinds = vec![ChartKind::Png];
    if args.svg {
        kinds.push(ChartKind::Svg);
    }
    let slug = dataset.slug();
    for kind in kinds {
        let bar_path = args
            .out_dir
            .join(format!("{}_bar.{}", slug, kind.extension()));
        match render_guard(|| render_bar_chart(&bars, &bar_text, &bar_path, kind)) {
            Ok(()) => info!("Wrote plot: {}", bar_path.display()),
            Err(err) => warn!("Skipping bar chart ({}): {}", bar_path.display(), err),
        }

        let line_path = args
            .out_dir
            .join(format!("{}_line.{}", slug, kind.extension()));
        match render_guard(|| render_line_chart(&lines, &line_text, &line_path, kind)) {
            Ok(()) => info!("Wrote plot: {}", line_path.display()),
            Err(err) => warn!("Skipping line chart ({}): {}", line_path.display(), err),
        }
    }
    if args.profile || args.verbose {
        info!(
            "Plot stage: {:.1} ms",
            t_plot.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

/// One warning per skipped event.
fn log_skipped(dataset: &str, skipped: &SkippedEvent) {
    warn!("{}", skip_message(dataset, skipped));
}

fn skip_message(dataset: &str, skipped: &SkippedEvent) -> String {
    let what = match (skipped.error.category(), &skipped.error) {
        (ErrorCategory::DataNotFound, GainError::InsufficientData { .. }) => "not enough data for",
        (ErrorCategory::DataNotFound, _) => "no data on or after start for",
        _ => "error processing",
    };
    format!("{}: {} {}: {}", dataset, what, skipped.event.label, skipped.error)
}

/// One bar per computed event that has a final gain, in its series colour.
fn build_bars(report: &GainReport, colors: &[Rgba<u8>]) -> Vec<Bar> {
    report
        .final_gains()
        .into_iter()
        .map(|(i, value)| Bar {
            label: report.computed[i].label().to_string(),
            value,
            color: to_rgb(colors[i]),
        })
        .collect()
}

/// Configured colour per event, palette colour otherwise.
fn series_colors(computed: &[EventGain]) -> Vec<Rgba<u8>> {
    computed
        .iter()
        .enumerate()
        .map(|(i, gain)| {
            gain.event
                .color
                .as_deref()
                .and_then(|c| parse_color(c).ok())
                .unwrap_or_else(|| palette_color(i))
        })
        .collect()
}

fn to_rgb(color: Rgba<u8>) -> RGBColor {
    RGBColor(color[0], color[1], color[2])
}

/// Place every series, then build the portrait for those that have one.
fn build_overlays(
    computed: &[EventGain],
    colors: &[Rgba<u8>],
    study: &StudyConfig,
    params: &Params,
) -> Vec<Option<Overlay>> {
    let series: Vec<&[f64]> = computed.iter().map(|g| g.gains.as_slice()).collect();
    let rng = match params.placement.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let placements = choose_placements(&series, &params.placement, rng);

    computed
        .iter()
        .zip(colors)
        .zip(placements)
        .map(|((gain, color), placement)| {
            let Some(placement) = placement else {
                debug!("No overlay spot for {}", gain.label());
                return None;
            };
            debug!(
                "Overlay for {} at day {} ({:.2}%, {:?})",
                gain.label(),
                placement.index,
                placement.value,
                placement.kind
            );
            let image = gain.event.image.as_deref()?;
            let path = study.image_dir.join(image);
            match circular_portrait(
                &path,
                params.overlay.diameter,
                params.overlay.border,
                *color,
            ) {
                Ok(image) => Some(Overlay {
                    index: placement.index,
                    value: placement.value,
                    image,
                }),
                Err(GainError::MissingAsset(path)) => {
                    warn!("Missing image for {}: {}", gain.label(), path.display());
                    None
                }
                Err(err) => {
                    warn!("Error processing image for {}: {}", gain.label(), err);
                    None
                }
            }
        })
        .collect()
}

fn write_gains_stdout(dataset: &str, computed: &[EventGain]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_gain_rows(dataset, computed, &mut writer)
}

fn write_gains_csv(dataset: &str, computed: &[EventGain], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_gain_rows(dataset, computed, &mut writer)
}

fn write_gain_rows<W: Write>(
    dataset: &str,
    computed: &[EventGain],
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record(["dataset", "label", "day", "date", "close", "gain_pct"])?;
    for gain in computed {
        for (day, ((date, close), pct)) in gain
            .dates
            .iter()
            .zip(&gain.closes)
            .zip(&gain.gains)
            .enumerate()
        {
            writer.write_record([
                dataset.to_string(),
                gain.label().to_string(),
                day.to_string(),
                date.format("%Y-%m-%d").to_string(),
                format_value(*close),
                format_value(*pct),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn format_value(value: f64) -> String {
    if value.is_finite() {
        format!("{:.3}", value)
    } else {
        String::new()
    }
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let opts = LoadOptions {
        price_column: args.price_column.clone(),
        date_format: args.date_format.clone(),
        ..LoadOptions::default()
    };
    let mut report = String::new();
    for path in &args.inputs {
        report.push_str(&format!("FILE: {}\n", path.display()));
        match load_prices(path, &opts) {
            Ok(loaded) => {
                let series = &loaded.series;
                report.push_str(&format!("  rows: {}\n", loaded.stats.rows));
                report.push_str(&format!("  unique_dates: {}\n", series.len()));
                if let (Some(first), Some(last)) = (series.first_date(), series.last_date()) {
                    report.push_str(&format!("  span: {} .. {}\n", first, last));
                }
                report.push_str(&format!("  columns: {}\n", loaded.stats.columns.join(", ")));
                report.push_str(&format!(
                    "  duplicate_dates: {}\n",
                    loaded.stats.duplicate_dates
                ));
                report.push_str(&format!(
                    "  missing_prices: {}\n",
                    loaded.stats.missing_prices
                ));
                if let Some((from, to, days)) = longest_gap(series) {
                    report.push_str(&format!(
                        "  longest_gap_days: {} ({} .. {})\n",
                        days, from, to
                    ));
                }
            }
            Err(err) => {
                warn!("Could not load {}: {}", path.display(), err);
                report.push_str(&format!("  error: {}\n", err));
            }
        }
        report.push('\n');
    }

    if args.output.as_os_str() == "-" {
        io::stdout().write_all(report.as_bytes())?;
    } else {
        fs::write(&args.output, report)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Price report written: {}", args.output.display());
    }
    Ok(())
}

/// Largest calendar gap between consecutive rows.
fn longest_gap(series: &PriceSeries) -> Option<(NaiveDate, NaiveDate, i64)> {
    series
        .points()
        .windows(2)
        .map(|w| (w[0].date, w[1].date, (w[1].date - w[0].date).num_days()))
        .max_by_key(|(_, _, days)| *days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use term_gain::{Event, PricePoint};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn gain(label: &str, color: Option<&str>, image: Option<&str>) -> EventGain {
        EventGain {
            event: Event {
                label: label.to_string(),
                start: date(2021, 1, 20),
                image: image.map(str::to_string),
                color: color.map(str::to_string),
            },
            dates: vec![date(2021, 1, 20), date(2021, 1, 21)],
            closes: vec![100.0, f64::NAN],
            gains: vec![0.0, f64::NAN],
        }
    }

    fn study(image_dir: &Path) -> StudyConfig {
        let mut study = StudyConfig::from_json(
            r#"{ "events": [{ "label": "A", "start": "2021-01-20" }] }"#,
        )
        .unwrap();
        study.image_dir = image_dir.to_path_buf();
        study
    }

    #[test]
    fn test_gain_rows_leave_missing_values_blank() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_gain_rows("S&P 500", &[gain("A", None, None)], &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "dataset,label,day,date,close,gain_pct");
        assert_eq!(lines[1], "S&P 500,A,0,2021-01-20,100.000,0.000");
        assert_eq!(lines[2], "S&P 500,A,1,2021-01-21,,");
    }

    #[test]
    fn test_bars_follow_report_order_and_colours() {
        let mut a = gain("A", Some("red"), None);
        a.gains = vec![0.0, 4.0, f64::NAN];
        let mut b = gain("B", None, None);
        b.gains = vec![0.0, -2.5];
        let report = GainReport {
            computed: vec![a, b],
            skipped: Vec::new(),
        };
        let colors = series_colors(&report.computed);
        let bars = build_bars(&report, &colors);

        assert_eq!(bars.len(), 2);
        assert_eq!((bars[0].label.as_str(), bars[0].value), ("A", 4.0));
        assert_eq!(bars[0].color, RGBColor(255, 0, 0));
        assert_eq!((bars[1].label.as_str(), bars[1].value), ("B", -2.5));
        assert_eq!(bars[1].color, to_rgb(palette_color(1)));
    }

    #[test]
    fn test_each_skipped_event_gets_one_message() {
        let series = PriceSeries::from_points(
            (0..10)
                .map(|i| PricePoint {
                    date: date(2021, 1, 4) + chrono::Duration::days(i),
                    close: 100.0 + i as f64,
                })
                .collect(),
        );
        let events: Vec<Event> = [
            ("Early", date(2021, 1, 4)),
            ("Short", date(2021, 1, 11)),
            ("Later", date(2022, 1, 20)),
        ]
        .into_iter()
        .map(|(label, start)| Event {
            label: label.to_string(),
            start,
            image: None,
            color: None,
        })
        .collect();
        let params = Params::new(date(2030, 1, 1));
        let report = GainReport::from_outcomes(compute_event_gains(&series, &events, &params));

        let messages: Vec<String> = report
            .skipped
            .iter()
            .map(|s| skip_message("Dow", s))
            .collect();
        assert_eq!(report.computed.len(), 1);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with("Dow: not enough data for Short:"));
        assert!(messages[1].starts_with("Dow: no data on or after start for Later:"));

        let zero = SkippedEvent {
            event: events[0].clone(),
            error: GainError::InvalidStartPrice(0.0),
        };
        assert!(skip_message("Dow", &zero).starts_with("Dow: error processing Early:"));
    }

    #[test]
    fn test_series_colors_fall_back_to_palette() {
        let computed = vec![gain("A", Some("red"), None), gain("B", None, None)];
        let colors = series_colors(&computed);
        assert_eq!(colors[0], Rgba([255, 0, 0, 255]));
        assert_eq!(colors[1], palette_color(1));
    }

    #[test]
    fn test_missing_image_skips_only_the_overlay() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        let mut a = gain("A", Some("red"), Some("a.png"));
        a.gains = vec![0.0, 2.0];
        let mut b = gain("B", Some("blue"), Some("missing.png"));
        b.gains = vec![0.0, -1.0];
        let computed = vec![a, b];

        let study = study(dir.path());
        let mut params = Params::new(date(2030, 1, 1));
        params.placement.seed = Some(1);
        let colors = series_colors(&computed);
        let overlays = build_overlays(&computed, &colors, &study, &params);

        assert_eq!(overlays.len(), 2);
        let first = overlays[0].as_ref().unwrap();
        assert_eq!((first.index, first.value), (1, 2.0));
        assert_eq!(first.image.dimensions(), (46, 46));
        assert!(overlays[1].is_none());
    }

    #[test]
    fn test_overrides_replace_datasets_and_placement() {
        let mut study = study(Path::new("images"));
        let args = RenderArgs::parse_from([
            "render",
            "--config",
            "study.json",
            "--placement",
            "random",
            "--seed",
            "5",
            "--cutoff",
            "2025-04-02",
            "data/dow.csv",
        ]);
        apply_overrides(&mut study, &args);
        assert_eq!(study.placement.mode, PlacementMode::Random);
        assert_eq!(study.placement.seed, Some(5));
        assert_eq!(study.cutoff, Some(date(2025, 4, 2)));
        assert_eq!(study.datasets.len(), 1);
        assert_eq!(study.datasets[0].name, "dow");
    }

    #[test]
    fn test_longest_gap() {
        let series = PriceSeries::from_points(vec![
            PricePoint { date: date(2021, 1, 4), close: 1.0 },
            PricePoint { date: date(2021, 1, 5), close: 1.0 },
            PricePoint { date: date(2021, 1, 11), close: 1.0 },
        ]);
        assert_eq!(
            longest_gap(&series),
            Some((date(2021, 1, 5), date(2021, 1, 11), 6))
        );
    }
}
