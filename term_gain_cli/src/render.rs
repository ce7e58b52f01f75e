use std::panic;
use std::path::Path;

use anyhow::Result;
use image::RgbaImage;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{FontDesc, FontFamily, FontStyle};

const CHART_SIZE: (u32, u32) = (1280, 760);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Png,
    Svg,
}

impl ChartKind {
    pub fn extension(self) -> &'static str {
        match self {
            ChartKind::Png => "png",
            ChartKind::Svg => "svg",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Bar {
    pub label: String,
    pub value: f64,
    pub color: RGBColor,
}

/// Portrait drawn centred on `(index, value)`.
#[derive(Clone, Debug)]
pub struct Overlay {
    pub index: usize,
    pub value: f64,
    pub image: RgbaImage,
}

#[derive(Clone, Debug)]
pub struct Line<'a> {
    pub label: &'a str,
    pub gains: &'a [f64],
    pub color: RGBColor,
    pub overlay: Option<Overlay>,
}

#[derive(Clone, Debug)]
pub struct ChartText {
    pub title: String,
    pub x_desc: String,
    pub y_desc: String,
}

/// Run a render closure, turning plotting errors and backend panics into a
/// message the caller can log.
pub fn render_guard<F>(render: F) -> Result<(), String>
where
    F: FnOnce() -> Result<()>,
{
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
        .map_err(|e| format!("plotting error: {}", e))
}

pub fn render_bar_chart(bars: &[Bar], text: &ChartText, path: &Path, kind: ChartKind) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
            draw_bar_chart(root, bars, text)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
            draw_bar_chart(root, bars, text)
        }
    }
}

pub fn render_line_chart(
    lines: &[Line],
    text: &ChartText,
    path: &Path,
    kind: ChartKind,
) -> Result<()> {
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
            draw_line_chart(root, lines, text)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, CHART_SIZE).into_drawing_area();
            draw_line_chart(root, lines, text)
        }
    }
}

/// Finite min/max of `values` widened by 10%, optionally forced to span zero.
pub fn padded_range<I>(values: I, include_zero: bool) -> (f64, f64)
where
    I: IntoIterator<Item = f64>,
{
    let (mut lo, mut hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        lo = 0.0;
        hi = 0.0;
    }
    if include_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    let pad = ((hi - lo) * 0.1).max(1.0);
    (lo - pad, hi + pad)
}

fn caption_font() -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, 28.0, FontStyle::Normal)
}

fn axis_font() -> FontDesc<'static> {
    FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal)
}

fn draw_bar_chart<DB>(root: DrawingArea<DB, Shift>, bars: &[Bar], text: &ChartText) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let n = bars.len() as u32;
    let (y_min, y_max) = padded_range(bars.iter().map(|b| b.value), true);

    let mut chart = ChartBuilder::on(&root)
        .caption(&text.title, caption_font())
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 60)
        .build_cartesian_2d((0u32..n).into_segmented(), y_min..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len().max(1))
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => bars
                .get(*i as usize)
                .map(|b| b.label.clone())
                .unwrap_or_default(),
            _ => String::new(),
        })
        .y_label_formatter(&|v| format!("{:.0}%", v))
        .x_desc(text.x_desc.as_str())
        .y_desc(text.y_desc.as_str())
        .label_style(axis_font().color(&BLACK.mix(0.85)))
        .draw()?;

    chart.draw_series(bars.iter().enumerate().map(|(i, bar)| {
        let i = i as u32;
        let mut rect = Rectangle::new(
            [
                (SegmentValue::Exact(i), 0.0),
                (SegmentValue::Exact(i + 1), bar.value),
            ],
            bar.color.filled(),
        );
        rect.set_margin(0, 0, 15, 15);
        rect
    }))?;

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(SegmentValue::Exact(0), 0.0), (SegmentValue::Exact(n), 0.0)],
        &BLACK.mix(0.6),
    )))?;

    let offset = (y_max - y_min) * 0.015;
    chart.draw_series(bars.iter().enumerate().map(|(i, bar)| {
        let (y, v_pos) = if bar.value >= 0.0 {
            (bar.value + offset, VPos::Bottom)
        } else {
            (bar.value - offset, VPos::Top)
        };
        Text::new(
            format!("{:+.1}%", bar.value),
            (SegmentValue::CenterOf(i as u32), y),
            axis_font()
                .color(&BLACK)
                .pos(Pos::new(HPos::Center, v_pos)),
        )
    }))?;

    root.present()?;
    Ok(())
}

fn draw_line_chart<DB>(root: DrawingArea<DB, Shift>, lines: &[Line], text: &ChartText) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let longest = lines.iter().map(|l| l.gains.len()).max().unwrap_or(0);
    let x_max = (longest.max(2) - 1) as f64;
    let (y_min, y_max) = padded_range(lines.iter().flat_map(|l| l.gains.iter().copied()), true);

    let mut chart = ChartBuilder::on(&root)
        .caption(&text.title, caption_font())
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .light_line_style(&BLACK.mix(0.05))
        .bold_line_style(&BLACK.mix(0.15))
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.0}%", v))
        .x_desc(text.x_desc.as_str())
        .y_desc(text.y_desc.as_str())
        .label_style(axis_font().color(&BLACK.mix(0.85)))
        .draw()?;

    chart.draw_series(std::iter::once(PathElement::new(
        vec![(0.0, 0.0), (x_max, 0.0)],
        &BLACK.mix(0.4),
    )))?;

    for line in lines {
        let color = line.color;
        let style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        chart
            .draw_series(LineSeries::new(
                line.gains
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(i, v)| (i as f64, *v)),
                style,
            ))?
            .label(line.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(2)));
    }

    // Portraits go above every line.
    for line in lines {
        if let Some(overlay) = line.overlay.as_ref() {
            let centre = chart.backend_coord(&(overlay.index as f64, overlay.value));
            blit_rgba(&root, centre, &overlay.image)?;
        }
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal).color(&BLACK))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    root.present()?;
    Ok(())
}

/// Horizontal run of identical, non-transparent pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PixelRun {
    x: u32,
    y: u32,
    len: u32,
    rgba: [u8; 4],
}

fn pixel_runs(image: &RgbaImage) -> Vec<PixelRun> {
    let mut runs: Vec<PixelRun> = Vec::new();
    for (y, row) in image.rows().enumerate() {
        let y = y as u32;
        for (x, px) in row.enumerate() {
            let x = x as u32;
            if px[3] == 0 {
                continue;
            }
            match runs.last_mut() {
                Some(run) if run.y == y && run.x + run.len == x && run.rgba == px.0 => run.len += 1,
                _ => runs.push(PixelRun {
                    x,
                    y,
                    len: 1,
                    rgba: px.0,
                }),
            }
        }
    }
    runs
}

/// Alpha-blend `image` onto `area` centred on a backend coordinate.
///
/// Bitmap blits carry no alpha channel, so the image goes out as one filled
/// rectangle per run of identical pixels.
fn blit_rgba<DB>(area: &DrawingArea<DB, Shift>, centre: (i32, i32), image: &RgbaImage) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let left = centre.0 - image.width() as i32 / 2;
    let top = centre.1 - image.height() as i32 / 2;
    for run in pixel_runs(image) {
        let [r, g, b, a] = run.rgba;
        let x = left + run.x as i32;
        let y = top + run.y as i32;
        area.draw(&Rectangle::new(
            [(x, y), (x + run.len as i32, y + 1)],
            RGBAColor(r, g, b, a as f64 / 255.0).filled(),
        ))?;
    }
    Ok(())
}
