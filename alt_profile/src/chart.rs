//! Plotters rendering of altitude profiles: the filled 2D profile and the 3D
//! view embedded in spreadsheets.

use std::panic;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{register_font, FontDesc, FontFamily, FontStyle};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingErrorKind,
};
use serde::{Deserialize, Serialize};

use crate::{ApError, Profile};

type DrawResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Overrides the font used for chart text.
pub const FONT_ENV: &str = "ALT_PROFILE_FONT";

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Register the first loadable font as `sans-serif`. Returns false when no
/// font was found; charts then render without text.
pub fn ensure_font() -> bool {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    *REGISTERED.get_or_init(|| {
        register_first_font(font_candidates(std::env::var_os(FONT_ENV)))
    })
}

/// Font search order: the `ALT_PROFILE_FONT` override first, then the
/// well-known system paths.
fn font_candidates(from_env: Option<std::ffi::OsString>) -> Vec<PathBuf> {
    from_env
        .map(PathBuf::from)
        .into_iter()
        .chain(FONT_CANDIDATES.iter().map(PathBuf::from))
        .collect()
}

fn register_first_font(paths: impl IntoIterator<Item = PathBuf>) -> bool {
    for path in paths {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        // plotters keeps registered font data for the life of the process
        let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
        if register_font("sans-serif", FontStyle::Normal, bytes).is_ok() {
            return true;
        }
    }
    false
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartOptions {
    pub width: u32,
    pub height: u32,
    pub tick_step_m: f64,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series_label: String,
    pub title_3d: String,
    pub series_label_3d: String,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 600,
            tick_step_m: 100.0,
            title: "Altitude profile".to_string(),
            x_label: "Distance (km)".to_string(),
            y_label: "Altitude (m)".to_string(),
            series_label: "Topography".to_string(),
            title_3d: "Altitude Profile 3D Plot".to_string(),
            series_label_3d: "Altitude Profile".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    Png,
    Svg,
}

/// Render the filled altitude profile to `path`.
pub fn render_profile_chart(
    profile: &Profile,
    path: &Path,
    kind: ChartKind,
    opts: &ChartOptions,
) -> Result<(), ApError> {
    check_renderable(profile, opts)?;
    let size = (opts.width, opts.height);
    guarded(|| match kind {
        ChartKind::Png => {
            let root = FontSafeBackend::new(BitMapBackend::new(path, size)).into_drawing_area();
            draw_profile(root, profile, opts)
        }
        ChartKind::Svg => {
            let root = FontSafeBackend::new(SVGBackend::new(path, size)).into_drawing_area();
            draw_profile(root, profile, opts)
        }
    })
}

/// Render the filled altitude profile as an SVG document.
pub fn render_profile_svg(profile: &Profile, opts: &ChartOptions) -> Result<String, ApError> {
    check_renderable(profile, opts)?;
    let mut svg = String::new();
    guarded(|| {
        let root = FontSafeBackend::new(SVGBackend::with_string(
            &mut svg,
            (opts.width, opts.height),
        ))
        .into_drawing_area();
        draw_profile(root, profile, opts)
    })?;
    Ok(svg)
}

/// Render the 3D profile line in memory and encode it as PNG.
pub fn render_profile_3d_png(profile: &Profile, opts: &ChartOptions) -> Result<Vec<u8>, ApError> {
    check_renderable(profile, opts)?;
    let (width, height) = (opts.width, opts.height);
    let mut buf = vec![0u8; width as usize * height as usize * 3];
    guarded(|| {
        let root = FontSafeBackend::new(BitMapBackend::with_buffer(&mut buf, (width, height)))
            .into_drawing_area();
        draw_profile_3d(root, profile, opts)
    })?;

    let mut png = Vec::new();
    PngEncoder::new(&mut png)
        .write_image(&buf, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| ApError::Chart(e.to_string()))?;
    Ok(png)
}

fn check_renderable(profile: &Profile, opts: &ChartOptions) -> Result<(), ApError> {
    if opts.width == 0 || opts.height == 0 {
        return Err(ApError::InvalidParameter(format!(
            "chart size must be non-zero, got {}x{}",
            opts.width, opts.height
        )));
    }
    if !opts.tick_step_m.is_finite() || opts.tick_step_m <= 0.0 {
        return Err(ApError::InvalidParameter(format!(
            "tick step must be a positive number, got {}",
            opts.tick_step_m
        )));
    }
    if profile.points().is_empty() {
        return Err(ApError::InsufficientData);
    }
    ensure_font();
    Ok(())
}

fn guarded<F>(render: F) -> Result<(), ApError>
where
    F: FnOnce() -> DrawResult,
{
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| ApError::Chart("plotting backend panicked".to_string()))?
        .map_err(|e| ApError::Chart(e.to_string()))
}

fn padded_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    if (max - min).abs() < f64::EPSILON {
        return (min - 0.5, max + 0.5);
    }
    (min, max)
}

/// Y extent from zero (or the lowest point below it) to one tick above the
/// highest tick, plus the tick values to label.
fn altitude_axis(profile: &Profile, step: f64) -> (f64, f64, Vec<f64>) {
    let points = profile.points();
    let (alt_min, alt_max) = padded_range(points.iter().map(|p| p.1));
    let y_min = alt_min.min(0.0);
    let ticks = profile.altitude_ticks(step);
    match ticks.last() {
        Some(&last) => (y_min, last + step, ticks),
        None => {
            let y_max = alt_max + alt_max.abs() * 0.05 + 1.0;
            (y_min, y_max, vec![y_min, y_max])
        }
    }
}

fn draw_profile<DB>(
    root: DrawingArea<DB, Shift>,
    profile: &Profile,
    opts: &ChartOptions,
) -> DrawResult
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let points = profile.points();
    let (x_min, x_max) = padded_range(points.iter().map(|p| p.0));
    let (y_min, y_max, y_ticks) = altitude_axis(profile, opts.tick_step_m);

    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            opts.title.as_str(),
            FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal),
        )
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .build_cartesian_2d(x_min..x_max, (y_min..y_max).with_key_points(y_ticks))?;

    chart
        .configure_mesh()
        .x_desc(opts.x_label.as_str())
        .y_desc(opts.y_label.as_str())
        .x_label_formatter(&|v| format!("{:.1}", v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(FontDesc::new(
            FontFamily::SansSerif,
            16.0,
            FontStyle::Normal,
        ))
        .draw()?;

    chart.draw_series(AreaSeries::new(
        points.iter().copied(),
        0.0,
        RED.mix(0.5).filled(),
    ))?;

    chart
        .draw_series(LineSeries::new(
            points.iter().copied(),
            Color::stroke_width(&BLACK, 2),
        ))?
        .label(opts.series_label.as_str())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], &BLACK));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(
            FontFamily::SansSerif,
            16.0,
            FontStyle::Normal,
        ))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(())
}

fn draw_profile_3d<DB>(
    root: DrawingArea<DB, Shift>,
    profile: &Profile,
    opts: &ChartOptions,
) -> DrawResult
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let points = profile.points();
    let (x_min, x_max) = padded_range(points.iter().map(|p| p.0));
    let (y_min, y_max) = padded_range(points.iter().map(|p| p.1));

    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            opts.title_3d.as_str(),
            FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal),
        )
        .margin(20)
        .build_cartesian_3d(x_min..x_max, y_min..y_max, -1.0..1.0)?;

    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.35;
        pb.scale = 0.85;
        pb.into_matrix()
    });

    chart
        .configure_axes()
        .light_grid_style(&BLACK.mix(0.1))
        .max_light_lines(3)
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            points.iter().map(|&(d, a)| (d, a, 0.0)),
            Color::stroke_width(&RED, 2),
        ))?
        .label(opts.series_label_3d.as_str())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], &RED));

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK.mix(0.3))
        .draw()?;

    root.present()?;
    Ok(())
}

/// Passes drawing through to `inner`, but never lets text fail the chart:
/// font errors and panics from the text stack skip the label, and size
/// estimates fall back to a width proportional to the character count.
struct FontSafeBackend<DB> {
    inner: DB,
}

impl<DB> FontSafeBackend<DB> {
    fn new(inner: DB) -> Self {
        Self { inner }
    }
}

fn approx_text_size(text: &str, size: f64) -> (u32, u32) {
    let height = size.max(1.0);
    let width = text.chars().count() as f64 * height * 0.6;
    (width.ceil() as u32, height.ceil() as u32)
}

impl<DB: DrawingBackend> DrawingBackend for FontSafeBackend<DB> {
    type ErrorType = DB::ErrorType;

    fn get_size(&self) -> (u32, u32) {
        self.inner.get_size()
    }

    fn ensure_prepared(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.ensure_prepared()
    }

    fn present(&mut self) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.present()
    }

    fn draw_pixel(
        &mut self,
        point: BackendCoord,
        color: BackendColor,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_path(path, style)
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.fill_polygon(vert, style)
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.draw_circle(center, radius, style, fill)
    }

    fn blit_bitmap(
        &mut self,
        pos: BackendCoord,
        (iw, ih): (u32, u32),
        src: &[u8],
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        self.inner.blit_bitmap(pos, (iw, ih), src)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> Result<(), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.draw_text(text, style, pos)
        })) {
            Ok(Err(DrawingErrorKind::FontError(_))) | Err(_) => Ok(()),
            Ok(result) => result,
        }
    }

    fn estimate_text_size<TStyle: BackendTextStyle>(
        &self,
        text: &str,
        style: &TStyle,
    ) -> Result<(u32, u32), DrawingErrorKind<Self::ErrorType>> {
        match panic::catch_unwind(panic::AssertUnwindSafe(|| {
            self.inner.estimate_text_size(text, style)
        })) {
            Ok(Ok(size)) => Ok(size),
            _ => Ok(approx_text_size(text, style.size())),
        }
    }
}
