//! XLSX export of an aggregated profile and browser download links.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rust_xlsxwriter::{Chart, ChartType, Format, Image, Workbook};
use serde::{Deserialize, Serialize};

use crate::{ApError, Profile};

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const DEFAULT_EXPORT_NAME: &str = "profil_altimetry";
pub const DEFAULT_LINK_LABEL: &str = "Télécharger le fichier Excel";

/// How the chart sheet is populated.
#[derive(Clone, Debug)]
pub enum SheetChart {
    /// Pre-rendered PNG inserted at A1.
    Image(Vec<u8>),
    /// Excel scatter chart referencing the data sheet.
    Native,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbookOptions {
    pub data_sheet: String,
    pub chart_sheet: String,
    pub chart_title: String,
    pub series_name: String,
    pub x_label: String,
    pub y_label: String,
}

impl Default for WorkbookOptions {
    fn default() -> Self {
        Self {
            data_sheet: "Data".to_string(),
            chart_sheet: "3D Plot".to_string(),
            chart_title: "Altitude Profile 3D Plot".to_string(),
            series_name: "Altitude Profile".to_string(),
            x_label: "Distance (km)".to_string(),
            y_label: "Altitude (m)".to_string(),
        }
    }
}

/// Build the workbook: a `Distance_km`/`Altitude_m` data sheet followed by a
/// chart sheet. Returns the XLSX bytes.
pub fn build_workbook(
    profile: &Profile,
    chart: &SheetChart,
    opts: &WorkbookOptions,
) -> Result<Vec<u8>, ApError> {
    if profile.is_empty() {
        return Err(ApError::InsufficientData);
    }
    if opts.data_sheet == opts.chart_sheet {
        return Err(ApError::InvalidParameter(format!(
            "data and chart sheets share the name '{}'",
            opts.data_sheet
        )));
    }

    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let data = workbook.add_worksheet();
    data.set_name(opts.data_sheet.as_str())?;
    data.write_string_with_format(0, 0, "Distance_km", &header)?;
    data.write_string_with_format(0, 1, "Altitude_m", &header)?;
    data.set_column_width(0, 14)?;
    data.set_column_width(1, 14)?;
    for (idx, row) in profile.rows.iter().enumerate() {
        let r = idx as u32 + 1;
        data.write_number(r, 0, row.distance_km)?;
        if let Some(alt) = row.altitude_m {
            data.write_number(r, 1, alt)?;
        }
    }
    let last_row = profile.rows.len() as u32;

    let sheet = workbook.add_worksheet();
    sheet.set_name(opts.chart_sheet.as_str())?;
    match chart {
        SheetChart::Image(png) => {
            let image = Image::new_from_buffer(png)?;
            sheet.insert_image(0, 0, &image)?;
        }
        SheetChart::Native => {
            let mut native = Chart::new(ChartType::ScatterStraight);
            native
                .add_series()
                .set_categories((opts.data_sheet.as_str(), 1, 0, last_row, 0))
                .set_values((opts.data_sheet.as_str(), 1, 1, last_row, 1))
                .set_name(opts.series_name.as_str());
            native.title().set_name(opts.chart_title.as_str());
            native.x_axis().set_name(opts.x_label.as_str());
            native.y_axis().set_name(opts.y_label.as_str());
            sheet.insert_chart(0, 0, &native)?;
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// `data:` URL carrying `bytes` as standard base64.
pub fn data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// HTML anchor that downloads `bytes` as an XLSX file named `filename`.
pub fn download_link(bytes: &[u8], filename: &str, label: &str) -> String {
    format!(
        "<a href=\"{}\" download=\"{}\">{}</a>",
        data_url(bytes, XLSX_MIME),
        escape_html(filename),
        escape_html(label)
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
