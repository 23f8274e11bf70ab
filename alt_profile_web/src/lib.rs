use leptos::*;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const PREVIEW_ROWS: usize = 20;

use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{Blob, File, FileList, HtmlInputElement};

#[cfg(feature = "chart_plotly")]
use serde::Serialize;

use alt_profile::{
    aggregate_profile, build_workbook, data_url, load_input, write_profile_csv, ApError,
    InputFormat, Params, Profile, RawTable, SheetChart, WorkbookOptions, DEFAULT_EXPORT_NAME,
    DEFAULT_LINK_LABEL, XLSX_MIME,
};

#[derive(Clone)]
struct Upload {
    name: String,
    bytes: Vec<u8>,
}

async fn read_file(file: &File) -> Option<Upload> {
    let buf = JsFuture::from(file.array_buffer()).await.ok()?;
    let u8arr = js_sys::Uint8Array::new(&buf);
    let mut bytes = vec![0u8; u8arr.length() as usize];
    u8arr.copy_to(&mut bytes[..]);
    Some(Upload {
        name: file.name(),
        bytes,
    })
}

async fn read_first_file(list: &FileList) -> Option<Upload> {
    let file = list.item(0)?;
    read_file(&file).await
}

/// Everything the page shows for one upload.
#[derive(Clone)]
struct Computed {
    table: RawTable,
    profile: Profile,
    xlsx_href: String,
    csv: String,
}

fn compute(upload: &Upload, params: &Params) -> Result<Computed, ApError> {
    let format = InputFormat::Auto.resolve(&upload.name)?;
    let (table, samples) = load_input(&upload.bytes, format, params)?;
    let profile = aggregate_profile(&samples, params)?;
    // the browser build carries no plotters renderer
    let workbook = build_workbook(&profile, &SheetChart::Native, &WorkbookOptions::default())?;
    let mut csv = Vec::new();
    write_profile_csv(&profile, &mut csv)?;
    Ok(Computed {
        table,
        profile,
        xlsx_href: data_url(&workbook, XLSX_MIME),
        csv: String::from_utf8_lossy(&csv).into_owned(),
    })
}

fn profile_table_rows(profile: &Profile) -> Vec<Vec<String>> {
    let prec = profile.decimals as usize;
    profile
        .rows
        .iter()
        .map(|row| {
            vec![
                format!("{:.*}", prec, row.distance_km),
                row.altitude_m
                    .map(|v| format!("{:.*}", prec, v))
                    .unwrap_or_default(),
            ]
        })
        .collect()
}

/// Plotly traces and layout for the filled profile.
#[cfg_attr(not(feature = "chart_plotly"), allow(dead_code))]
fn profile_plot_config(profile: &Profile, tick_step: f64) -> (serde_json::Value, serde_json::Value) {
    let (x, y): (Vec<f64>, Vec<f64>) = profile.points().into_iter().unzip();
    let traces = serde_json::json!([
        {
            "type": "scatter",
            "mode": "lines",
            "x": x,
            "y": y,
            "fill": "tozeroy",
            "fillcolor": "rgba(255,0,0,0.5)",
            "line": {"width": 0, "color": "rgba(255,0,0,0.5)"},
            "hoverinfo": "skip",
            "showlegend": false
        },
        {
            "type": "scatter",
            "mode": "lines",
            "name": "Topography",
            "x": x,
            "y": y,
            "line": {"color": "black", "width": 2}
        }
    ]);
    let layout = serde_json::json!({
        "title": {"text": "Altitude profile"},
        "xaxis": {"title": {"text": "Distance (km)"}, "showgrid": true},
        "yaxis": {
            "title": {"text": "Altitude (m)"},
            "tick0": 0,
            "dtick": tick_step,
            "rangemode": "tozero",
            "showgrid": true
        },
        "showlegend": true,
        "margin": {"t": 50}
    });
    (traces, layout)
}

#[cfg(feature = "chart_plotly")]
fn to_js(value: &serde_json::Value) -> JsValue {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .unwrap_or(JsValue::UNDEFINED)
}

#[cfg(feature = "chart_plotly")]
fn plot_xy(div_id: &str, traces: &JsValue, layout: &JsValue) {
    if let Some(window) = web_sys::window() {
        if let Some(document) = window.document() {
            if let Some(div) = document.get_element_by_id(div_id) {
                let plotly = js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("Plotly"))
                    .unwrap_or(JsValue::UNDEFINED);
                if let Ok(func) = js_sys::Reflect::get(&plotly, &JsValue::from_str("react"))
                    .or_else(|_| js_sys::Reflect::get(&plotly, &JsValue::from_str("newPlot")))
                    .and_then(|v| v.dyn_into::<js_sys::Function>())
                {
                    let _ = func.call3(&JsValue::NULL, &JsValue::from(div), traces, layout);
                }
            }
        }
    }
}

#[cfg(feature = "chart_plotly")]
fn render_profile_plot(div_id: &str, profile: &Profile, tick_step: f64) {
    let (traces, layout) = profile_plot_config(profile, tick_step);
    plot_xy(div_id, &to_js(&traces), &to_js(&layout));
}

fn blob_url_from_str(s: &str) -> Option<String> {
    let arr = js_sys::Array::new();
    arr.push(&JsValue::from_str(s));
    let blob = Blob::new_with_str_sequence(&arr).ok()?;
    web_sys::Url::create_object_url_with_blob(&blob).ok()
}

fn table_view(headers: Vec<String>, rows: Vec<Vec<String>>) -> impl IntoView {
    view! {
        <table class="data">
            <thead>
                <tr>{headers.into_iter().map(|h| view! { <th>{h}</th> }).collect_view()}</tr>
            </thead>
            <tbody>
                {rows
                    .into_iter()
                    .map(|row| view! {
                        <tr>{row.into_iter().map(|c| view! { <td>{c}</td> }).collect_view()}</tr>
                    })
                    .collect_view()}
            </tbody>
        </table>
    }
}

#[component]
fn App() -> impl IntoView {
    let (upload, set_upload) = create_signal(None::<Upload>);
    let (interval_km, set_interval_km) = create_signal(Params::default().interval_km);
    let (status, set_status) = create_signal("Choose a CSV or GPX file.".to_string());
    let (computed, set_computed) = create_signal(None::<Computed>);
    let (csv_href, set_csv_href) = create_signal(String::new());

    let take_files = move |list: FileList| {
        spawn_local(async move {
            match read_first_file(&list).await {
                Some(file) => {
                    set_status.set(format!(
                        "{} ready ({} bytes). Click Compute.",
                        file.name,
                        file.bytes.len()
                    ));
                    set_upload.set(Some(file));
                }
                None => set_status.set("Could not read the selected file.".to_string()),
            }
        });
    };

    let on_file = move |ev: leptos::ev::Event| {
        if let Some(input) = ev
            .target()
            .and_then(|t| t.dyn_into::<HtmlInputElement>().ok())
        {
            if let Some(list) = input.files() {
                take_files(list);
            }
        }
    };

    #[cfg(feature = "chart_plotly")]
    create_effect(move |_| {
        computed.with(|c| {
            if let Some(c) = c {
                render_profile_plot("profile_plot", &c.profile, Params::default().tick_step_m);
            }
        });
    });

    let on_compute = move |_ev: leptos::ev::MouseEvent| {
        let params = Params {
            interval_km: interval_km.get_untracked(),
            ..Params::default()
        };
        let outcome = upload.with_untracked(|u| u.as_ref().map(|u| compute(u, &params)));
        match outcome {
            None => set_status.set("Select a file first.".to_string()),
            Some(Err(err)) => {
                set_computed.set(None);
                set_status.set(format!("Processing failed: {err}"));
            }
            Some(Ok(result)) => {
                let old = csv_href.get_untracked();
                if !old.is_empty() {
                    let _ = web_sys::Url::revoke_object_url(&old);
                }
                set_csv_href.set(blob_url_from_str(&result.csv).unwrap_or_default());
                set_status.set(format!(
                    "{} rows -> {} intervals of {} km.",
                    result.table.len(),
                    result.profile.len(),
                    params.interval_km
                ));
                set_computed.set(Some(result));
            }
        }
    };

    let loaded_view = move || {
        computed.with(|c| {
            c.as_ref().map(|c| {
                let rows = c.table.rows.iter().take(PREVIEW_ROWS).cloned().collect();
                table_view(c.table.headers.clone(), rows)
            })
        })
    };
    let converted_view = move || {
        computed.with(|c| {
            c.as_ref().map(|c| {
                let headers = vec!["Distance_km".to_string(), "Altitude_m".to_string()];
                table_view(headers, profile_table_rows(&c.profile))
            })
        })
    };
    let xlsx_href = move || {
        computed.with(|c| c.as_ref().map(|c| c.xlsx_href.clone()).unwrap_or_default())
    };
    let xlsx_name = format!("{DEFAULT_EXPORT_NAME}.xlsx");
    let csv_name = format!("{DEFAULT_EXPORT_NAME}.csv");

    view! {
        <main class="tufte" on:dragover=move |e| { e.prevent_default(); } on:drop=move |e: leptos::ev::DragEvent| {
            e.prevent_default();
            if let Some(list) = e.data_transfer().and_then(|dt| dt.files()) {
                take_files(list);
            }
        }>
            <header>
                <h1>"Altitude profile"</h1>
                <p class="subtitle">"Upload a CSV (Distance, Altitude) or GPX track to average its altitude per interval."</p>
                <p class="note">{"Web version "}{APP_VERSION}</p>
            </header>
            <section class="controls">
                <label class="dropzone">
                    <span>"Drag & drop or click to choose a file"</span>
                    <input id="file_input" type="file" accept=".csv,.gpx" on:change=on_file />
                </label>
                <div class="control-row">
                    <label>"Interval (km): "<input type="number" min="0.01" step="0.1" value=move || interval_km.get().to_string()
                        on:change=move |ev| {
                            if let Some(t) = ev.target() { if let Ok(inp) = t.dyn_into::<HtmlInputElement>() {
                                if let Ok(v) = inp.value().parse::<f64>() { if v.is_finite() && v > 0.0 { set_interval_km.set(v); } }
                            }}
                        }/></label>
                </div>
                <button class="btn" on:click=on_compute>"Compute"</button>
                <span class="note">{move || status.get()}</span>
            </section>
            <section class="files">
                <h3>"Loaded data"</h3>
                {loaded_view}
                <h3>"Converted data"</h3>
                {converted_view}
            </section>
            <section class="plots">
                <div id="profile_plot" class="plot"></div>
            </section>
            <section class="downloads">
                <a id="dl_xlsx" href=xlsx_href download=xlsx_name style=move || if xlsx_href().is_empty() {"display:none;".to_string()} else {"display:inline;".to_string()}>{DEFAULT_LINK_LABEL}</a>
                <a id="dl_csv" href=move || csv_href.get() download=csv_name style=move || if csv_href.get().is_empty() {"display:none;".to_string()} else {"display:inline;".to_string()}>"Download CSV"</a>
            </section>
            <section class="files">
                <p class="note">"Nothing leaves your device. All processing happens locally in your browser."</p>
            </section>
        </main>
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    leptos::mount_to_body(|| view! { <App/> });
}
