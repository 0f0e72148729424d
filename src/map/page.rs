//! Leaflet page assembly.
//!
//! The maps are self-contained HTML documents: Leaflet and its plugins
//! come from a CDN, data is inlined as JSON literals, nothing needs a
//! server. Pages stay valid with zero markers; an empty run still
//! publishes a base map.

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;

/// Map center used when no entity carries coordinates.
pub const DEFAULT_CENTER: (f64, f64) = (43.6119, 3.8772);

pub const DEFAULT_ZOOM: u8 = 13;

/// One marker with its pre-rendered popup HTML, inlined as JSON.
#[derive(Debug, Serialize)]
pub struct Marker {
    pub lat: f64,
    pub lon: f64,
    pub popup: String,
}

/// Escapes text interpolated into popup HTML.
pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Emits one clustered marker layer and registers it under `js_var`.
pub fn marker_layer_js(js_var: &str, markers: &[Marker]) -> Result<String> {
    let data = serde_json::to_string(markers)?;
    let mut js = String::new();
    writeln!(js, "const {js_var}Data = {data};")?;
    writeln!(js, "const {js_var} = L.markerClusterGroup();")?;
    writeln!(
        js,
        "for (const m of {js_var}Data) {{ L.marker([m.lat, m.lon]).bindPopup(m.popup, {{maxWidth: 420}}).addTo({js_var}); }}"
    )?;
    writeln!(js, "{js_var}.addTo(map);")?;
    Ok(js)
}

/// Emits the occupancy heat layer from `[lat, lon, weight]` triples.
pub fn heat_layer_js(js_var: &str, points: &[[f64; 3]]) -> Result<String> {
    let data = serde_json::to_string(points)?;
    let mut js = String::new();
    writeln!(
        js,
        "const {js_var} = L.heatLayer({data}, {{radius: 25, blur: 18, maxZoom: 17}});"
    )?;
    writeln!(js, "{js_var}.addTo(map);")?;
    Ok(js)
}

/// Emits the relay layer: one line per selected pair, endpoints popup.
pub fn relay_layer_js(js_var: &str, pairs_json: &str) -> Result<String> {
    let mut js = String::new();
    writeln!(js, "const {js_var}Data = {pairs_json};")?;
    writeln!(js, "const {js_var} = L.layerGroup();")?;
    writeln!(
        js,
        "for (const r of {js_var}Data) {{\n  \
           L.polyline([[r.car_park_lat, r.car_park_lon], [r.station_lat, r.station_lon]], {{color: '#7b1fa2', weight: 3}})\n    \
             .bindPopup(r.popup)\n    \
             .addTo({js_var});\n\
         }}"
    )?;
    writeln!(js, "{js_var}.addTo(map);")?;
    Ok(js)
}

/// Emits the layer control from `(display name, js var)` pairs.
pub fn layer_control_js(layers: &[(&str, &str)]) -> Result<String> {
    let mut entries = String::new();
    for (label, var) in layers {
        let label = serde_json::to_string(label)?;
        write!(entries, "{label}: {var}, ")?;
    }
    Ok(format!(
        "L.control.layers(null, {{{entries}}}, {{collapsed: false}}).addTo(map);\n"
    ))
}

/// Wraps layer JS into a complete standalone page.
pub fn render_page(title: &str, center: (f64, f64), zoom: u8, layers_js: &str) -> String {
    let title = html_escape(title);
    let (lat, lon) = center;
    let mut html = String::new();

    // writeln! into a String cannot fail.
    let _ = writeln!(html, "<!DOCTYPE html>");
    let _ = writeln!(html, "<html lang=\"en\">");
    let _ = writeln!(html, "<head>");
    let _ = writeln!(html, "<meta charset=\"utf-8\">");
    let _ = writeln!(
        html,
        "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">"
    );
    let _ = writeln!(html, "<title>{title}</title>");
    let _ = writeln!(
        html,
        "<link rel=\"stylesheet\" href=\"https://unpkg.com/leaflet@1.9.4/dist/leaflet.css\">"
    );
    let _ = writeln!(
        html,
        "<script src=\"https://unpkg.com/leaflet@1.9.4/dist/leaflet.js\"></script>"
    );
    let _ = writeln!(
        html,
        "<link rel=\"stylesheet\" href=\"https://unpkg.com/leaflet.markercluster@1.5.3/dist/MarkerCluster.css\">"
    );
    let _ = writeln!(
        html,
        "<link rel=\"stylesheet\" href=\"https://unpkg.com/leaflet.markercluster@1.5.3/dist/MarkerCluster.Default.css\">"
    );
    let _ = writeln!(
        html,
        "<script src=\"https://unpkg.com/leaflet.markercluster@1.5.3/dist/leaflet.markercluster.js\"></script>"
    );
    let _ = writeln!(
        html,
        "<script src=\"https://unpkg.com/leaflet.heat@0.2.0/dist/leaflet-heat.js\"></script>"
    );
    let _ = writeln!(
        html,
        "<style>html, body, #map {{ height: 100%; margin: 0; }}</style>"
    );
    let _ = writeln!(html, "</head>");
    let _ = writeln!(html, "<body>");
    let _ = writeln!(html, "<div id=\"map\"></div>");
    let _ = writeln!(html, "<script>");
    let _ = writeln!(html, "const map = L.map(\"map\").setView([{lat}, {lon}], {zoom});");
    let _ = writeln!(
        html,
        "L.tileLayer(\"https://tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png\", {{ maxZoom: 19, attribution: \"&copy; OpenStreetMap contributors\" }}).addTo(map);"
    );
    let _ = write!(html, "{layers_js}");
    let _ = writeln!(html, "</script>");
    let _ = writeln!(html, "</body>");
    let _ = writeln!(html, "</html>");
    html
}
