//! Visualization utilities for capacitated PDP tours.
//!
//! Generates SVG drawings of tours and load profiles, and text exports for
//! external plotting.

use crate::instance::{Coord, PdpInstance};
use crate::solution::Solution;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
#[cfg(feature = "resvg")]
use resvg::render;
#[cfg(feature = "resvg")]
use resvg::tiny_skia::{Pixmap, Transform};
#[cfg(feature = "resvg")]
use resvg::usvg;
#[cfg(feature = "resvg")]
use resvg::usvg::TreeParsing;
#[cfg(feature = "resvg")]
use resvg::FitTo;

/// SVG visualization generator
pub struct Visualizer {
    /// Canvas width
    pub width: f64,
    /// Canvas height
    pub height: f64,
    /// Margin
    pub margin: f64,
    /// Node radius
    pub node_radius: f64,
    /// Height of the load profile chart
    pub profile_height: f64,
}

impl Default for Visualizer {
    fn default() -> Self {
        Visualizer {
            width: 800.0,
            height: 800.0,
            margin: 50.0,
            node_radius: 8.0,
            profile_height: 300.0,
        }
    }
}

impl Visualizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate SVG visualization of a solution
    pub fn generate_svg(&self, instance: &PdpInstance, solution: &Solution) -> String {
        let mut svg = String::new();
        let coords = instance.coordinates();
        let k = instance.num_pairs();

        let (min_x, max_x, min_y, max_y) = self.get_bounds(instance);
        let scale_x = (self.width - 2.0 * self.margin) / (max_x - min_x).max(1e-9);
        let scale_y = (self.height - 2.0 * self.margin) / (max_y - min_y).max(1e-9);
        let scale = scale_x.min(scale_y);

        svg.push_str(&format!(
            r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">
<style>
    .depot {{ fill: #e74c3c; stroke: #c0392b; stroke-width: 2; }}
    .pickup {{ fill: #2ecc71; stroke: #27ae60; stroke-width: 2; }}
    .delivery {{ fill: #f39c12; stroke: #d68910; stroke-width: 2; }}
    .edge {{ stroke: #34495e; stroke-width: 2; fill: none; }}
    .pair {{ stroke: #95a5a6; stroke-width: 1; stroke-dasharray: 4,4; }}
    .label {{ font-family: Arial; font-size: 10px; fill: #2c3e50; }}
    .title {{ font-family: Arial; font-size: 14px; fill: #2c3e50; font-weight: bold; }}
</style>
<defs>
<marker id="arrow" markerWidth="10" markerHeight="10" refX="9" refY="3" orient="auto" markerUnits="strokeWidth">
<path d="M0,0 L0,6 L9,3 z" fill="#34495e"/>
</marker>
</defs>
<rect width="100%" height="100%" fill="#ecf0f1"/>
"##,
            self.width, self.height, self.width, self.height
        ));

        svg.push_str(&format!(
            r##"<text x="{}" y="25" class="title">{} | Pairs: {} | Cost: {:.4} | Feasible: {}</text>
"##,
            self.margin, solution.algorithm, k, solution.cost, solution.feasible
        ));

        let transform = |c: &Coord| -> (f64, f64) {
            let tx = self.margin + (c[0] - min_x) * scale;
            let ty = self.height - self.margin - (c[1] - min_y) * scale;
            (tx, ty)
        };

        for pickup in 1..=k {
            let (x1, y1) = transform(&coords[pickup]);
            let (x2, y2) = transform(&coords[pickup + k]);
            svg.push_str(&format!(
                r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" class="pair"/>
"#,
                x1, y1, x2, y2
            ));
        }

        let drawable = solution.tour.len() > 1 && solution.tour.iter().all(|&n| n < coords.len());
        if drawable {
            for i in 0..solution.tour.len() {
                let from = solution.tour[i];
                let to = solution.tour[(i + 1) % solution.tour.len()];
                let (x1, y1) = transform(&coords[from]);
                let (x2, y2) = transform(&coords[to]);

                svg.push_str(&format!(
                    r#"<line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" class="edge" marker-end="url(#arrow)"/>
"#,
                    x1, y1, x2, y2
                ));
            }
        }

        for (node, coord) in coords.iter().enumerate() {
            let (x, y) = transform(coord);
            let class = if node == 0 {
                "depot"
            } else if instance.is_pickup(node) {
                "pickup"
            } else {
                "delivery"
            };

            svg.push_str(&format!(
                r##"<circle cx="{:.2}" cy="{:.2}" r="{}" class="{}"/>
"##,
                x, y, self.node_radius, class
            ));
            svg.push_str(&format!(
                r##"<text x="{:.2}" y="{:.2}" class="label" text-anchor="middle">{}</text>
"##,
                x,
                y - self.node_radius - 3.0,
                node
            ));
        }

        let legend_y = self.height - 30.0;
        svg.push_str(&format!(
            r##"
<rect x="{}" y="{}" width="15" height="15" class="depot"/>
<text x="{}" y="{}" class="label">Depot</text>
<rect x="{}" y="{}" width="15" height="15" class="pickup"/>
<text x="{}" y="{}" class="label">Pickup</text>
<rect x="{}" y="{}" width="15" height="15" class="delivery"/>
<text x="{}" y="{}" class="label">Delivery</text>
"##,
            self.margin,
            legend_y,
            self.margin + 20.0,
            legend_y + 12.0,
            self.margin + 80.0,
            legend_y,
            self.margin + 100.0,
            legend_y + 12.0,
            self.margin + 160.0,
            legend_y,
            self.margin + 180.0,
            legend_y + 12.0
        ));

        svg.push_str("</svg>");
        svg
    }

    /// Generate load profile SVG with the vehicle capacity as a dashed line
    pub fn generate_load_profile_svg(&self, instance: &PdpInstance, solution: &Solution, capacity: f64) -> String {
        let load_profile = solution.load_profile(instance);
        let mut svg = String::new();

        let width = self.width;
        let height = self.profile_height;
        let margin = self.margin;

        svg.push_str(&format!(
            r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">
<style>
    .line {{ stroke: #3498db; stroke-width: 2; fill: none; }}
    .capacity {{ stroke: #e74c3c; stroke-width: 1; stroke-dasharray: 5,5; }}
    .axis {{ stroke: #2c3e50; stroke-width: 1; }}
    .label {{ font-family: Arial; font-size: 12px; fill: #2c3e50; }}
    .title {{ font-family: Arial; font-size: 14px; fill: #2c3e50; font-weight: bold; }}
</style>
<rect width="100%" height="100%" fill="#ecf0f1"/>
"##,
            width, height, width, height
        ));

        svg.push_str(&format!(
            r#"<text x="{}" y="25" class="title">Load Profile - Capacity: {}</text>
"#,
            margin, capacity
        ));

        let plot_width = width - 2.0 * margin;
        let plot_height = height - 2.0 * margin;
        let x_scale = plot_width / (load_profile.len().max(2) - 1) as f64;
        let y_max = load_profile.iter().cloned().fold(capacity, f64::max).max(1e-9);
        let y_scale = plot_height / y_max;
        let y_base = height - margin;

        svg.push_str(&format!(
            r##"<line x1="{}" y1="{}" x2="{}" y2="{}" class="axis"/>
<line x1="{}" y1="{}" x2="{}" y2="{}" class="axis"/>
"##,
            margin,
            y_base,
            width - margin,
            y_base,
            margin,
            margin,
            margin,
            y_base
        ));

        let cap_y = y_base - capacity * y_scale;
        svg.push_str(&format!(
            r##"<line x1="{}" y1="{:.2}" x2="{}" y2="{:.2}" class="capacity"/>
<text x="{}" y="{:.2}" class="label">{}</text>
"##,
            margin,
            cap_y,
            width - margin,
            cap_y,
            width - margin + 5.0,
            cap_y + 5.0,
            capacity
        ));

        let points: Vec<(f64, f64, f64)> = load_profile
            .iter()
            .enumerate()
            .map(|(i, &load)| (margin + i as f64 * x_scale, y_base - load * y_scale, load))
            .collect();

        let mut path = String::new();
        for (i, &(x, y, _)) in points.iter().enumerate() {
            if i == 0 {
                path.push_str(&format!("M {:.2} {:.2}", x, y));
            } else {
                path.push_str(&format!(" L {:.2} {:.2}", x, y));
            }
        }
        svg.push_str(&format!(
            r##"<path d="{}" class="line"/>
"##,
            path
        ));

        for &(x, y, load) in &points {
            let color = if load > capacity { "#e74c3c" } else { "#3498db" };
            svg.push_str(&format!(
                r##"<circle cx="{:.2}" cy="{:.2}" r="4" fill="{}"/>
"##,
                x, y, color
            ));
        }

        svg.push_str("</svg>");
        svg
    }

    /// Save SVG to file
    pub fn save_svg<P: AsRef<Path>>(&self, svg: &str, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(svg.as_bytes())?;
        Ok(())
    }

    /// Save SVG as PNG.
    ///
    /// Uses the built-in renderer when the `resvg` feature is enabled, then
    /// falls back to `rsvg-convert`, `magick convert` and `inkscape`.
    pub fn save_png<P: AsRef<Path>>(&self, svg: &str, path: P) -> io::Result<()> {
        let path = path.as_ref();

        #[cfg(feature = "resvg")]
        {
            match render_png(svg, path, self.width as u32, self.height as u32) {
                Ok(()) => return Ok(()),
                Err(e) => log::warn!("resvg could not render {}: {}", path.display(), e),
            }
        }

        convert_with_external_tool(svg, path)
    }

    /// Get coordinate bounds
    fn get_bounds(&self, instance: &PdpInstance) -> (f64, f64, f64, f64) {
        let mut min_x = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for c in instance.coordinates() {
            min_x = min_x.min(c[0]);
            max_x = max_x.max(c[0]);
            min_y = min_y.min(c[1]);
            max_y = max_y.max(c[1]);
        }

        (min_x, max_x, min_y, max_y)
    }

    /// Export data for external plotting (e.g., matplotlib)
    pub fn export_plot_data(&self, instance: &PdpInstance, solution: &Solution) -> String {
        let mut data = String::new();

        data.push_str("# Capacitated PDP Solution Data\n");
        data.push_str(&format!("# Algorithm: {}\n", solution.algorithm));
        data.push_str(&format!("# Cost: {:.6}\n", solution.cost));
        data.push_str(&format!("# Feasible: {}\n\n", solution.feasible));

        data.push_str("# Nodes: id, x, y, demand\n");
        for (node, c) in instance.coordinates().iter().enumerate() {
            data.push_str(&format!("{},{},{},{}\n", node, c[0], c[1], instance.node_demand(node)));
        }

        data.push_str("\n# Tour: sequence of node ids\n");
        let tour_str: Vec<String> = solution.tour.iter().map(|n| n.to_string()).collect();
        data.push_str(&tour_str.join(","));
        data.push('\n');

        data.push_str("\n# Load profile\n");
        let profile_str: Vec<String> = solution.load_profile(instance).iter().map(|l| l.to_string()).collect();
        data.push_str(&profile_str.join(","));
        data.push('\n');

        data
    }
}

fn io_error(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}

/// Canvas size from the `width`/`height` attributes of the root element
#[cfg(feature = "resvg")]
fn svg_dimension(svg: &str, attr: &str) -> Option<u32> {
    let (_, rest) = svg.split_once(&format!("{}=\"", attr))?;
    let (value, _) = rest.split_once('"')?;
    value.parse::<f64>().ok().map(|v| v as u32)
}

#[cfg(feature = "resvg")]
fn render_png(svg: &str, path: &Path, default_width: u32, default_height: u32) -> io::Result<()> {
    let opt = usvg::Options::default();
    let rtree = usvg::Tree::from_str(svg, &opt).map_err(|e| io_error(format!("usvg parse error: {}", e)))?;

    let w = svg_dimension(svg, "width").unwrap_or(default_width);
    let h = svg_dimension(svg, "height").unwrap_or(default_height);
    let mut pixmap = Pixmap::new(w.max(1), h.max(1)).ok_or_else(|| io_error("Failed to create pixmap".to_string()))?;
    render(&rtree, FitTo::Original, Transform::default(), pixmap.as_mut())
        .ok_or_else(|| io_error("resvg render failed".to_string()))?;
    pixmap.save_png(path).map_err(|e| io_error(format!("save_png failed: {}", e)))
}

fn convert_with_external_tool(svg: &str, path: &Path) -> io::Result<()> {
    let tmp_svg = path.with_extension("svg.tmp");
    std::fs::write(&tmp_svg, svg)?;

    let out = path.to_string_lossy().to_string();
    let src = tmp_svg.to_string_lossy().to_string();
    let attempts: [(&str, Vec<&str>); 3] = [
        ("rsvg-convert", vec!["-o", out.as_str(), src.as_str()]),
        ("magick", vec!["convert", src.as_str(), out.as_str()]),
        ("inkscape", vec![src.as_str(), "--export-type=png", "--export-filename", out.as_str()]),
    ];

    for (program, args) in &attempts {
        if let Ok(status) = Command::new(program).args(args).status() {
            if status.success() {
                let _ = std::fs::remove_file(&tmp_svg);
                return Ok(());
            }
        }
        log::debug!("{} could not convert {}", program, src);
    }

    let _ = std::fs::remove_file(&tmp_svg);
    Err(io_error(
        "No SVG->PNG converter succeeded (tried resvg, rsvg-convert, magick, inkscape)".to_string(),
    ))
}
