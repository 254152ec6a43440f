//! SVG Chart Generator for Training Reports
//!
//! Writes small standalone SVG files next to the trained model:
//! feature-importance bars, per-epoch training curves and a confusion-matrix
//! heatmap. Pure string building, no rendering dependency.

use std::fs;
use std::path::Path;

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 500.0;
const MARGIN_TOP: f64 = 60.0;
const MARGIN_RIGHT: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 80.0;
const MARGIN_LEFT: f64 = 170.0;

pub const COLOR_PRIMARY: &str = "#3498db";
pub const COLOR_SECONDARY: &str = "#2ecc71";
pub const COLOR_TERTIARY: &str = "#e74c3c";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

const FONT: &str = "Arial, sans-serif";

/// A data series for line charts
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    /// (x, y) points in draw order
    pub points: Vec<(f64, f64)>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: &str, color: &str, values: &[f64]) -> Self {
        Self {
            name: name.to_string(),
            points: values
                .iter()
                .enumerate()
                .map(|(i, &v)| ((i + 1) as f64, v))
                .collect(),
            color: color.to_string(),
        }
    }
}

/// Accumulates SVG elements and writes the document
struct Svg {
    body: String,
}

impl Svg {
    fn new(title: &str) -> Self {
        let mut body = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
            w = CHART_WIDTH,
            h = CHART_HEIGHT
        );
        body.push_str(&format!(
            r#"<rect width="{}" height="{}" fill="white"/>"#,
            CHART_WIDTH, CHART_HEIGHT
        ));
        let mut svg = Self { body };
        svg.text(CHART_WIDTH / 2.0, 35.0, "middle", 18, COLOR_TEXT, title, true);
        svg
    }

    #[allow(clippy::too_many_arguments)]
    fn text(&mut self, x: f64, y: f64, anchor: &str, size: u32, fill: &str, content: &str, bold: bool) {
        let weight = if bold { r#" font-weight="bold""# } else { "" };
        self.body.push_str(&format!(
            r#"<text x="{:.1}" y="{:.1}" text-anchor="{}" font-family="{}" font-size="{}"{} fill="{}">{}</text>"#,
            x,
            y,
            anchor,
            FONT,
            size,
            weight,
            fill,
            escape_xml(content)
        ));
    }

    fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, stroke: &str, width: f64) {
        self.body.push_str(&format!(
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="{}"/>"#,
            x1, y1, x2, y2, stroke, width
        ));
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str) {
        self.body.push_str(&format!(
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" rx="3"/>"#,
            x, y, w, h, fill
        ));
    }

    fn write(mut self, output_path: &Path) -> std::io::Result<()> {
        self.body.push_str("</svg>");
        fs::write(output_path, self.body)
    }
}

/// Horizontal bar chart of feature importances, largest first.
pub fn generate_importance_chart(
    title: &str,
    importances: &[(String, f64)],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let mut svg = Svg::new(title);
    if importances.is_empty() {
        return svg.write(output_path);
    }

    let x_max = importances
        .iter()
        .map(|(_, v)| *v)
        .fold(0.0f64, f64::max)
        .max(f64::EPSILON);
    let row = plot_height / importances.len() as f64;

    svg.line(MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, MARGIN_TOP + plot_height, COLOR_AXIS, 2.0);

    for (i, (name, value)) in importances.iter().enumerate() {
        let y = MARGIN_TOP + i as f64 * row;
        let width = (value / x_max) * (plot_width - 60.0);
        svg.rect(MARGIN_LEFT, y + row * 0.15, width, row * 0.7, COLOR_PRIMARY);
        svg.text(MARGIN_LEFT - 10.0, y + row * 0.5 + 4.0, "end", 12, COLOR_TEXT, name, false);
        svg.text(
            MARGIN_LEFT + width + 6.0,
            y + row * 0.5 + 4.0,
            "start",
            11,
            COLOR_TEXT,
            &format!("{:.3}", value),
            false,
        );
    }

    svg.write(output_path)
}

/// Line chart over epochs. The y range adapts to the data.
pub fn generate_line_chart(
    title: &str,
    x_label: &str,
    y_label: &str,
    series: &[DataSeries],
    output_path: &Path,
) -> std::io::Result<()> {
    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;

    let (x_min, x_max, y_min, y_max) = find_ranges(series);
    let y_min = y_min.min(0.0);
    let x_span = (x_max - x_min).max(1.0);
    let y_span = (y_max - y_min).max(f64::EPSILON);

    let to_x = |x: f64| MARGIN_LEFT + ((x - x_min) / x_span) * plot_width;
    let to_y = |y: f64| MARGIN_TOP + plot_height - ((y - y_min) / y_span) * plot_height;

    let mut svg = Svg::new(title);

    for i in 0..=5 {
        let value = y_min + (i as f64 / 5.0) * y_span;
        let y = to_y(value);
        svg.line(MARGIN_LEFT, y, MARGIN_LEFT + plot_width, y, COLOR_GRID, 1.0);
        svg.text(MARGIN_LEFT - 10.0, y + 4.0, "end", 12, COLOR_TEXT, &format!("{:.2}", value), false);
    }

    let bottom = MARGIN_TOP + plot_height;
    svg.line(MARGIN_LEFT, bottom, MARGIN_LEFT + plot_width, bottom, COLOR_AXIS, 2.0);
    svg.line(MARGIN_LEFT, MARGIN_TOP, MARGIN_LEFT, bottom, COLOR_AXIS, 2.0);
    svg.text(MARGIN_LEFT + plot_width / 2.0, CHART_HEIGHT - 20.0, "middle", 14, COLOR_TEXT, x_label, false);
    svg.text(MARGIN_LEFT - 60.0, MARGIN_TOP - 15.0, "middle", 14, COLOR_TEXT, y_label, false);

    for s in series.iter().filter(|s| !s.points.is_empty()) {
        let path: Vec<String> = s
            .points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{} {:.1} {:.1}", cmd, to_x(x), to_y(y))
            })
            .collect();
        svg.body.push_str(&format!(
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="3"/>"#,
            path.join(" "),
            s.color
        ));
    }

    // Legend
    let mut legend_y = MARGIN_TOP + 10.0;
    for s in series {
        svg.rect(CHART_WIDTH - MARGIN_RIGHT - 150.0, legend_y, 15.0, 15.0, &s.color);
        svg.text(CHART_WIDTH - MARGIN_RIGHT - 130.0, legend_y + 12.0, "start", 12, COLOR_TEXT, &s.name, false);
        legend_y += 25.0;
    }

    svg.write(output_path)
}

/// Heatmap of a square confusion matrix (rows = actual, cols = predicted)
pub fn generate_confusion_chart(
    title: &str,
    class_names: &[&str],
    rows: &[Vec<usize>],
    output_path: &Path,
) -> std::io::Result<()> {
    let n = rows.len().max(1);
    let side = (CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM).min(CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT);
    let cell = side / n as f64;
    let max = rows.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;

    let mut svg = Svg::new(title);

    for (r, row) in rows.iter().enumerate() {
        let y = MARGIN_TOP + r as f64 * cell;
        let name = class_names.get(r).copied().unwrap_or("?");
        svg.text(MARGIN_LEFT - 10.0, y + cell / 2.0 + 4.0, "end", 12, COLOR_TEXT, name, false);

        for (c, &count) in row.iter().enumerate() {
            let x = MARGIN_LEFT + c as f64 * cell;
            let opacity = 0.1 + 0.9 * count as f64 / max;
            svg.body.push_str(&format!(
                r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" fill-opacity="{:.2}" stroke="white"/>"#,
                x, y, cell, cell, COLOR_PRIMARY, opacity
            ));
            svg.text(x + cell / 2.0, y + cell / 2.0 + 6.0, "middle", 18, COLOR_TEXT, &count.to_string(), true);
        }
    }

    for c in 0..rows.len() {
        let name = class_names.get(c).copied().unwrap_or("?");
        let x = MARGIN_LEFT + c as f64 * cell + cell / 2.0;
        svg.text(x, MARGIN_TOP + side + 20.0, "middle", 12, COLOR_TEXT, name, false);
    }
    svg.text(MARGIN_LEFT + side / 2.0, CHART_HEIGHT - 20.0, "middle", 14, COLOR_TEXT, "Predicted", false);

    svg.write(output_path)
}

fn find_ranges(series: &[DataSeries]) -> (f64, f64, f64, f64) {
    let mut x_min = f64::INFINITY;
    let mut x_max = f64::NEG_INFINITY;
    let mut y_min = f64::INFINITY;
    let mut y_max = f64::NEG_INFINITY;

    for (x, y) in series.iter().flat_map(|s| s.points.iter().copied()) {
        x_min = x_min.min(x);
        x_max = x_max.max(x);
        y_min = y_min.min(y);
        y_max = y_max.max(y);
    }

    if x_min > x_max {
        return (0.0, 1.0, 0.0, 1.0);
    }
    (x_min, x_max, y_min, y_max)
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_importance_chart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("importance.svg");
        let data = vec![
            ("Paint Quality".to_string(), 0.4),
            ("Sculpt Details & Finish".to_string(), 0.1),
        ];

        generate_importance_chart("Feature Importance", &data, &path).unwrap();

        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("Sculpt Details &amp; Finish"));
    }

    #[test]
    fn test_line_chart_handles_single_point() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.svg");
        let series = vec![DataSeries::new("Val Acc", COLOR_SECONDARY, &[0.5])];

        generate_line_chart("History", "Epoch", "Value", &series, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(!svg.contains("NaN"));
    }

    #[test]
    fn test_confusion_chart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cm.svg");
        generate_confusion_chart(
            "Confusion",
            &["Counterfeit", "Authentic"],
            &[vec![3, 1], vec![0, 4]],
            &path,
        )
        .unwrap();
        assert!(path.exists());
    }
}
