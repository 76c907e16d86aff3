//! Confusion matrix heatmaps for the terminal and as SVG

use std::path::{Path, PathBuf};

use colored::Colorize;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use tracing::info;

use crate::error::{KolosalError, Result};
use crate::evaluation::ConfusionMatrix;

/// Matplotlib `Blues` anchor colours, light to dark
const BLUES: [(u8, u8, u8); 9] = [
    (247, 251, 255),
    (222, 235, 247),
    (198, 219, 239),
    (158, 202, 225),
    (107, 174, 214),
    (66, 146, 198),
    (33, 113, 181),
    (8, 81, 156),
    (8, 48, 107),
];

/// Colour of `t` in `[0, 1]` on the Blues map
pub fn blues(t: f64) -> (u8, u8, u8) {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (BLUES.len() - 1) as f64;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(BLUES.len() - 1);
    let frac = scaled - lo as f64;

    let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    let (a, b) = (BLUES[lo], BLUES[hi]);
    (mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

const SVG_WIDTH: u32 = 640;
const SVG_HEIGHT: u32 = 600;
const LEFT: i32 = 170;
const TOP: i32 = 70;
const CELL: i32 = 180;

/// Labelled heatmap of a 2x2 confusion matrix
#[derive(Debug, Clone)]
pub struct ConfusionPlot {
    title: String,
    class_names: [String; 2],
    normalize: bool,
}

impl ConfusionPlot {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            class_names: ["Non Churn".to_string(), "Churn".to_string()],
            normalize: false,
        }
    }

    /// Tick labels for classes 0 and 1
    pub fn with_class_names(mut self, negative: impl Into<String>, positive: impl Into<String>) -> Self {
        self.class_names = [negative.into(), positive.into()];
        self
    }

    /// Show row-normalized proportions instead of counts
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Values drawn in the cells
    pub fn cell_values(&self, cm: &ConfusionMatrix) -> [[f64; 2]; 2] {
        if self.normalize {
            cm.normalized()
        } else {
            let c = cm.counts();
            [[c[0][0] as f64, c[0][1] as f64], [c[1][0] as f64, c[1][1] as f64]]
        }
    }

    /// Cell text: two decimals when normalized, integer counts otherwise
    pub fn cell_label(&self, value: f64) -> String {
        if self.normalize {
            format!("{:.2}", value)
        } else {
            format!("{}", value as u64)
        }
    }

    /// Cells strictly above half the maximum get red text
    pub fn is_highlighted(values: &[[f64; 2]; 2], i: usize, j: usize) -> bool {
        let max = values.iter().flatten().cloned().fold(0.0_f64, f64::max);
        values[i][j] > max / 2.0
    }

    /// Terminal heatmap
    pub fn render_text(&self, cm: &ConfusionMatrix) -> String {
        let values = self.cell_values(cm);
        let max = values.iter().flatten().cloned().fold(0.0_f64, f64::max);
        let name_width = self.class_names.iter().map(|n| n.len()).max().unwrap_or(0).max(10);
        let cell_width = 12;

        let mut out = String::new();
        out.push_str(&format!("{}\n", self.title.bold()));
        out.push_str(&format!("{:>w$}   Predicted label\n", "", w = name_width));
        out.push_str(&format!("{:>w$} ", "True label", w = name_width));
        for name in &self.class_names {
            out.push_str(&format!("{}", format!("{:^cw$}", name, cw = cell_width).blue()));
        }
        out.push('\n');

        for (i, row) in values.iter().enumerate() {
            out.push_str(&format!("{} ", format!("{:>w$}", self.class_names[i], w = name_width).blue()));
            for (j, &v) in row.iter().enumerate() {
                let (r, g, b) = blues(if max > 0.0 { v / max } else { 0.0 });
                let text = format!("{:^cw$}", self.cell_label(v), cw = cell_width);
                let text = if Self::is_highlighted(&values, i, j) {
                    text.red().bold()
                } else {
                    text.black()
                };
                out.push_str(&format!("{}", text.on_truecolor(r, g, b)));
            }
            out.push('\n');
        }
        out
    }

    /// Print the raw matrix, its `tn, fp, fn, tp` decomposition and the heatmap
    pub fn print(&self, cm: &ConfusionMatrix) {
        let (tn, fp, fn_, tp) = cm.ravel();
        println!("{}", cm);
        println!("(tn, fp, fn, tp) = ({}, {}, {}, {})", tn, fp, fn_, tp);
        println!();
        print!("{}", self.render_text(cm));
    }

    /// Draw the heatmap as an SVG document
    pub fn render_svg(&self, cm: &ConfusionMatrix) -> Result<String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, (SVG_WIDTH, SVG_HEIGHT)).into_drawing_area();
            self.draw(&root, cm).map_err(|e| KolosalError::RenderError(e.to_string()))?;
            root.present().map_err(|e| KolosalError::RenderError(e.to_string()))?;
        }
        Ok(svg)
    }

    /// Write the SVG to `path`, creating parent directories
    pub fn save_svg(&self, cm: &ConfusionMatrix, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.render_svg(cm)?)?;
        info!(path = %path.display(), title = %self.title, "wrote confusion matrix");
        Ok(path.to_path_buf())
    }

    fn draw<DB: DrawingBackend>(
        &self,
        root: &DrawingArea<DB, plotters::coord::Shift>,
        cm: &ConfusionMatrix,
    ) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
        root.fill(&WHITE)?;

        let centered = Pos::new(HPos::Center, VPos::Center);
        let title_style = ("sans-serif", 24).into_font().color(&BLACK).pos(centered);
        root.draw_text(&self.title, &title_style, (LEFT + CELL, TOP / 2))?;

        let values = self.cell_values(cm);
        let max = values.iter().flatten().cloned().fold(0.0_f64, f64::max);

        for (i, row) in values.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                let x0 = LEFT + j as i32 * CELL;
                let y0 = TOP + i as i32 * CELL;
                let (r, g, b) = blues(if max > 0.0 { v / max } else { 0.0 });
                root.draw(&Rectangle::new([(x0, y0), (x0 + CELL, y0 + CELL)], RGBColor(r, g, b).filled()))?;

                let text_color = if Self::is_highlighted(&values, i, j) { RED } else { BLACK };
                let style = ("sans-serif", 26).into_font().color(&text_color).pos(centered);
                root.draw_text(&self.cell_label(v), &style, (x0 + CELL / 2, y0 + CELL / 2))?;
            }
        }
        root.draw(&Rectangle::new(
            [(LEFT, TOP), (LEFT + 2 * CELL, TOP + 2 * CELL)],
            BLACK.stroke_width(1),
        ))?;

        let tick_style = ("sans-serif", 16).into_font().color(&BLUE);
        for (k, name) in self.class_names.iter().enumerate() {
            let centre = k as i32 * CELL + CELL / 2;
            root.draw_text(
                name,
                &tick_style.pos(Pos::new(HPos::Right, VPos::Center)),
                (LEFT - 10, TOP + centre),
            )?;
            root.draw_text(
                name,
                &("sans-serif", 16)
                    .into_font()
                    .transform(FontTransform::Rotate270)
                    .color(&BLUE)
                    .pos(Pos::new(HPos::Right, VPos::Center)),
                (LEFT + centre, TOP + 2 * CELL + 10),
            )?;
        }

        let axis_style = ("sans-serif", 18).into_font().color(&BLACK).pos(centered);
        root.draw_text("Predicted label", &axis_style, (LEFT + CELL, TOP + 2 * CELL + 110))?;
        root.draw_text(
            "True label",
            &("sans-serif", 18)
                .into_font()
                .transform(FontTransform::Rotate270)
                .color(&BLACK)
                .pos(centered),
            (30, TOP + CELL),
        )?;

        // Colour bar
        let bar_x = LEFT + 2 * CELL + 30;
        let steps = 20;
        let step_h = 2 * CELL / steps;
        for s in 0..steps {
            let (r, g, b) = blues(1.0 - s as f64 / (steps - 1) as f64);
            let y0 = TOP + s * step_h;
            root.draw(&Rectangle::new([(bar_x, y0), (bar_x + 20, y0 + step_h)], RGBColor(r, g, b).filled()))?;
        }
        let bar_label = ("sans-serif", 14).into_font().color(&BLACK).pos(Pos::new(HPos::Left, VPos::Center));
        root.draw_text(&self.cell_label(max), &bar_label, (bar_x + 26, TOP))?;
        root.draw_text(&self.cell_label(0.0), &bar_label, (bar_x + 26, TOP + 2 * CELL))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cm() -> ConfusionMatrix {
        ConfusionMatrix::from_counts([[1500, 93], [212, 195]])
    }

    #[test]
    fn test_blues_endpoints() {
        assert_eq!(blues(0.0), (247, 251, 255));
        assert_eq!(blues(1.0), (8, 48, 107));
        assert_eq!(blues(f64::NAN), (247, 251, 255));
    }

    #[test]
    fn test_highlight_threshold() {
        let values = ConfusionPlot::new("t").cell_values(&cm());
        assert!(ConfusionPlot::is_highlighted(&values, 0, 0));
        assert!(!ConfusionPlot::is_highlighted(&values, 1, 0));
        assert!(!ConfusionPlot::is_highlighted(&values, 1, 1));
    }

    #[test]
    fn test_text_keeps_cell_values() {
        let text = ConfusionPlot::new("Random Forest with max depth of 4").render_text(&cm());
        for v in ["1500", "93", "212", "195", "Non Churn", "Churn"] {
            assert!(text.contains(v), "missing {}", v);
        }
    }

    #[test]
    fn test_normalized_labels() {
        let plot = ConfusionPlot::new("LightGBM").with_normalize(true);
        let values = plot.cell_values(&cm());
        assert_eq!(plot.cell_label(values[0][0]), "0.94");
        assert_eq!(plot.cell_label(values[1][1]), "0.48");
    }

    #[test]
    fn test_svg_contents() {
        let dir = TempDir::new().unwrap();
        let path = ConfusionPlot::new("LightGBM")
            .save_svg(&cm(), dir.path().join("plots/lgbm_sm.svg"))
            .unwrap();
        let svg = std::fs::read_to_string(path).unwrap();

        assert!(svg.contains("<svg"));
        assert!(svg.contains("#0000FF"), "class ticks are drawn in blue");
        for v in ["LightGBM", "1500", "212", "True label", "Predicted label", "Non Churn"] {
            assert!(svg.contains(v), "missing {}", v);
        }
    }
}
