//! Visualization: confusion-matrix heatmaps

mod confusion;

pub use confusion::{blues, ConfusionPlot};
