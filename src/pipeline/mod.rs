//! End-to-end churn pipeline
//!
//! Stage outputs are typed records threaded explicitly from one stage to the
//! next and collected in a [`PipelineContext`].

mod config;
mod context;
mod runner;

pub use config::{PipelineConfig, SmoteConfig};
pub use context::{
    BalancedTrainingSet, Ingested, ModelAssessment, ModelSummary, Partitions, PipelineContext,
    PipelineSummary,
};
pub use runner::ChurnPipeline;
