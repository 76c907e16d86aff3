//! Tracked training
//!
//! Each job is fitted inside its own run. Params, training and validation
//! metrics and the model artifact are logged explicitly before the run is
//! ended.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::data::RecordTable;
use crate::error::Result;
use crate::evaluation::{EvaluationReport, Evaluator, TrainingMetrics};
use crate::tracking::{
    ActiveRun, ModelSignature, ModelUri, RegisteredModelVersion, RunRecord, TrackingClient,
};
use crate::utils::Timer;
use super::config::TrainingJob;
use super::models::{Classifier, TrainedModel};

/// Artifact path the model is logged under
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// Everything produced by one tracked training job
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub job: TrainingJob,
    /// Run record as it was stored when the run ended
    pub run: RunRecord,
    pub model: TrainedModel,
    /// `runs:/<run_id>/model`
    pub model_uri: ModelUri,
    pub registered: Option<RegisteredModelVersion>,
    pub training_metrics: TrainingMetrics,
    pub evaluation: EvaluationReport,
    pub fit_secs: f64,
}

impl TrainingOutcome {
    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }
}

struct RunOutput {
    model: TrainedModel,
    model_uri: ModelUri,
    registered: Option<RegisteredModelVersion>,
    training_metrics: TrainingMetrics,
    evaluation: EvaluationReport,
    fit_secs: f64,
}

/// Fits jobs against a tracking client
pub struct Trainer<'a> {
    client: &'a dyn TrackingClient,
    evaluator: Evaluator,
}

impl<'a> Trainer<'a> {
    pub fn new(client: &'a dyn TrackingClient, evaluator: Evaluator) -> Self {
        Self { client, evaluator }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Fit `job` on `train` and score it on `validation` inside a new run.
    ///
    /// Any failure ends the run as `failed` and is returned unchanged.
    pub fn train(
        &self,
        job: &TrainingJob,
        train: &RecordTable,
        validation: &RecordTable,
    ) -> Result<TrainingOutcome> {
        let run = ActiveRun::start(self.client, &job.run_name)?;
        info!(run_id = run.run_id(), run_name = %job.run_name, estimator = job.spec.estimator_name(), "training job");

        match self.train_in_run(&run, job, train, validation) {
            Ok(out) => {
                let record = run.finish()?;
                info!(
                    run_id = %record.run_id,
                    val_f1 = out.evaluation.scores.f1,
                    roc_auc = out.evaluation.roc_auc,
                    "job finished"
                );
                Ok(TrainingOutcome {
                    job: job.clone(),
                    run: record,
                    model: out.model,
                    model_uri: out.model_uri,
                    registered: out.registered,
                    training_metrics: out.training_metrics,
                    evaluation: out.evaluation,
                    fit_secs: out.fit_secs,
                })
            }
            Err(e) => {
                warn!(run_id = run.run_id(), error = %e, "job failed");
                if let Err(end_err) = run.fail() {
                    warn!(error = %end_err, "could not mark run failed");
                }
                Err(e)
            }
        }
    }

    /// Train every job in order, stopping at the first failure
    pub fn train_all(
        &self,
        jobs: &[TrainingJob],
        train: &RecordTable,
        validation: &RecordTable,
    ) -> Result<Vec<TrainingOutcome>> {
        jobs.iter().map(|job| self.train(job, train, validation)).collect()
    }

    fn train_in_run(
        &self,
        run: &ActiveRun<'_>,
        job: &TrainingJob,
        train: &RecordTable,
        validation: &RecordTable,
    ) -> Result<RunOutput> {
        run.log_params(&job.spec.params())?;

        let mut model = job.spec.build()?;
        let mut timer = Timer::start(format!("job {}", job.run_name));
        model.fit(train.features(), train.labels())?;
        timer.checkpoint("fit");

        let training_metrics = self.evaluator.training_metrics(&model, train)?;
        let evaluation = self.evaluator.evaluate(&model, validation, train)?;
        timer.checkpoint("evaluate");

        let mut metrics: BTreeMap<String, f64> = training_metrics.metric_map();
        metrics.extend(evaluation.metric_map());
        let phases = timer.phase_secs();
        for (phase, secs) in &phases {
            metrics.insert(format!("{}_time_secs", phase), *secs);
        }
        let fit_secs = phases.first().map(|(_, s)| *s).unwrap_or_default();
        run.log_metrics(&metrics)?;
        run.set_tag("roc_auc_split", &evaluation.roc_auc_split.to_string())?;
        run.set_tag("estimator", job.spec.estimator_name())?;

        let signature = ModelSignature::infer(validation.feature_names(), validation.label_column());
        let logged = run.log_model(
            MODEL_ARTIFACT_PATH,
            &model,
            Some(signature),
            job.registered_model_name.as_deref(),
        )?;
        timer.checkpoint("log_model");
        timer.stop_with_report();

        Ok(RunOutput {
            model,
            model_uri: logged.uri,
            registered: logged.registered,
            training_metrics,
            evaluation,
            fit_secs,
        })
    }
}
