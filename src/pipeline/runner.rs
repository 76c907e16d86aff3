//! Churn pipeline stages
//!
//! ingest -> split -> persist_test -> balance -> train -> assess -> report,
//! run strictly in that order by [`ChurnPipeline::run`]. Each stage takes the
//! outputs it needs and returns a typed record.

use polars::prelude::*;
use tracing::info;

use crate::data::{three_way_split, Lakehouse, RecordTable, TableCommit, WriteMode};
use crate::error::{KolosalError, Result};
use crate::evaluation::{predictions_identical, Evaluator};
use crate::synthetic::{Sampler, SMOTE};
use crate::tracking::{LocalTracker, TrackingClient};
use crate::training::{Trainer, TrainingOutcome};
use crate::utils::Timer;
use crate::visualization::ConfusionPlot;
use super::config::PipelineConfig;
use super::context::{
    BalancedTrainingSet, Ingested, ModelAssessment, Partitions, PipelineContext, PipelineSummary,
};

/// Bank churn training pipeline
pub struct ChurnPipeline {
    config: PipelineConfig,
    lakehouse: Lakehouse,
    tracker: LocalTracker,
    console: bool,
}

impl ChurnPipeline {
    /// Validate `config` and open the lakehouse and tracking store
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let lakehouse = Lakehouse::open(&config.lakehouse_root);
        let tracker = LocalTracker::open(&config.tracking_dir, &config.experiment_name)?;
        Ok(Self {
            config,
            lakehouse,
            tracker,
            console: true,
        })
    }

    /// Print reports and confusion matrices to stdout
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn lakehouse(&self) -> &Lakehouse {
        &self.lakehouse
    }

    pub fn tracker(&self) -> &LocalTracker {
        &self.tracker
    }

    fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.config.roc_auc_split).with_target_names(self.config.class_names.to_vec())
    }

    /// Read the input table and validate its schema
    pub fn ingest(&self) -> Result<Ingested> {
        let frame = self.lakehouse.read_table(&self.config.input_table)?;
        let table = RecordTable::from_dataframe(&frame, &self.config.label_column)?;
        info!(
            table = %self.config.input_table,
            rows = table.n_rows(),
            features = table.n_features(),
            positive_rate = table.positive_rate(),
            "ingested"
        );
        Ok(Ingested { frame, table })
    }

    /// Seeded 60/20/20 partitioning
    pub fn split(&self, ingested: &Ingested) -> Result<Partitions> {
        let split = three_way_split(
            ingested.table.n_rows(),
            self.config.test_size,
            self.config.validation_size,
            self.config.seed,
        )?;
        let partitions = Partitions {
            train: ingested.table.select_rows(&split.train),
            validation: ingested.table.select_rows(&split.validation),
            test: ingested.table.select_rows(&split.test),
            split,
        };
        info!(
            train = partitions.train.n_rows(),
            validation = partitions.validation.n_rows(),
            test = partitions.test.n_rows(),
            seed = self.config.seed,
            "split"
        );
        Ok(partitions)
    }

    /// Overwrite the output table with the test features in source dtypes
    pub fn persist_test(&self, ingested: &Ingested, partitions: &Partitions) -> Result<TableCommit> {
        let idx: Vec<IdxSize> = partitions.split.test.iter().map(|&i| i as IdxSize).collect();
        let idx = IdxCa::from_vec("idx".into(), idx);
        let mut test = ingested
            .frame
            .take(&idx)?
            .drop(&self.config.label_column)?;

        self.lakehouse
            .write_table(&self.config.output_table, &mut test, WriteMode::Overwrite)
    }

    /// SMOTE over the training partition
    pub fn balance(&self, train: &RecordTable) -> Result<BalancedTrainingSet> {
        let mut smote = SMOTE::new()
            .with_k_neighbors(self.config.smote.k_neighbors)
            .with_sampling_strategy(self.config.smote.sampling_strategy)
            .with_seed(self.config.smote_seed());
        let resampled = smote.fit_resample(train.features(), train.labels())?;

        let table = RecordTable::new(
            train.feature_names().to_vec(),
            train.label_column(),
            resampled.x,
            resampled.y,
        )?;
        info!(
            before = ?train.class_counts(),
            after = ?table.class_counts(),
            synthetic = resampled.n_synthetic.values().sum::<usize>(),
            "balanced training set"
        );

        Ok(BalancedTrainingSet {
            original_rows: train.n_rows(),
            n_synthetic: resampled.n_synthetic,
            table,
        })
    }

    /// Fit every configured job inside its own run
    pub fn train(&self, balanced: &BalancedTrainingSet, validation: &RecordTable) -> Result<Vec<TrainingOutcome>> {
        Trainer::new(&self.tracker, self.evaluator()).train_all(&self.config.jobs, &balanced.table, validation)
    }

    /// Evaluate the live model and the model reloaded from its run URI
    pub fn assess(
        &self,
        outcome: &TrainingOutcome,
        balanced: &BalancedTrainingSet,
        validation: &RecordTable,
    ) -> Result<ModelAssessment> {
        let evaluator = self.evaluator();
        let reloaded_model = self.tracker.load_model(&outcome.model_uri)?;
        let reloaded = evaluator.evaluate(&reloaded_model, validation, &balanced.table)?;
        let live = outcome.evaluation.clone();

        let identical = predictions_identical(&live.probabilities, &reloaded.probabilities)
            && live.predictions == reloaded.predictions;
        if !identical {
            return Err(KolosalError::EvaluationError(format!(
                "model reloaded from {} predicts differently from the live model",
                outcome.model_uri
            )));
        }
        info!(run_name = %outcome.job.run_name, uri = %outcome.model_uri, "reloaded model matches");

        Ok(ModelAssessment {
            run_name: outcome.job.run_name.clone(),
            title: outcome.job.title.clone(),
            run_id: outcome.run_id().to_string(),
            model_uri: outcome.model_uri.clone(),
            registered: outcome.registered.clone(),
            live,
            reloaded,
            identical,
            plot_path: None,
        })
    }

    /// Render the confusion matrix and classification report of an assessment
    pub fn report(&self, assessment: &mut ModelAssessment) -> Result<()> {
        let [negative, positive] = self.config.class_names.clone();
        let plot = ConfusionPlot::new(&assessment.title)
            .with_class_names(negative, positive)
            .with_normalize(self.config.normalize_confusion);

        if self.console {
            println!();
            println!("{} ({})", assessment.run_name, assessment.model_uri);
            println!("{}", assessment.live.report);
            plot.print(&assessment.live.confusion);
        }

        if let Some(dir) = &self.config.report_dir {
            let path = plot.save_svg(&assessment.live.confusion, dir.join(format!("{}.svg", assessment.run_name)))?;
            assessment.plot_path = Some(path);
        }
        Ok(())
    }

    /// Run every stage in order
    pub fn run(&self) -> Result<(PipelineContext, PipelineSummary)> {
        let mut ctx = PipelineContext::default();
        info!(experiment = %self.config.experiment_name, seed = self.config.seed, "pipeline started");

        let timer = Timer::start("ingest");
        let ingested = self.ingest()?;
        ctx.record_timing("ingest", timer.stop());

        let timer = Timer::start("split");
        let partitions = self.split(&ingested)?;
        ctx.record_timing("split", timer.stop());

        let timer = Timer::start("persist_test");
        ctx.test_commit = Some(self.persist_test(&ingested, &partitions)?);
        ctx.record_timing("persist_test", timer.stop());

        let timer = Timer::start("balance");
        let balanced = self.balance(&partitions.train)?;
        ctx.record_timing("balance", timer.stop());

        let timer = Timer::start("train");
        let outcomes = self.train(&balanced, &partitions.validation)?;
        ctx.record_timing("train", timer.stop());

        let timer = Timer::start("assess");
        for outcome in &outcomes {
            let mut assessment = self.assess(outcome, &balanced, &partitions.validation)?;
            self.report(&mut assessment)?;
            ctx.assessments.push(assessment);
        }
        ctx.record_timing("assess", timer.stop());

        ctx.ingested = Some(ingested);
        ctx.partitions = Some(partitions);
        ctx.balanced = Some(balanced);

        let summary = ctx.summary(&self.tracker.experiment().experiment_id)?;
        info!(models = summary.models.len(), "pipeline finished");
        Ok((ctx, summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::generate_bank_churn;
    use crate::training::{ModelSpec, RandomForestParams, TrainingJob};
    use tempfile::TempDir;

    fn pipeline(dir: &TempDir, rows: usize) -> ChurnPipeline {
        let lakehouse = Lakehouse::open(dir.path().join("lake"));
        let mut df = generate_bank_churn(rows, 0.2, 5).unwrap();
        lakehouse.write_table("df_clean", &mut df, WriteMode::Overwrite).unwrap();

        let job = TrainingJob::new(
            "rfc_small",
            "Random Forest",
            ModelSpec::RandomForest(RandomForestParams {
                n_estimators: 5,
                max_depth: Some(3),
                random_state: Some(1),
                ..Default::default()
            }),
        );
        let config = PipelineConfig::default()
            .with_lakehouse_root(dir.path().join("lake"))
            .with_tracking_dir(dir.path().join("mlruns"))
            .with_jobs(vec![job]);
        ChurnPipeline::new(config).unwrap().with_console(false)
    }

    #[test]
    fn test_persisted_test_has_features_only() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, 500);
        let ingested = p.ingest().unwrap();
        let partitions = p.split(&ingested).unwrap();
        let commit = p.persist_test(&ingested, &partitions).unwrap();

        let stored = p.lakehouse().read_table("df_test").unwrap();
        assert_eq!(stored.height(), 100);
        assert_eq!(commit.num_rows, 100);
        assert!(stored.column("Exited").is_err());
        assert_eq!(stored.width(), ingested.frame.width() - 1);
    }

    #[test]
    fn test_balance_touches_train_only() {
        let dir = TempDir::new().unwrap();
        let p = pipeline(&dir, 500);
        let ingested = p.ingest().unwrap();
        let partitions = p.split(&ingested).unwrap();
        let before = partitions.class_counts();

        let balanced = p.balance(&partitions.train).unwrap();
        let counts = balanced.table.class_counts();
        assert_eq!(counts[&0], counts[&1]);
        assert_eq!(balanced.original_rows, 300);
        assert_eq!(partitions.class_counts(), before);

        let original = balanced.table.features().slice(ndarray::s![..300, ..]).to_owned();
        assert_eq!(&original, partitions.train.features());
    }

    #[test]
    fn test_run_end_to_end_small() {
        let dir = TempDir::new().unwrap();
        let (ctx, summary) = pipeline(&dir, 500).run().unwrap();

        assert_eq!(summary.models.len(), 1);
        assert_eq!(summary.validation_rows, 100);
        assert!(summary.all_reloads_identical());
        assert_eq!(ctx.assessments[0].live.confusion.total(), 100);
        assert_eq!(ctx.timings.len(), 6);
    }
}
