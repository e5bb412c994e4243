use crate::domain::config::ExperimentConfig;
use crate::domain::error::ModelResult;
use crate::domain::task::{ScoreMode, Task, TaskKind, TaskSpec};
use crate::domain::traits::Scorer;
use crate::infra::metrics::{Average, BinaryF1, CategoricalAccuracy};

/// Turn the config's task list into descriptors with their scorers.
///
/// Output cardinality defaults to 2 for classification, 1 for
/// regression and ranking, and `max_word_v_size` for tasks that
/// predict words.
pub fn tasks_from_specs(specs: &[TaskSpec], cfg: &ExperimentConfig) -> ModelResult<Vec<Task>> {
    specs.iter().map(|spec| task_from_spec(spec, cfg)).collect()
}

pub fn task_from_spec(spec: &TaskSpec, cfg: &ExperimentConfig) -> ModelResult<Task> {
    let kind = spec.task_kind()?;
    let n_classes = match kind {
        TaskKind::SingleClassification | TaskKind::PairClassification => spec.n_classes.unwrap_or(2),
        TaskKind::PairRegression | TaskKind::PairOrdinalRegression | TaskKind::Ranking => 1,
        TaskKind::LanguageModeling | TaskKind::SequenceGeneration => cfg.max_word_v_size,
    };

    let (primary, secondary) = default_scorers(kind, n_classes, spec.score_mode);
    let mut task = Task::new(spec.name.clone(), kind, n_classes, primary).with_score_mode(spec.score_mode);
    if let Some(secondary) = secondary {
        task = task.with_secondary(secondary);
    }
    Ok(task)
}

type Scorers = (Box<dyn Scorer>, Option<Box<dyn Scorer>>);

fn boxed(scorer: impl Scorer + 'static) -> Box<dyn Scorer> {
    Box::new(scorer)
}

fn default_scorers(kind: TaskKind, n_classes: usize, mode: ScoreMode) -> Scorers {
    match kind {
        TaskKind::SingleClassification if mode == ScoreMode::Matthews => {
            (boxed(Average::new("mcc")), Some(boxed(CategoricalAccuracy::new())))
        }
        TaskKind::SingleClassification | TaskKind::PairClassification => {
            (boxed(CategoricalAccuracy::new()), (n_classes == 2).then(|| boxed(BinaryF1::new())))
        }
        TaskKind::PairRegression        => (boxed(Average::new("pearson")), Some(boxed(Average::new("spearman")))),
        TaskKind::PairOrdinalRegression => (boxed(Average::new("mse")), Some(boxed(Average::new("spearman")))),
        TaskKind::LanguageModeling      => (boxed(Average::new("loss")), None),
        TaskKind::SequenceGeneration    => (boxed(Average::new("bleu")), None),
        TaskKind::Ranking               => (boxed(Average::new("score")), None),
    }
}
