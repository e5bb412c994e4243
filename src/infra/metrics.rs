// ============================================================
// Layer 6 — Metrics
// ============================================================
// Three things live here:
//
//   1. Scorers — the accumulators tasks carry
//        CategoricalAccuracy  argmax(logits) == label
//        BinaryF1             F1 of the positive class (label 1)
//        Average              running mean of pre-computed values
//                             (correlations, MSE, LM loss)
//
//   2. Statistics on host-side arrays, used by the dispatcher
//      before it hands a Value observation to a scorer:
//        matthews_corrcoef, pearson, spearman, mean_squared_error
//
//   3. MetricsLogger — appends one CSV row per task snapshot
//      so runs can be compared later.
//
// Example CSV output:
//   task,kind,loss,primary,secondary
//   sst,single_classification,1.098612,0.500000,
//   sts-b,pair_regression,2.431100,0.121300,0.098700
//
// Reference: Rust Book §9 (Error Handling)
//            Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};
use serde::{Deserialize, Serialize};

use crate::domain::traits::{Observation, Scorer};

// ─── Scorers ──────────────────────────────────────────────────────────────────

/// Fraction of rows whose argmax matches the gold label.
#[derive(Debug, Default)]
pub struct CategoricalAccuracy {
    correct: usize,
    total:   usize,
}

impl CategoricalAccuracy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scorer for CategoricalAccuracy {
    fn name(&self) -> &str {
        "accuracy"
    }

    fn observe(&mut self, observation: Observation<'_>) {
        match observation {
            Observation::Logits { logits, n_classes, labels } => {
                let preds = argmax_rows(logits, n_classes);
                self.correct += preds
                    .iter()
                    .zip(labels)
                    .filter(|(&p, &l)| p == l as usize)
                    .count();
                self.total += preds.len();
            }
            Observation::Value(v) => {
                tracing::warn!("accuracy scorer ignores pre-computed value {v}");
            }
        }
    }

    fn value(&self) -> f64 {
        if self.total == 0 { 0.0 } else { self.correct as f64 / self.total as f64 }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// F1 score of class 1 for binary tasks.
#[derive(Debug, Default)]
pub struct BinaryF1 {
    true_pos:  usize,
    false_pos: usize,
    false_neg: usize,
}

impl BinaryF1 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scorer for BinaryF1 {
    fn name(&self) -> &str {
        "f1"
    }

    fn observe(&mut self, observation: Observation<'_>) {
        let Observation::Logits { logits, n_classes, labels } = observation else {
            tracing::warn!("f1 scorer only accepts logits");
            return;
        };
        for (pred, &gold) in argmax_rows(logits, n_classes).into_iter().zip(labels) {
            match (pred == 1, gold as usize == 1) {
                (true, true)   => self.true_pos  += 1,
                (true, false)  => self.false_pos += 1,
                (false, true)  => self.false_neg += 1,
                (false, false) => {}
            }
        }
    }

    fn value(&self) -> f64 {
        let tp = self.true_pos as f64;
        let denom = 2.0 * tp + self.false_pos as f64 + self.false_neg as f64;
        if denom == 0.0 { 0.0 } else { 2.0 * tp / denom }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Running mean of pre-computed per-batch values.
#[derive(Debug)]
pub struct Average {
    name:  String,
    sum:   f64,
    count: usize,
}

impl Average {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), sum: 0.0, count: 0 }
    }
}

impl Scorer for Average {
    fn name(&self) -> &str {
        &self.name
    }

    fn observe(&mut self, observation: Observation<'_>) {
        match observation {
            // Non-finite values (e.g. a correlation on a constant batch) are skipped
            Observation::Value(v) if v.is_finite() => {
                self.sum += v;
                self.count += 1;
            }
            Observation::Value(v) => tracing::debug!("{}: skipping non-finite value {v}", self.name),
            Observation::Logits { .. } => tracing::warn!("{} scorer ignores raw logits", self.name),
        }
    }

    fn value(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }

    fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }
}

// ─── Statistics ───────────────────────────────────────────────────────────────

/// Row-wise argmax of row-major `[rows, n_classes]` logits.
pub fn argmax_rows(logits: &[f32], n_classes: usize) -> Vec<usize> {
    if n_classes == 0 {
        return Vec::new();
    }
    logits
        .chunks(n_classes)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
                .0
        })
        .collect()
}

/// Matthews correlation coefficient, multi-class form, over classes `0..n_classes`.
/// Pairs with a label outside that range are skipped.
/// Returns 0.0 when undefined (a single predicted or gold class).
pub fn matthews_corrcoef(gold: &[usize], pred: &[usize], n_classes: usize) -> f64 {
    let mut gold_counts = vec![0f64; n_classes];
    let mut pred_counts = vec![0f64; n_classes];
    let mut correct = 0f64;
    let mut samples = 0f64;
    for (&g, &p) in gold.iter().zip(pred) {
        if g >= n_classes || p >= n_classes {
            continue;
        }
        gold_counts[g] += 1.0;
        pred_counts[p] += 1.0;
        samples += 1.0;
        if g == p {
            correct += 1.0;
        }
    }

    let dot = |a: &[f64], b: &[f64]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f64>();

    let cov_ytyp = correct * samples - dot(&gold_counts, &pred_counts);
    let cov_ypyp = samples * samples - dot(&pred_counts, &pred_counts);
    let cov_ytyt = samples * samples - dot(&gold_counts, &gold_counts);

    let denom = (cov_ytyt * cov_ypyp).sqrt();
    if denom == 0.0 { 0.0 } else { cov_ytyp / denom }
}

/// Pearson correlation. NaN when either side has zero variance.
pub fn pearson(x: &[f32], y: &[f32]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return f64::NAN;
    }
    let mean = |v: &[f32]| v[..n].iter().map(|&a| a as f64).sum::<f64>() / n as f64;
    let (mx, my) = (mean(x), mean(y));

    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x[..n].iter().zip(&y[..n]) {
        let (dx, dy) = (a as f64 - mx, b as f64 - my);
        cov += dx * dy;
        vx  += dx * dx;
        vy  += dy * dy;
    }
    cov / (vx * vy).sqrt()
}

/// Spearman rank correlation (Pearson on average ranks).
pub fn spearman(x: &[f32], y: &[f32]) -> f64 {
    pearson(&ranks(x), &ranks(y))
}

/// Mean squared error between predictions and targets.
pub fn mean_squared_error(pred: &[f32], gold: &[f32]) -> f64 {
    let n = pred.len().min(gold.len());
    if n == 0 {
        return 0.0;
    }
    pred.iter()
        .zip(gold)
        .map(|(&p, &g)| (p as f64 - g as f64).powi(2))
        .sum::<f64>()
        / n as f64
}

/// 1-based ranks, ties get the average of their positions.
fn ranks(values: &[f32]) -> Vec<f32> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut out = vec![0f32; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f32 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = rank;
        }
        i = j + 1;
    }
    out
}

// ─── CSV logger ───────────────────────────────────────────────────────────────

/// One row of metrics for a single task snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub task: String,
    pub kind: String,
    /// Loss of the batch, when one was produced
    pub loss: Option<f64>,
    pub primary: f64,
    pub secondary: Option<f64>,
}

/// Appends task metric snapshots to a CSV file.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the logger, writing the header if the file is new.
    pub fn new(dir: impl Into<String>) -> Result<Self> {
        let dir = PathBuf::from(dir.into());
        fs::create_dir_all(&dir)?;

        let csv_path = dir.join("task_metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "task,kind,loss,primary,secondary")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    /// Append one row.
    pub fn log(&self, m: &TaskMetrics) -> Result<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;

        let opt = |v: Option<f64>| v.map(|x| format!("{x:.6}")).unwrap_or_default();
        writeln!(f, "{},{},{},{:.6},{}", m.task, m.kind, opt(m.loss), m.primary, opt(m.secondary))?;

        tracing::debug!("Logged metrics for task '{}': primary={:.4}", m.task, m.primary);
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_from_logits() {
        let mut acc = CategoricalAccuracy::new();
        // rows: argmax 1, argmax 0, argmax 2
        let logits = [0.1, 0.9, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 3.0];
        acc.observe(Observation::Logits { logits: &logits, n_classes: 3, labels: &[1.0, 1.0, 2.0] });
        assert!((acc.value() - 2.0 / 3.0).abs() < 1e-9);

        acc.reset();
        assert_eq!(acc.value(), 0.0);
    }

    #[test]
    fn test_binary_f1() {
        let mut f1 = BinaryF1::new();
        // preds: 1, 1, 0, 0  gold: 1, 0, 1, 0 → tp=1 fp=1 fn=1
        let logits = [0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 0.0];
        f1.observe(Observation::Logits { logits: &logits, n_classes: 2, labels: &[1.0, 0.0, 1.0, 0.0] });
        assert!((f1.value() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_average_skips_non_finite() {
        let mut avg = Average::new("pearson");
        avg.observe(Observation::Value(0.5));
        avg.observe(Observation::Value(f64::NAN));
        avg.observe(Observation::Value(1.0));
        assert!((avg.value() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_matthews_perfect_and_inverse() {
        assert!((matthews_corrcoef(&[0, 1, 1, 0], &[0, 1, 1, 0], 2) - 1.0).abs() < 1e-9);
        assert!((matthews_corrcoef(&[0, 1, 1, 0], &[1, 0, 0, 1], 2) + 1.0).abs() < 1e-9);
        // Constant predictions carry no information
        assert_eq!(matthews_corrcoef(&[0, 1, 1, 0], &[1, 1, 1, 1], 2), 0.0);
        assert_eq!(matthews_corrcoef(&[], &[], 0), 0.0);
    }

    #[test]
    fn test_matthews_skips_labels_outside_the_classes() {
        let clean = matthews_corrcoef(&[0, 1, 1, 0], &[0, 1, 0, 0], 2);
        let noisy = matthews_corrcoef(&[0, 1, 1, 0, 1_000_000_000], &[0, 1, 0, 0, 1], 2);
        assert!((clean - noisy).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_and_spearman() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        assert!((pearson(&x, &y) - 1.0).abs() < 1e-9);

        // Monotone but non-linear → Spearman 1, Pearson below 1
        let z = [1.0, 4.0, 9.0, 100.0];
        assert!((spearman(&x, &z) - 1.0).abs() < 1e-9);
        assert!(pearson(&x, &z) < 1.0);

        assert!(pearson(&x, &[1.0, 1.0, 1.0, 1.0]).is_nan());
    }

    #[test]
    fn test_ranks_average_ties() {
        assert_eq!(ranks(&[10.0, 20.0, 20.0, 5.0]), vec![2.0, 3.5, 3.5, 1.0]);
    }

    #[test]
    fn test_mean_squared_error() {
        assert!((mean_squared_error(&[1.0, 2.0], &[1.0, 4.0]) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_logger_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path().to_string_lossy().to_string()).unwrap();
        logger
            .log(&TaskMetrics {
                task:      "sst".into(),
                kind:      "single_classification".into(),
                loss:      Some(0.5),
                primary:   0.75,
                secondary: None,
            })
            .unwrap();

        let csv = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "task,kind,loss,primary,secondary");
        assert_eq!(lines[1], "sst,single_classification,0.500000,0.750000,");
    }
}
