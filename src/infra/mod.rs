// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Concerns shared by several layers:
//
//   pretrained.rs — where pretrained encoder weights live on
//                   disk, loading them into freshly built
//                   modules, and reading word-vector files
//   metrics.rs    — the scorer implementations attached to
//                   tasks, correlation helpers, and a CSV
//                   logger for per-task metrics
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Records)

/// Pretrained weight and word-vector storage
pub mod pretrained;

/// Scorers and metrics CSV logging
pub mod metrics;
