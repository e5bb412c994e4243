// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers; no model math here.
//
//   task_factory.rs  — TaskSpec (config) → Task with scorers
//   build_use_case   — config + vocabulary + pretrained
//                      vectors → MultiTaskModel
//   probe_use_case   — build, then run one synthetic batch
//                      per task and record the metrics
//
// The config's `cuda` key picks the backend: negative means
// the CPU (NdArray), anything else the GPU (Wgpu).
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

/// Task descriptors with default scorers
pub mod task_factory;

/// Load inputs and build the model graph
pub mod build_use_case;

/// Forward one synthetic batch per task
pub mod probe_use_case;
