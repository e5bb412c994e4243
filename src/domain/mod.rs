// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits that define what the
// multi-task system talks about:
//
//   config.rs — the flat experiment configuration and the
//               per-task override lookup ("<task>_<attr>")
//   vocab.rs  — token → id maps for the "tokens" and "chars"
//               namespaces, with reserved padding / unknown ids
//   task.rs   — task categories and task descriptors that
//               carry their own metric accumulators
//   error.rs  — the error taxonomy shared by every builder
//               and by the forward dispatcher
//   traits.rs — the Scorer abstraction implemented in infra
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O beyond reading JSON descriptions
//
// Reference: Rust Book §5 (Structs), §6 (Enums), §10 (Traits)

/// Experiment configuration and per-task parameter resolution
pub mod config;

/// Error taxonomy for model construction and dispatch
pub mod error;

/// Task categories and task descriptors
pub mod task;

/// Core abstractions (traits) that other layers implement
pub mod traits;

/// Namespaced token vocabulary
pub mod vocab;
