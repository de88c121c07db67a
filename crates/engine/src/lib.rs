//! Orchestration engine: turns a growing chat thread into bounded,
//! provider-agnostic model calls with optional tool lookups and automatic
//! summarization.
//!
//! The [`Engine`] facade composes the context assembler, reference detector,
//! prefetcher, provider registry and tool-step loop per request and returns a
//! caller-facing stream of [`lq_domain::StreamEvent`]s.

pub mod cancel;
pub mod facade;
mod generation;
pub mod prefetch;
pub mod reference;
pub mod stepper;
pub mod storage;
pub mod summarize;
pub mod tools;

pub use cancel::CancelToken;
pub use facade::Engine;
pub use prefetch::{PrefetchResult, Prefetcher};
pub use reference::{detect, RepoReference};
pub use stepper::{StepObserver, StepPolicy, StepReport, StepState, TracingObserver};
pub use storage::{InMemoryStore, ThreadPatch, ThreadStore};
pub use tools::{NoTools, Tools};
