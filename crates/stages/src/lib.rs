//! podcast-cmo model router, pipeline stages, and orchestrator.
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** This crate sequences calls between the domain
//! rules in [`pipeline`] and the infrastructure behind its port traits
//! (text backends, transcript sources, publishing sinks). It performs no I/O
//! of its own.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`router`] | [`ModelRouter`]: budget reservation, timeouts, retry and failover per task class |
//! | [`throttle`] | Per-backend call rate limit |
//! | [`extraction`] | Transcript → insights |
//! | [`research`] | Insights → findings, concurrently per insight |
//! | [`generation`] | Insights + findings → pending content items |
//! | [`validation`] | Structural checks and brand-voice review |
//! | [`schedule`] | Publication slot planning |
//! | [`orchestrator`] | Run lifecycle, stage retry, partial-failure continuation, batches |
//! | [`republish`] | Second publishing attempt for items the sink refused |

pub mod extraction;
pub mod generation;
mod json;
pub mod orchestrator;
pub mod republish;
pub mod research;
pub mod router;
pub mod schedule;
pub mod throttle;
pub mod validation;

#[cfg(test)]
mod testing;

pub use extraction::ExtractionStage;
pub use generation::{GenerationInput, GenerationStage};
pub use orchestrator::{Orchestrator, RunReport};
pub use republish::{PublishRetry, RetryResult, RetrySummary};
pub use research::{research_angle, ResearchStage};
pub use router::ModelRouter;
pub use schedule::{PublishingScheduler, SchedulePlan};
pub use throttle::RateLimiter;
pub use validation::ValidationStage;
