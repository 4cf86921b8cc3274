//! Domain model types for the tenk scheduling engine

pub mod company;
pub mod job;
pub mod scheduler;

pub use company::{
    Candidate, CandidateContext, Decision, DecisionAction, DecisionSnapshot, PriorityRecord,
    ReasonCode, SizeTier,
};
pub use job::{
    AnalysisOutput, AnalysisRecord, AnalysisStatus, BatchJob, Finding, JobStatus, Pitch,
    ProductMatch,
};
pub use scheduler::{
    Run, RunMode, RunStatus, SchedulerLiveness, SchedulerSettings, SettingsUpdate, TriggerSource,
};
