//! Core run-state modules
//!
//! The result model is plain data; the timeline collector and the sink
//! coordinator are actors owning their state behind channel handles.

pub mod coordinator;
pub mod results;
pub mod timeline;

pub use coordinator::{CoordinatorHandle, CoordinatorPhase};
pub use results::{
    FactData, LogMessageInfo, NodeCompletion, NodeFact, NodeLog, NodeResult, NodeStatus, RunReport, SpecLog,
    TestRunTree,
};
pub use timeline::TimelineHandle;
