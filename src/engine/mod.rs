//! Dataflow engine: streams of keyed records, the combinators that connect them, stage nodes wrapping
//! external tools, and the scheduler that drives a built graph.

pub mod combinators;
pub mod graph;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod stage;
pub mod stream;

pub use graph::{Graph, GraphBuilder, GraphShape};
pub use record::{Artifact, RecordKey, StageRecord};
pub use registry::{Sample, SampleRegistry};
pub use scheduler::{RunReport, Scheduler, SchedulerSettings};
pub use stage::{ResourceClass, StageExecutor, StageSpec};
pub use stream::{Emitter, Stream, Subscription};
