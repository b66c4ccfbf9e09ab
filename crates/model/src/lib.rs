//! # Weft Net Model
//!
//! Immutable descriptions of workflow processes as Petri-net-like graphs:
//! conditions (places), tasks (transitions), and flows (arcs), with AND/OR/XOR
//! split and join semantics, multi-instance tasks, and cancellation sets.
//!
//! A [`NetSpec`] is built once through [`NetBuilder`], validated structurally
//! at build time, and then shared read-only (behind an `Arc`) by every case
//! the engine runs for that specification. Nothing in this crate is mutable
//! after `build()` succeeds.
//!
//! ## Example
//!
//! ```
//! use weft_model::{NetBuilder, TaskDef, SplitType, JoinType, Predicate};
//!
//! let net = NetBuilder::new("credit-check")
//!     .input_condition("start")
//!     .output_condition("end")
//!     .task(TaskDef::new("score").split(SplitType::Xor))
//!     .task(TaskDef::new("approve"))
//!     .task(TaskDef::new("reject"))
//!     .task(TaskDef::new("notify").join(JoinType::Xor))
//!     .flow("start", "score")
//!     .flow_if("score", "approve", Predicate::greater_than("/score", 600.0))
//!     .flow("score", "reject")
//!     .flow("approve", "notify")
//!     .flow("reject", "notify")
//!     .flow("notify", "end")
//!     .build()
//!     .expect("structurally valid net");
//!
//! assert_eq!(net.tasks().count(), 4);
//! ```

mod builder;
mod ids;
mod net;
mod predicate;
mod validate;

pub use builder::{NetBuilder, TaskDef};
pub use ids::{ConditionId, NodeRef, SpecificationId, TaskId};
pub use net::{
    CancellationSet, CondIdx, Condition, CreationMode, JoinType, MultiInstance, NetSpec,
    OutputFlow, ResolvedRef, SplitType, Task, TaskIdx,
};
pub use predicate::Predicate;
pub use validate::StructuralError;
