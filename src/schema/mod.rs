pub mod report;
pub mod structure;
pub mod task;
pub mod wire;

pub use report::{
    ChangeKind, ExecutionResult, FormatChange, TaskResult, ValidationReport,
};
pub use structure::{
    Annotation, DocumentSnapshot, Heading, Hyperlink, LinkKind, Structure, Style, StyleKind,
    TocEntry,
};
pub use task::{Locator, Plan, RiskLevel, Task, TaskKind};
pub use wire::{task_plan_schema, LocatorWire, TaskPlanWire, TaskWire};
