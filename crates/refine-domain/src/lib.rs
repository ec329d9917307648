// refine-domain library entry point
pub mod batch;
pub mod error;
pub mod event;
pub mod flow;
pub mod template;

pub use batch::{Batch, BatchFlag, BatchMetrics, BatchStatus, RecoveryPour};
pub use error::DomainError;
pub use event::{Actor, BatchEvent, BatchEventKind};
pub use flow::{Flow, FlowEdge, FlowKey, FlowNode, FlowStatus, LayoutHint, NodeKind, Pipeline};
pub use template::{Template, TemplateType};
