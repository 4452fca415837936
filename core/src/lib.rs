pub mod analysis;
pub mod ast;
pub mod codegen;
pub mod dialect;
pub mod error;
pub mod location;
pub mod object;
pub mod optimize;
pub mod pipeline;
pub mod printer;
pub mod reports;
pub mod source;

pub use codegen::{Assembly, LinkedBinary};
pub use dialect::{dialect, Dialect, KilnVersion, Language};
pub use error::{CodegenError, Unimplemented};
pub use location::{Location, Span};
pub use object::{DataSegment, SubNode, Unit};
pub use optimize::{DEFAULT_CLEANUP_STEPS, DEFAULT_STEPS};
pub use pipeline::{
    KilnStack, Machine, MachineAssemblyObject, OptimizerSettings, PipelineState, DEPLOYED_SUFFIX,
};
pub use printer::DebugInfoSelection;
pub use reports::{Report, ReportCollector, Severity};
pub use source::Source;
