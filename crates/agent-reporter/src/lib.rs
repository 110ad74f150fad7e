//! The leader-elected half of the fleet agent: the remote channel to the
//! Director, the snapshot/diagnostics assemblers, the directive handler,
//! the metrics intake listener, and the reporter loop that ties them
//! together (§4.6–§4.12).

pub mod assembler;
pub mod comm;
pub mod directive;
pub mod metrics_ingest;
pub mod reporter;

pub use comm::{Comm, CommError, DirectiveStream};
pub use directive::ReportingState;
pub use reporter::{Reporter, ReporterConfig};
