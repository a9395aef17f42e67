//! Shared building blocks of the inspection pipeline: the finding and
//! redaction model, source descriptors, the per-scan state, the external
//! GuardResult contract, and the Stage seam every pipeline step implements.

pub mod finding;
pub mod result;
pub mod source;
pub mod stage;
pub mod state;

pub use finding::{codes, Finding, Redaction, Span};
pub use result::{round_score, Decision, GuardResult};
pub use source::SourceDescriptor;
pub use stage::Stage;
pub use state::ScanState;
