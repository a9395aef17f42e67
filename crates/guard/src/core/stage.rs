use crate::core::state::ScanState;
use crate::error::Result;

/// One step of the inspection pipeline.
///
/// Stages are pure with respect to everything except the `ScanState` they
/// are handed: same state in, same state out. The pipeline runs them
/// strictly in declaration order with no suspension points, which is what
/// makes a whole scan a deterministic function of its input bytes and the
/// policy snapshot.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, state: &mut ScanState) -> Result<()>;
}
