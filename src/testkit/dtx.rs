//! A no-op distributed-transaction handle: every begin/commit pair
//! succeeds immediately, with no concurrency control to lose a race
//! against. Adequate for exercising the engine's own logic; a real
//! deployment's DTX layer is out of scope per spec.md §1.

use crate::dtx::{DtxHandle, DtxOutcome};
use crate::AggResult;

#[derive(Debug, Default)]
pub struct NoopDtx;

impl DtxHandle for NoopDtx {
    fn begin(&self) -> AggResult<()> {
        Ok(())
    }

    fn commit(&self) -> AggResult<DtxOutcome> {
        Ok(DtxOutcome::Committed)
    }

    fn abort(&self) {}
}
