//! Per-file pipeline lifecycle. A plain enum with an explicit, checked `advance` transition
//! table — the in-process analog of the folder-scan driver's state tracking. Each successful
//! stage call advances exactly one step forward; any stage can fail into `Failed`.

use common::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStage {
    Ready,
    ContentExtracted,
    ChunksEmbedded,
    GraphEnriched,
    Finalized,
    Failed,
}

impl IngestionStage {
    const ORDER: [Self; 5] = [
        Self::Ready,
        Self::ContentExtracted,
        Self::ChunksEmbedded,
        Self::GraphEnriched,
        Self::Finalized,
    ];

    fn rank(self) -> Option<usize> {
        Self::ORDER.iter().position(|s| *s == self)
    }

    /// Moves forward exactly one step in `ORDER`, or to `Failed` from anywhere. Rejects skipping
    /// a stage or moving backward — a programming error in the driver, not a runtime condition.
    pub fn advance(self, to: Self) -> Result<Self, AppError> {
        if to == Self::Failed {
            return Ok(Self::Failed);
        }
        let (Some(from_rank), Some(to_rank)) = (self.rank(), to.rank()) else {
            return Err(AppError::InternalError(format!("invalid pipeline transition {self:?} -> {to:?}")));
        };
        if to_rank != from_rank + 1 {
            return Err(AppError::InternalError(format!("invalid pipeline transition {self:?} -> {to:?}")));
        }
        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_one_step_at_a_time() {
        let stage = IngestionStage::Ready.advance(IngestionStage::ContentExtracted).unwrap();
        assert_eq!(stage, IngestionStage::ContentExtracted);
    }

    #[test]
    fn rejects_skipping_a_stage() {
        let err = IngestionStage::Ready.advance(IngestionStage::ChunksEmbedded).unwrap_err();
        assert!(matches!(err, AppError::InternalError(_)));
    }

    #[test]
    fn any_stage_can_fail() {
        let stage = IngestionStage::ContentExtracted.advance(IngestionStage::Failed).unwrap();
        assert_eq!(stage, IngestionStage::Failed);
    }
}
