//! Pipeline Runtime
//!
//! Recipe → plan → run: the DAG driver, stage trait, run state, and the
//! registry mapping recipe `module_id`s onto stage implementations.

pub mod driver;
pub mod recipe;
pub mod stage;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;

use stage::PipelineStage;

/// Every implemented stage, keyed by the `module_id` recipes use. External
/// collaborators (PDF raster, OCR) are not here — recipes hand their
/// artifacts in via `inputs`.
pub fn stage_registry() -> HashMap<&'static str, Arc<dyn PipelineStage>> {
    let stages: Vec<Arc<dyn PipelineStage>> = vec![
        Arc::new(crate::ingestion::ReduceElements),
        Arc::new(crate::ingestion::ClassifyHeaders),
        Arc::new(crate::ingestion::StructureSections),
        Arc::new(crate::ingestion::AssembleBoundaries),
        Arc::new(crate::ingestion::VerifyBoundaries),
        Arc::new(crate::extraction::ExtractSections),
        Arc::new(crate::extraction::OrderSequences),
        Arc::new(crate::escalation::RepairChoices),
        Arc::new(crate::gamebook::BuildGamebook),
        Arc::new(crate::validation::ValidateGamebook),
        Arc::new(crate::validation::ValidateForensics),
        Arc::new(crate::validation::ValidateGameReady),
    ];
    stages.into_iter().map(|s| (s.module_id(), s)).collect()
}
