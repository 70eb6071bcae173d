//! Artifact Data Model
//!
//! Typed records for every artifact the pipeline reads or writes, in
//! dependency order: OCR elements in, engine-ready gamebook out.
//!
//! All records serialize as JSON (single documents or JSONL streams).
//! Stamping metadata (`schema_version`, `module_id`, `run_id`, `created_at`)
//! is injected by the driver after a stage finishes, so the types here do
//! not carry it; deserialization tolerates the extra fields.

pub mod boundary;
pub mod element;
pub mod event;
pub mod gamebook;
pub mod header;
pub mod portion;
pub mod structure;

pub use boundary::{BoundarySource, OrderingConflict, OrderingConflicts, SectionBoundary};
pub use element::{CoordOrigin, ElementCore, ElementKind, HAlign, Layout, PageHtml, RawElement};
pub use event::{
    Amount, CombatOutcomes, Condition, Endpoint, Enemy, Event, ItemAction, ItemEvent, Stat,
    Terminal,
};
pub use gamebook::{ChoiceRef, Gamebook, Metadata, Provenance, Section, SectionType};
pub use header::{HeaderCandidate, MacroHeader};
pub use portion::{EnrichedPortion, ExtractedEvent, SequencedPortion};
pub use structure::{GameSection, MacroSection, SectionStatus, SectionsStructured};

/// Reserved id of the synthetic background section.
pub const BACKGROUND_SECTION_ID: &str = "background";

/// Default upper bound of the gameplay section range.
pub const DEFAULT_SECTION_MAX: u32 = 400;
