//! Gamebook Validation
//!
//! Three layers with distinct jobs:
//! - `schema` + `logic` + `portable`: the portable verdict, shippable with
//!   the gamebook and reproducible engine-side (`gamebook-validator`),
//! - `forensics`: rich non-gating diagnostics for humans,
//! - `game_ready`: the consolidated report and the pass gate.

pub mod forensics;
pub mod game_ready;
pub mod logic;
pub mod portable;
pub mod report;
pub mod schema;

pub use forensics::ValidateForensics;
pub use game_ready::ValidateGameReady;
pub use portable::ValidateGamebook;

/// The validator version stamped into `metadata.validatorVersion` at build
/// time and compared at validation time. A mismatch is a warning, never a
/// failure.
pub const VALIDATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
