//! Gamebook Builder (pipeline stage)
//!
//! Assembles the final engine artifact from sequenced (and possibly
//! repaired) portions. Guarantees on the way out:
//! - a `background` section always exists and always reaches section 1,
//! - stub sections exist for every allowlisted known-missing id, flagged
//!   `provenance.stub`,
//! - metadata carries the start section, the validator version this crate
//!   ships, and the expected section range,
//! - sections are ordered background first, then by section number.

use async_trait::async_trait;

use crate::core::artifact;
use crate::model::{
    Event, Gamebook, Metadata, Provenance, Section, SectionType, SequencedPortion,
    BACKGROUND_SECTION_ID,
};
use crate::pipeline::stage::{PipelineStage, StageContext, StageOutcome, StageResult};
use crate::validation::VALIDATOR_VERSION;

use crate::escalation::PORTIONS_REPAIRED;
use crate::extraction::sequence::PORTIONS_SEQUENCED;

pub const GAMEBOOK_JSON: &str = "gamebook.json";

pub struct BuildGamebook;

#[async_trait]
impl PipelineStage for BuildGamebook {
    fn module_id(&self) -> &'static str {
        "build_gamebook"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        // Prefer repaired portions when the escalation loop ran.
        let input = ctx
            .inputs
            .get(PORTIONS_REPAIRED)
            .map(|p| p.to_path_buf())
            .or_else(|| ctx.inputs.get(PORTIONS_SEQUENCED).map(|p| p.to_path_buf()))
            .ok_or_else(|| {
                crate::pipeline::stage::StageError::Input(
                    "no sequenced or repaired portions upstream".to_string(),
                )
            })?;
        let portions: Vec<SequencedPortion> = artifact::read_jsonl(&input)?;

        let gamebook = build_gamebook(
            portions,
            ctx.book.title.clone(),
            ctx.book.expected_range,
            &ctx.book.known_missing_sections,
        );

        tracing::info!(sections = gamebook.sections.len(), "gamebook assembled");
        ctx.meter.record_items(gamebook.sections.len() as u64);
        ctx.store.write_json(GAMEBOOK_JSON, &gamebook)?;
        Ok(StageOutcome::Done)
    }
}

/// Pure assembly from sequenced portions.
pub fn build_gamebook(
    portions: Vec<SequencedPortion>,
    title: Option<String>,
    expected_range: (u32, u32),
    known_missing: &[u32],
) -> Gamebook {
    let mut sections: Vec<Section> = portions.into_iter().map(section_from_portion).collect();

    if !sections.iter().any(|s| s.id == BACKGROUND_SECTION_ID) {
        sections.push(synthetic_background());
    }

    // Stubs only for the explicit allowlist of physically missing pages.
    for id in known_missing {
        if !sections.iter().any(|s| s.id == id.to_string()) {
            sections.push(stub_section(*id));
        }
    }

    // background first, then numeric order.
    sections.sort_by_key(|s| match s.id.parse::<u32>() {
        Ok(n) => (1, n),
        Err(_) => (0, 0),
    });

    Gamebook {
        metadata: Metadata {
            title,
            author: None,
            start_section: "1".to_string(),
            validator_version: VALIDATOR_VERSION.to_string(),
            expected_range,
        },
        sections,
    }
}

fn section_from_portion(portion: SequencedPortion) -> Section {
    let is_background = portion.section_id == BACKGROUND_SECTION_ID;
    Section {
        id: portion.section_id,
        section_num: portion.section_num,
        section_type: if is_background {
            SectionType::Background
        } else {
            SectionType::Gameplay
        },
        is_gameplay_section: !is_background,
        text: portion.text,
        clean_text: portion.clean_text,
        choices: portion.choices,
        sequence: portion.sequence,
        provenance: Some(Provenance {
            stub: false,
            page_start: Some(portion.page_start),
            page_end: Some(portion.page_end),
            reocr_suggested: false,
        }),
    }
}

fn synthetic_background() -> Section {
    Section {
        id: BACKGROUND_SECTION_ID.to_string(),
        section_num: None,
        section_type: SectionType::Background,
        is_gameplay_section: false,
        text: String::new(),
        clean_text: String::new(),
        choices: vec![],
        sequence: vec![Event::choice_to("1")],
        provenance: None,
    }
}

fn stub_section(id: u32) -> Section {
    Section {
        id: id.to_string(),
        section_num: Some(id),
        section_type: SectionType::Stub,
        is_gameplay_section: true,
        text: String::new(),
        clean_text: String::new(),
        choices: vec![],
        sequence: vec![],
        provenance: Some(Provenance {
            stub: true,
            page_start: None,
            page_end: None,
            reocr_suggested: false,
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
