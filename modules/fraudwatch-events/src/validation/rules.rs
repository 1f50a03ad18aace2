//! Refined per-type rules layered on top of the generic generation/key checks.

use super::{Fields, PayloadRule};
use crate::catalog;
use crate::error::Result;
use crate::types::Verdict;

pub const MODALITIES: &[&str] = &["text", "voice", "video", "image", "file", "call"];
pub const EVIDENCE_KINDS: &[&str] = &["screenshot", "screen_recording", "audio", "video"];
pub const ASSESSMENT_SCOPES: &[&str] = &["conversation", "account"];

/// The strategy table used by `ValidationGate::standard`.
pub fn standard_rules() -> Vec<(&'static str, Box<dyn PayloadRule>)> {
    vec![
        rule(catalog::DIALOGUE_TURN, DialogueTurn),
        rule(catalog::SCORE_CHAT, ScoreChat),
        rule(catalog::EVIDENCE_STORED, EvidenceStored),
        rule(catalog::JURY_ASSESSMENT, JuryAssessment),
        rule(catalog::EXPLORATION_DECISION, ExplorationDecision),
        rule(catalog::PLAN_ISSUED, PlanIssued),
        rule(catalog::CHAT_PLAN_ISSUED, ChatPlanIssued),
        rule(catalog::ENTITY_RESOLVED, EntityResolved),
        rule(catalog::MANUAL_ASSESSMENT, ManualAssessment),
    ]
}

fn rule(
    event_type: &'static str,
    rule: impl PayloadRule + 'static,
) -> (&'static str, Box<dyn PayloadRule>) {
    (event_type, Box::new(rule))
}

pub struct DialogueTurn;

impl PayloadRule for DialogueTurn {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        fields.one_of("modality", MODALITIES)?;
        Ok(())
    }
}

/// Verdict A must be justified by at least one legal breach citation, and
/// every citation must quote what was observed and point at the law broken.
pub struct ScoreChat;

impl PayloadRule for ScoreChat {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        let verdict = Verdict::parse(fields.one_of("verdict", &Verdict::ALL)?);
        let basis = fields.object("basis")?;
        let basis = basis.fields();
        let breaches = basis.optional_list("legal_breaches")?;

        for (index, item) in breaches.iter().enumerate() {
            let citation = basis.element("legal_breaches", index, item)?;
            let citation = citation.fields();
            citation.string("requirement")?;
            citation.string("observed_quote")?;
            if citation.non_empty_str("code").is_none() && citation.non_empty_str("uri").is_none()
            {
                return Err(citation.missing("code|uri"));
            }
        }

        if verdict == Some(Verdict::A) && breaches.is_empty() {
            return Err(basis.conditional(
                "legal_breaches",
                "must list at least one citation when verdict is A",
            ));
        }
        Ok(())
    }
}

pub struct EvidenceStored;

impl PayloadRule for EvidenceStored {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        for (index, item) in fields.non_empty_list("files")?.iter().enumerate() {
            let file = fields.element("files", index, item)?;
            file.fields().one_of("kind", EVIDENCE_KINDS)?;
        }
        Ok(())
    }
}

pub struct JuryAssessment;

impl PayloadRule for JuryAssessment {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        fields.one_of("verdict", &Verdict::ALL)?;
        fields.confidence("confidence")?;
        fields.string("rule_version")?;
        Ok(())
    }
}

pub struct ExplorationDecision;

impl PayloadRule for ExplorationDecision {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        fields.string("next_action")?;
        fields.string("reason")?;
        Ok(())
    }
}

pub struct PlanIssued;

impl PayloadRule for PlanIssued {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        fields.string("driver")?;
        fields.non_empty_list("steps")?;
        fields.string("idempotency_key")?;
        Ok(())
    }
}

pub struct ChatPlanIssued;

impl PayloadRule for ChatPlanIssued {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        fields.string("conv_id")?;
        Ok(())
    }
}

pub struct EntityResolved;

impl PayloadRule for EntityResolved {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        fields.string("entity_id")?;
        fields.non_empty_list("members")?;
        fields.string("method")?;
        fields.string("method_version")?;
        fields.confidence("confidence")?;
        Ok(())
    }
}

pub struct ManualAssessment;

impl PayloadRule for ManualAssessment {
    fn check(&self, fields: &Fields<'_>) -> Result<()> {
        fields.one_of("scope", ASSESSMENT_SCOPES)?;
        fields.one_of("label", &Verdict::ALL)?;
        fields.string("annotator_id")?;
        fields.string("scheme_version")?;
        Ok(())
    }
}
