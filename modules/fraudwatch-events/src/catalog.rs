//! Built-in event types emitted by the fraud pipeline.
//!
//! Seeded into the registry at bootstrap. Versioned types are pinned to
//! `CURRENT_GENERATION`; the legacy ones predate the generation scheme.

use serde_json::json;

use crate::types::EventTypeSpec;

pub const CURRENT_GENERATION: &str = "2025-09";

pub const DIALOGUE_TURN: &str = "DialogueTurn";
pub const SCORE_CHAT: &str = "ScoreChat";
pub const EVIDENCE_STORED: &str = "EvidenceStored";
pub const JURY_ASSESSMENT: &str = "JuryAssessment";
pub const EXPLORATION_DECISION: &str = "ExplorationDecision";
pub const PLAN_ISSUED: &str = "PlanIssued";
pub const CHAT_PLAN_ISSUED: &str = "ChatPlanIssued";
pub const ENTITY_RESOLVED: &str = "EntityResolved";
pub const MANUAL_ASSESSMENT: &str = "ManualAssessment";

pub const RUN_STARTED: &str = "RunStarted";
pub const UI_STEP_RECORDED: &str = "UiStepRecorded";
pub const LEAD_DISCOVERED: &str = "LeadDiscovered";

pub fn builtin_catalog() -> Vec<EventTypeSpec> {
    let mut specs = versioned_types();
    specs.extend(legacy_types());
    specs
}

fn versioned(event_type: &str) -> EventTypeSpec {
    EventTypeSpec::versioned(event_type, CURRENT_GENERATION).require(["schema_generation"])
}

fn versioned_types() -> Vec<EventTypeSpec> {
    vec![
        versioned(DIALOGUE_TURN)
            .describe("One message in a monitored conversation, from the agent or the target")
            .require(["conv_id", "role", "modality"])
            .optional(["text", "media_uri", "turn_index"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "conv_id": "conv_01",
                "role": "agent",
                "modality": "text",
                "text": "hi"
            })),
        versioned(SCORE_CHAT)
            .describe("Risk verdict for a conversation after a target turn")
            .require(["conv_id", "verdict", "turn_index", "rule_version", "basis"])
            .optional(["certainty", "model_state_raw", "model_evidence"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "conv_id": "conv_01",
                "verdict": "A",
                "turn_index": 3,
                "rule_version": "harm-v1.2",
                "basis": {
                    "legal_breaches": [{
                        "jurisdiction": "US",
                        "code": "18 U.S.C. 1343",
                        "requirement": "No solicitation of funds under false pretenses",
                        "observed_quote": "send the deposit to this wallet first",
                        "uri": "https://www.law.cornell.edu/uscode/text/18/1343"
                    }],
                    "risk_signals": ["request_payment", "provide_wallet"]
                },
                "certainty": "med"
            })),
        versioned(EVIDENCE_STORED)
            .describe("Bundle of captured media backing a decision")
            .require(["files"])
            .optional(["note", "preview", "conv_id"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "files": [{"kind": "screenshot", "duration_s": 0}],
                "note": "stop_on_flags"
            })),
        versioned(JURY_ASSESSMENT)
            .describe("Jury service verdict over a scored conversation")
            .require(["verdict", "confidence", "rule_version"])
            .optional(["conv_id", "rationale", "jurors"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "verdict": "B",
                "confidence": 0.72,
                "rule_version": "harm-v1.2"
            })),
        versioned(EXPLORATION_DECISION)
            .describe("Next action chosen by the exploration agent and why")
            .require(["next_action", "reason"])
            .optional(["screen_summary", "candidates"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "next_action": "open_profile",
                "reason": "handle matches a known wallet-drainer pattern"
            })),
        versioned(PLAN_ISSUED)
            .describe("Step plan handed to a UI driver")
            .require(["driver", "steps", "idempotency_key"])
            .optional(["goal", "device_id"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "driver": "uiautomator2",
                "steps": [{"action": "click", "x": 540, "y": 1200}],
                "idempotency_key": "plan-run42-step7"
            })),
        versioned(CHAT_PLAN_ISSUED)
            .describe("Conversation plan handed to the chat agent")
            .require(["conv_id"])
            .optional(["persona", "objective", "limits", "guard", "stop_on_flags"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "conv_id": "conv_01",
                "persona": "consumer",
                "limits": {"max_turns": 6, "wait_seconds": 10}
            })),
        versioned(ENTITY_RESOLVED)
            .describe("Accounts grouped into one real-world entity")
            .require(["entity_id", "members", "method", "method_version", "confidence"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "entity_id": "ent_77",
                "members": ["@wallet_helper", "@wallet_helper2"],
                "method": "handle_similarity",
                "method_version": "1.0",
                "confidence": 0.9
            })),
        versioned(MANUAL_ASSESSMENT)
            .describe("Human review label for a conversation or account")
            .require(["scope", "label", "annotator_id", "scheme_version"])
            .optional(["target_id", "notes"])
            .example(json!({
                "schema_generation": CURRENT_GENERATION,
                "scope": "conversation",
                "label": "C",
                "annotator_id": "reviewer-3",
                "scheme_version": "abc-2025"
            })),
    ]
}

fn legacy_types() -> Vec<EventTypeSpec> {
    vec![
        EventTypeSpec::legacy(RUN_STARTED)
            .describe("Device automation run opened")
            .optional(["metadata"])
            .example(json!({"metadata": {"device": "emulator-5554"}})),
        EventTypeSpec::legacy(UI_STEP_RECORDED)
            .describe("One UI automation step with model output and execution results")
            .optional(["instruction", "model_output", "parsed_action", "results", "error"])
            .example(json!({
                "instruction": "open the search tab",
                "model_output": "Action: click(start_box='(120,2200)')",
                "results": [{"ok": true}],
                "error": null
            })),
        EventTypeSpec::legacy(LEAD_DISCOVERED)
            .describe("Suspicious account spotted while exploring a feed")
            .optional([
                "display_name",
                "handle",
                "profile_url",
                "suspicious",
                "score",
                "reasons",
                "evidence",
            ])
            .example(json!({
                "handle": "@wallet_helper",
                "suspicious": true,
                "score": 0.8,
                "reasons": ["asks for seed phrase"]
            })),
    ]
}
