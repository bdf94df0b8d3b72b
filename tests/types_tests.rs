//! Tests for core types.

use chrono::Utc;
use pretty_assertions::assert_eq;
use roci_stream::types::*;
use serde_json::json;

#[test]
fn model_message_system() {
    let msg = ModelMessage::system("You are helpful.");
    assert_eq!(msg.role, Role::System);
    assert_eq!(msg.text(), "You are helpful.");
}

#[test]
fn model_message_tool_result() {
    let msg = ModelMessage::tool_result("call_1", json!({"result": 42}), false);
    assert_eq!(msg.role, Role::Tool);
    assert!(msg.text().is_empty());
}

#[test]
fn model_message_serde_roundtrip() {
    let msg = ModelMessage::user("test");
    let json = serde_json::to_string(&msg).unwrap();
    let deserialized: ModelMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized, msg);
}

#[test]
fn usage_sum_is_null_absorbing() {
    let steps = [
        Usage::new(10, 20),
        Usage {
            output_tokens: Some(5),
            reasoning_tokens: Some(3),
            ..Default::default()
        },
    ];
    let total: Usage = steps.iter().sum();
    assert_eq!(total.input_tokens, Some(10));
    assert_eq!(total.output_tokens, Some(25));
    assert_eq!(total.total_tokens, Some(30));
    assert_eq!(total.reasoning_tokens, Some(3));
    assert_eq!(total.cached_input_tokens, None);
}

#[test]
fn usage_serializes_only_present_counters() {
    let json = serde_json::to_value(Usage::new(1, 2)).unwrap();
    assert_eq!(
        json,
        json!({"input_tokens": 1, "output_tokens": 2, "total_tokens": 3})
    );
}

#[test]
fn generation_settings_builder() {
    let settings = GenerationSettings::builder()
        .max_tokens(1000)
        .temperature(0.7)
        .build();
    assert_eq!(settings.max_tokens, Some(1000));
    assert_eq!(settings.temperature, Some(0.7));
    assert!(settings.top_p.is_none());
}

#[test]
fn finish_reason_display_and_serde_agree() {
    use std::str::FromStr;
    assert_eq!(FinishReason::ToolCalls.to_string(), "tool-calls");
    assert_eq!(
        serde_json::to_value(FinishReason::ContentFilter).unwrap(),
        json!("content-filter")
    );
    assert_eq!(FinishReason::from_str("unknown").unwrap(), FinishReason::Unknown);
}

#[test]
fn reasoning_effort_fromstr() {
    use std::str::FromStr;
    assert_eq!(ReasoningEffort::from_str("high").unwrap(), ReasoningEffort::High);
    assert_eq!(ReasoningEffort::from_str("low").unwrap(), ReasoningEffort::Low);
}

#[test]
fn call_warning_display() {
    let warning = CallWarning::UnsupportedSetting {
        setting: "seed".into(),
        details: Some("ignored".into()),
    };
    assert_eq!(warning.to_string(), "unsupported-setting(seed): ignored");
}

#[test]
fn stream_parts_are_tagged_kebab_case() {
    let part = ProviderStreamPart::text_delta("t1", "hi");
    assert_eq!(
        serde_json::to_value(&part).unwrap(),
        json!({"type": "text-delta", "id": "t1", "delta": "hi", "provider_metadata": null})
    );

    let parsed: TextStreamPart = serde_json::from_value(json!({"type": "abort"})).unwrap();
    assert_eq!(parsed, TextStreamPart::Abort);
}

#[test]
fn text_stream_part_classification() {
    assert!(TextStreamPart::Abort.is_terminal());
    assert!(!TextStreamPart::Start.is_terminal());
    assert!(!TextStreamPart::Start.is_chunk());

    let delta = TextStreamPart::TextDelta {
        id: "t".into(),
        text: "x".into(),
        provider_metadata: None,
    };
    assert!(delta.is_chunk());
    assert_eq!(delta.text_delta(), Some("x"));
}

fn sample_step() -> StepResult {
    StepResult {
        content: vec![
            StepContent::Reasoning {
                text: "think ".into(),
                provider_metadata: None,
            },
            StepContent::Text {
                text: "Hello ".into(),
                provider_metadata: None,
            },
            StepContent::ToolCall(ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "lookup".into(),
                input: json!({"q": 1}),
                provider_executed: None,
                provider_metadata: None,
            }),
            StepContent::Text {
                text: "world".into(),
                provider_metadata: None,
            },
            StepContent::Reasoning {
                text: "more".into(),
                provider_metadata: None,
            },
            StepContent::File(GeneratedFile::from_bytes("text/plain", b"abc")),
        ],
        finish_reason: FinishReason::ToolCalls,
        usage: Usage::new(4, 2),
        warnings: Vec::new(),
        request: RequestMetadata::default(),
        response: StepResponse {
            metadata: ResponseMetadata {
                id: "resp_1".into(),
                model_id: "m".into(),
                timestamp: Utc::now(),
                headers: None,
            },
            messages: Vec::new(),
        },
        provider_metadata: None,
    }
}

#[test]
fn step_result_accessors() {
    let step = sample_step();
    assert_eq!(step.text(), "Hello world");
    assert_eq!(step.reasoning(), vec!["think ", "more"]);
    assert_eq!(step.reasoning_text(), Some("think more".to_string()));
    assert_eq!(step.tool_calls()[0].tool_name, "lookup");
    assert!(step.tool_results().is_empty());
    assert_eq!(step.files()[0].bytes().unwrap(), b"abc".to_vec());
    assert!(step.sources().is_empty());
}

#[test]
fn step_without_reasoning_has_no_reasoning_text() {
    let mut step = sample_step();
    step.content
        .retain(|part| !matches!(part, StepContent::Reasoning { .. }));
    assert_eq!(step.reasoning_text(), None);
}

#[test]
fn step_response_flattens_metadata() {
    let step = sample_step();
    let json = serde_json::to_value(&step.response).unwrap();
    assert_eq!(json["id"], json!("resp_1"));
    assert_eq!(json["messages"], json!([]));
}
