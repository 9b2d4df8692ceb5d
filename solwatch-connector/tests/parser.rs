mod common;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use common::*;
use solana_sdk::pubkey::Pubkey;
use solwatch_connector::{
    decoder::{DecodeOptions, EventDecoder},
    events::EventContext,
    parser::{EventParser, ExecutionStack, InvocationFrame, LogLine},
    ParseError,
};
use std::sync::Arc;

fn parser(program: Pubkey, options: DecodeOptions) -> EventParser {
    EventParser::new(program, EventDecoder::new(Arc::new(registry()), options))
}

fn lenient(program: Pubkey) -> EventParser {
    parser(program, DecodeOptions::default())
}

fn strict(program: Pubkey) -> EventParser {
    parser(
        program,
        DecodeOptions {
            strict: true,
            ..DecodeOptions::default()
        },
    )
}

fn context(slot: u64) -> EventContext {
    EventContext {
        slot,
        signature: format!("sig-{slot}"),
        ..EventContext::default()
    }
}

fn names(events: &[solwatch_connector::ParsedEvent]) -> Vec<&str> {
    events.iter().map(|e| e.name()).collect()
}

#[test]
fn test_single_event_is_stamped_with_context() {
    let abc = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        log(&transfer_payload(42)),
        success(&abc),
    ];

    let events = lenient(abc).parse_logs(&logs, context(99)).unwrap();

    assert_eq!(names(&events), ["Transfer"]);
    let event = &events[0];
    assert_eq!(event.program_id, abc);
    assert_eq!(event.context.slot, 99);
    assert_eq!(event.context.signature, "sig-99");
    assert_eq!(event.field("amount").and_then(|v| v.as_u64()), Some(42));
    assert!(event.field("memo").unwrap().is_null());
    assert!(event.event.is_valid());
}

#[test]
fn test_payload_inside_foreign_frame_is_not_attributed() {
    let abc = Pubkey::new_unique();
    let xyz = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        invoke(&xyz, 2),
        log(&transfer_payload(1)),
        success(&xyz),
        success(&abc),
    ];

    let events = lenient(abc).parse_logs(&logs, context(1)).unwrap();
    assert!(events.is_empty());
}

#[test]
fn test_events_after_nested_call_return_are_attributed() {
    let abc = Pubkey::new_unique();
    let xyz = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        data(&transfer_payload(1)),
        invoke(&xyz, 2),
        data(&closed_payload("foreign")),
        success(&xyz),
        data(&closed_payload("ours")),
        success(&abc),
    ];

    let events = lenient(abc).parse_logs(&logs, context(1)).unwrap();

    assert_eq!(names(&events), ["Transfer", "Closed"]);
    assert_eq!(events[1].field("reason").and_then(|v| v.as_str()), Some("ours"));
    assert!(events.iter().all(|e| e.context == context(1) && e.program_id == abc));
}

#[test]
fn test_reentrant_invocation_of_target_is_attributed() {
    let abc = Pubkey::new_unique();
    let xyz = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        invoke(&xyz, 2),
        invoke(&abc, 3),
        data(&transfer_payload(3)),
        success(&abc),
        log(&transfer_payload(2)),
        success(&xyz),
        success(&abc),
    ];

    let events = lenient(abc).parse_logs(&logs, context(1)).unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].field("amount").and_then(|v| v.as_u64()), Some(3));
}

#[test]
fn test_multiple_top_level_instructions() {
    let abc = Pubkey::new_unique();
    let other = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        data(&transfer_payload(1)),
        success(&abc),
        invoke(&other, 1),
        data(&transfer_payload(2)),
        success(&other),
        invoke(&abc, 1),
        data(&transfer_payload(3)),
        success(&abc),
    ];

    let events = lenient(abc).parse_logs(&logs, context(1)).unwrap();

    let amounts: Vec<_> = events
        .iter()
        .filter_map(|e| e.field("amount").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(amounts, [1, 3]);
}

#[test]
fn test_balanced_batch_leaves_stack_empty() {
    let abc = Pubkey::new_unique();
    let xyz = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        invoke(&xyz, 2),
        invoke(&abc, 3),
        success(&abc),
        success(&xyz),
        success(&abc),
        invoke(&xyz, 1),
        success(&xyz),
    ];

    let parser = lenient(abc);
    let mut events = parser.parse(logs.iter().map(String::as_str), context(1));
    assert!(events.by_ref().all(|r| r.is_ok()));
    assert_eq!(events.depth(), 0);
}

#[test]
fn test_non_program_lines_are_ignored() {
    let abc = Pubkey::new_unique();
    let logs = vec![
        "Log truncated".to_string(),
        invoke(&abc, 1),
        "some runtime message".to_string(),
        data(&transfer_payload(5)),
        success(&abc),
    ];

    let events = lenient(abc).parse_logs(&logs, context(1)).unwrap();
    assert_eq!(names(&events), ["Transfer"]);
}

#[test]
fn test_batch_not_opening_with_top_level_invoke() {
    let abc = Pubkey::new_unique();
    let logs = vec![invoke(&abc, 2), data(&transfer_payload(1)), success(&abc)];

    assert!(lenient(abc).parse_logs(&logs, context(1)).unwrap().is_empty());
    assert!(matches!(
        strict(abc).parse_logs(&logs, context(1)),
        Err(ParseError::MalformedLogSequence(line)) if line == logs[0]
    ));
}

#[test]
fn test_empty_batch() {
    let abc = Pubkey::new_unique();
    let logs: Vec<String> = Vec::new();
    assert!(strict(abc).parse_logs(&logs, context(1)).unwrap().is_empty());
}

#[test]
fn test_lenient_mode_skips_bad_payloads() {
    let abc = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        data("!!not base64!!"),
        data(&transfer_payload(1)),
        success(&abc),
    ];

    let events = lenient(abc).parse_logs(&logs, context(1)).unwrap();
    assert_eq!(names(&events), ["Transfer"]);
}

#[test]
fn test_strict_mode_stops_at_first_decode_error() {
    let abc = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        data(&transfer_payload(1)),
        data("!!not base64!!"),
        data(&transfer_payload(2)),
        success(&abc),
    ];

    let parser = strict(abc);
    let mut events = parser.parse(logs.iter().map(String::as_str), context(1));

    assert_eq!(events.next().unwrap().unwrap().name(), "Transfer");
    assert!(matches!(events.next(), Some(Err(ParseError::DecodeFailure(_)))));
    assert!(events.next().is_none());
    assert!(events.next().is_none());
}

#[test]
fn test_strict_mode_ignores_plain_log_messages() {
    let abc = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        "Program log: Instruction: Transfer".to_string(),
        data(&transfer_payload(1)),
        log("done"),
        data(&closed_payload("x")),
        success(&abc),
    ];

    let events = strict(abc).parse_logs(&logs, context(1)).unwrap();
    assert_eq!(names(&events), ["Transfer", "Closed"]);
}

#[test]
fn test_lenient_mode_counts_undecodable_event_bodies() {
    let abc = Pubkey::new_unique();
    let mut truncated = registry()
        .encode_event("Transfer", &transfer_fields(abc, 9, None))
        .unwrap();
    truncated.truncate(truncated.len() - 2);
    let logs = vec![
        invoke(&abc, 1),
        data(&BASE64.encode(&truncated)),
        data("!!not base64!!"),
        data(&transfer_payload(1)),
        success(&abc),
    ];

    let parser = lenient(abc);
    let mut events = parser.parse(logs.iter().map(String::as_str), context(1));
    let parsed: Vec<_> = events.by_ref().collect::<Result<_, _>>().unwrap();

    assert_eq!(names(&parsed), ["Transfer"]);
    assert_eq!(events.skipped(), 1);
}

#[test]
fn test_stack_underflow_aborts_batch() {
    let abc = Pubkey::new_unique();
    let xyz = Pubkey::new_unique();
    let logs = vec![
        invoke(&abc, 1),
        success(&abc),
        success(&xyz),
        invoke(&abc, 1),
        data(&transfer_payload(1)),
        success(&abc),
    ];

    let parser = lenient(abc);
    let mut events = parser.parse(logs.iter().map(String::as_str), context(1));

    let err = events.next().unwrap().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, ParseError::StackUnderflow(line) if line == logs[2]));
    assert!(events.next().is_none());
}

#[test]
fn test_classify_log_lines() {
    assert_eq!(
        LogLine::classify("Program ABC invoke [2]"),
        LogLine::Invoke { program: "ABC", depth: 2 }
    );
    assert_eq!(
        LogLine::classify("Program ABC success"),
        LogLine::Success { program: "ABC" }
    );
    assert_eq!(LogLine::classify("Program data: AAEC"), LogLine::Data("AAEC"));
    assert_eq!(LogLine::classify("Program log: hello"), LogLine::Log("hello"));
    assert_eq!(LogLine::classify("Program ABC failed: oops"), LogLine::Other);
    assert_eq!(LogLine::classify("Program ABC invoke [x]"), LogLine::Other);
}

#[test]
fn test_execution_stack() {
    let mut stack = ExecutionStack::new();
    stack.push(InvocationFrame::Program("ABC".into()));
    stack.push(InvocationFrame::Foreign);

    assert_eq!(stack.depth(), 2);
    assert_eq!(stack.top(), Some(&InvocationFrame::Foreign));
    assert_eq!(stack.pop("a").unwrap(), InvocationFrame::Foreign);
    assert_eq!(stack.pop("b").unwrap(), InvocationFrame::Program("ABC".into()));
    assert!(stack.is_empty());
    assert_eq!(
        stack.pop("c").unwrap_err(),
        ParseError::StackUnderflow("c".into())
    );
}
