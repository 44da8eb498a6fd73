use crate::common::{event, failure, response, session, stack_frame};
use scriptdbg::agent::value::ScopeValue;
use serde_json::json;

fn break_event(line: i64) -> String {
    event(
        "break",
        json!({
            "invocationText": "f()",
            "sourceLine": line,
            "sourceColumn": 2,
            "script": {"id": 59, "name": "http://a.js", "lineOffset": 0},
        }),
    )
}

#[test]
fn test_break_builds_call_stack() {
    let mut agent = session();
    agent.handle_debugger_output(&break_event(4)).unwrap();

    let packet = agent.backend().last();
    assert_eq!(packet["command"], "backtrace");
    assert_eq!(packet["arguments"], json!({"compactFormat": true}));
    assert!(!agent.is_paused());
    let header = agent.current_call_frame().unwrap();
    assert_eq!(header.source_id, Some(59));
    assert_eq!(header.line, 5);

    let seq = agent.backend().last_seq();
    let frames = json!({
        "fromFrame": 0,
        "toFrame": 2,
        "totalFrames": 2,
        "frames": [stack_frame(4, "inner", 59), stack_frame(10, "outer", 59)],
    });
    agent
        .handle_debugger_output(&response(seq, "backtrace", true, frames))
        .unwrap();

    assert!(agent.is_paused());
    let top = agent.current_call_frame().unwrap();
    let chain = top
        .iter()
        .map(|f| (f.function_name.clone().unwrap(), f.line, f.frame_number))
        .collect::<Vec<_>>();
    assert_eq!(
        chain,
        [
            ("inner".to_string(), 5, Some(0)),
            ("outer".to_string(), 11, Some(1))
        ]
    );

    let names = top.local_scope.keys().cloned().collect::<Vec<_>>();
    assert_eq!(names, ["n", "x", "this"]);
    assert_eq!(top.local_scope["n"], ScopeValue::Primitive(json!(1)));
    assert_eq!(top.local_scope["x"].to_string(), "undefined");
    assert_eq!(top.local_scope["this"].to_string(), "#<global @2>");

    let paused = agent.hook().paused.borrow();
    assert_eq!(paused.len(), 1);
    assert_eq!(&paused[0], top);
}

#[test]
fn test_empty_backtrace_keeps_header() {
    let mut agent = session();
    agent.handle_debugger_output(&break_event(0)).unwrap();
    let seq = agent.backend().last_seq();
    agent
        .handle_debugger_output(&response(seq, "backtrace", true, json!({"frames": []})))
        .unwrap();

    assert!(agent.is_paused());
    let top = agent.current_call_frame().unwrap();
    assert_eq!((top.source_id, top.line), (Some(59), 1));
    assert!(top.caller.is_none());
}

#[test]
fn test_stale_backtrace_ignored() {
    let mut agent = session();
    agent.handle_debugger_output(&break_event(0)).unwrap();
    let seq = agent.backend().last_seq();
    agent.reset();

    let frames = json!({"frames": [stack_frame(4, "inner", 59)]});
    agent
        .handle_debugger_output(&response(seq, "backtrace", true, frames))
        .unwrap();
    assert!(!agent.is_paused());
    assert!(agent.current_call_frame().is_none());
    assert!(agent.hook().paused.borrow().is_empty());
}

#[test]
fn test_exception_without_pause() {
    let mut agent = session();
    agent.set_pause_on_exceptions(false);
    assert!(!agent.pause_on_exceptions());

    agent
        .handle_debugger_output(&event(
            "exception",
            json!({"uncaught": true, "sourceLine": 3, "script": {"id": 59}}),
        ))
        .unwrap();

    assert_eq!(agent.backend().last()["command"], "continue");
    assert!(agent.backend().last().get("arguments").is_none());
    assert_eq!(agent.backend().count("backtrace"), 0);
    assert!(agent.current_call_frame().is_none());
}

#[test]
fn test_exception_with_pause() {
    let mut agent = session();
    assert!(agent.pause_on_exceptions());

    agent
        .handle_debugger_output(&event(
            "exception",
            json!({"uncaught": false, "sourceLine": 3, "script": {"id": 59, "name": "http://a.js"}}),
        ))
        .unwrap();

    assert_eq!(agent.backend().last()["command"], "backtrace");
    assert_eq!(agent.backend().count("continue"), 0);
    let frame = agent.current_call_frame().unwrap();
    assert_eq!(frame.source_id, Some(59));
    assert_eq!(frame.line, 4);
}

#[test]
fn test_resume_and_steps() {
    struct TestCase {
        action: fn(&mut crate::common::TestAgent),
        arguments: Option<serde_json::Value>,
    }

    let cases = [
        TestCase {
            action: |a| a.resume_execution().unwrap(),
            arguments: None,
        },
        TestCase {
            action: |a| a.step_into_statement().unwrap(),
            arguments: Some(json!({"stepaction": "in", "stepcount": 1})),
        },
        TestCase {
            action: |a| a.step_out_of_function().unwrap(),
            arguments: Some(json!({"stepaction": "out", "stepcount": 1})),
        },
        TestCase {
            action: |a| a.step_over_statement().unwrap(),
            arguments: Some(json!({"stepaction": "next", "stepcount": 1})),
        },
    ];

    for tc in cases {
        let mut agent = session();
        (tc.action)(&mut agent);
        let packet = agent.backend().last();
        assert_eq!(packet["command"], "continue");
        assert_eq!(packet.get("arguments").cloned(), tc.arguments);
    }
}

#[test]
fn test_continue_response_resumes() {
    let mut agent = session();
    agent.handle_debugger_output(&break_event(0)).unwrap();
    let seq = agent.backend().last_seq();
    agent
        .handle_debugger_output(&response(seq, "backtrace", true, json!({"frames": []})))
        .unwrap();
    assert!(agent.is_paused());

    agent.step_over_statement().unwrap();
    let seq = agent.backend().last_seq();

    agent
        .handle_debugger_output(&failure(seq, "continue", "not paused"))
        .unwrap();
    assert!(agent.is_paused());
    assert_eq!(agent.hook().resumed.get(), 0);

    agent
        .handle_debugger_output(&response(seq, "continue", true, json!(null)))
        .unwrap();
    assert!(!agent.is_paused());
    assert!(agent.current_call_frame().is_none());
    assert_eq!(agent.hook().resumed.get(), 1);
}

#[test]
fn test_pause_execution() {
    let mut agent = session();
    let sent = agent.backend().sent.len();
    agent.pause_execution().unwrap();
    assert_eq!(agent.backend().debug_breaks, 1);
    assert_eq!(agent.backend().sent.len(), sent);
}
