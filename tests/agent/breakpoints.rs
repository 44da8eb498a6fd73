use crate::common::{failure, response, session};
use serde_json::json;

#[test]
fn test_add_breakpoint_line_conversion() {
    let mut agent = session();
    agent.add_breakpoint(59, 5).unwrap();

    let packet = agent.backend().last();
    assert_eq!(packet["command"], "setbreakpoint");
    assert_eq!(
        packet["arguments"],
        json!({"type": "scriptId", "target": 59, "line": 4})
    );

    let bp = agent.scripts().get_breakpoint(59, 4).unwrap();
    assert_eq!(bp.line(), 4);
    assert!(bp.remote_id().is_none());
}

#[test]
fn test_add_breakpoint_twice() {
    let mut agent = session();
    agent.add_breakpoint(59, 5).unwrap();
    agent.add_breakpoint(59, 5).unwrap();
    assert_eq!(agent.backend().count("setbreakpoint"), 1);

    agent.add_breakpoint(59, 6).unwrap();
    assert_eq!(agent.backend().count("setbreakpoint"), 2);
}

#[test]
fn test_add_breakpoint_unknown_script() {
    let mut agent = session();
    let sent = agent.backend().sent.len();
    agent.add_breakpoint(60, 5).unwrap();
    assert_eq!(agent.backend().sent.len(), sent);
    assert_eq!(agent.pending_requests(), 0);
}

#[test]
fn test_set_and_remove_breakpoint() {
    let mut agent = session();
    agent.add_breakpoint(59, 5).unwrap();
    let seq = agent.backend().last_seq();
    let body = json!({"type": "scriptId", "breakpoint": 12});
    agent
        .handle_debugger_output(&response(seq, "setbreakpoint", true, body))
        .unwrap();
    let bp = agent.scripts().get_breakpoint(59, 4).unwrap();
    assert_eq!(bp.remote_id(), Some(12));
    assert_eq!(agent.pending_requests(), 0);

    agent.remove_breakpoint(59, 5).unwrap();
    let packet = agent.backend().last();
    assert_eq!(packet["command"], "clearbreakpoint");
    assert_eq!(packet["arguments"], json!({"breakpoint": 12}));
    assert!(agent.scripts().get_breakpoint(59, 4).is_none());

    // second removal is a no-op
    agent.remove_breakpoint(59, 5).unwrap();
    assert_eq!(agent.backend().count("clearbreakpoint"), 1);
}

#[test]
fn test_remove_before_response() {
    let mut agent = session();
    agent.add_breakpoint(59, 5).unwrap();
    let seq = agent.backend().last_seq();

    agent.remove_breakpoint(59, 5).unwrap();
    assert_eq!(agent.backend().count("clearbreakpoint"), 0);
    assert!(agent.scripts().get_breakpoint(59, 4).is_none());

    let set_response = response(seq, "setbreakpoint", true, json!({"breakpoint": 7}));
    agent.handle_debugger_output(&set_response).unwrap();
    assert_eq!(agent.backend().count("clearbreakpoint"), 1);
    assert_eq!(agent.backend().last()["arguments"], json!({"breakpoint": 7}));

    // duplicated response doesn't clear the breakpoint again
    agent.handle_debugger_output(&set_response).unwrap();
    assert_eq!(agent.backend().count("clearbreakpoint"), 1);

    // line is free again
    agent.add_breakpoint(59, 5).unwrap();
    assert_eq!(agent.backend().count("setbreakpoint"), 2);
}

#[test]
fn test_rejected_breakpoint() {
    let mut agent = session();
    agent.add_breakpoint(59, 5).unwrap();
    let seq = agent.backend().last_seq();
    agent
        .handle_debugger_output(&failure(seq, "setbreakpoint", "Invalid line"))
        .unwrap();

    let bp = agent.scripts().get_breakpoint(59, 4).unwrap();
    assert!(bp.remote_id().is_none());
    assert_eq!(agent.pending_requests(), 0);

    agent.remove_breakpoint(59, 5).unwrap();
    assert_eq!(agent.backend().count("clearbreakpoint"), 0);
}

#[test]
fn test_breakpoints_in_registry() {
    let mut agent = session();
    agent.add_breakpoint(59, 1).unwrap();
    agent.add_breakpoint(59, 10).unwrap();
    let script = agent.scripts().script(59).unwrap();
    let mut lines = script.breakpoints().map(|bp| bp.line()).collect::<Vec<_>>();
    lines.sort();
    assert_eq!(lines, [0, 9]);
}
