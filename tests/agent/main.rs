mod common;

mod breakpoints;
mod execution;

use crate::common::{new_agent, response, session};
use scriptdbg::agent::Error;

#[test]
fn test_sequence_numbers_increase() {
    let mut agent = session();
    agent.add_breakpoint(59, 1).unwrap();
    agent.resume_execution().unwrap();
    agent.step_over_statement().unwrap();
    agent.request_scripts().unwrap();

    let seqs = agent
        .backend()
        .sent
        .iter()
        .map(|p| p["seq"].as_u64().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(seqs.len(), 5);
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{seqs:?}");
    assert_eq!(seqs[0], 1);
}

#[test]
fn test_independent_sessions() {
    let mut first = new_agent();
    let mut second = new_agent();
    first.resume_execution().unwrap();
    first.resume_execution().unwrap();
    second.resume_execution().unwrap();

    assert_eq!(first.backend().last_seq(), 2);
    assert_eq!(second.backend().last_seq(), 1);
}

#[test]
fn test_malformed_packet() {
    let mut agent = session();
    let err = agent.handle_debugger_output("{not a json").unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(!err.is_fatal());

    let err = agent
        .handle_debugger_output(r#"{"seq":1,"type":"request","command":"continue"}"#)
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));

    // session is still usable
    agent.resume_execution().unwrap();
}

#[test]
fn test_backend_failure_is_fatal() {
    let mut agent = session();
    agent.backend_mut().broken = true;
    let err = agent.resume_execution().unwrap_err();
    assert!(matches!(err, Error::Backend(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_unknown_messages_ignored() {
    let mut agent = session();
    let sent = agent.backend().sent.len();
    agent
        .handle_debugger_output(&response(777, "clearbreakpoint", true, serde_json::json!({})))
        .unwrap();
    agent
        .handle_debugger_output(&common::event("scriptCollected", serde_json::json!({})))
        .unwrap();
    assert_eq!(agent.backend().sent.len(), sent);
}

#[test]
fn test_reset() {
    let mut agent = session();
    agent.add_breakpoint(59, 3).unwrap();
    let breakpoint_seq = agent.backend().last_seq();
    agent.initialize_scripts_cache().unwrap();
    let last_seq = agent.backend().last_seq();
    assert!(agent.pending_requests() > 0);

    agent.reset();
    assert!(agent.scripts().is_empty());
    assert!(agent.current_call_frame().is_none());
    assert!(!agent.is_paused());
    assert_eq!(agent.pending_requests(), 0);

    // context is forgotten, so it is requested again
    let context_requests = agent.backend().context_requests;
    agent.initialize_scripts_cache().unwrap();
    assert_eq!(agent.backend().context_requests, context_requests + 1);

    // late response to a forgotten request is ignored
    agent
        .handle_debugger_output(&response(
            breakpoint_seq,
            "setbreakpoint",
            true,
            serde_json::json!({"breakpoint": 1}),
        ))
        .unwrap();
    assert_eq!(agent.backend().count("clearbreakpoint"), 0);

    // numbering continues
    agent.resume_execution().unwrap();
    assert!(agent.backend().last_seq() > last_seq);
}
