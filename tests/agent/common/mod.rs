use scriptdbg::agent::frame::CallFrame;
use scriptdbg::agent::profile::Profile;
use scriptdbg::agent::{AgentConfig, AgentHook, ContextId, DebuggerAgent, ParsedScript};
use scriptdbg::agent::RemoteBackend;
use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::time::Duration;

/// Backend that records everything the agent asks for.
#[derive(Default)]
pub struct TestBackend {
    pub sent: Vec<Value>,
    pub context_requests: usize,
    pub debug_breaks: usize,
    pub forced_executions: usize,
    /// `true` for each start, `false` for each stop.
    pub profiler_switches: Vec<bool>,
    pub log_requests: Vec<(u64, Duration)>,
    pub broken: bool,
}

impl TestBackend {
    pub fn commands(&self) -> Vec<&str> {
        self.sent
            .iter()
            .map(|p| p["command"].as_str().unwrap())
            .collect()
    }

    pub fn last(&self) -> &Value {
        self.sent.last().unwrap()
    }

    pub fn last_seq(&self) -> u64 {
        self.last()["seq"].as_u64().unwrap()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| **c == command).count()
    }
}

impl RemoteBackend for TestBackend {
    fn send_command(&mut self, raw: &str) -> anyhow::Result<()> {
        if self.broken {
            anyhow::bail!("connection lost");
        }
        self.sent.push(serde_json::from_str(raw)?);
        Ok(())
    }

    fn request_context_id(&mut self) -> anyhow::Result<()> {
        self.context_requests += 1;
        Ok(())
    }

    fn debug_break(&mut self) -> anyhow::Result<()> {
        self.debug_breaks += 1;
        Ok(())
    }

    fn force_execution(&mut self) -> anyhow::Result<()> {
        self.forced_executions += 1;
        Ok(())
    }

    fn start_profiling(&mut self) -> anyhow::Result<()> {
        self.profiler_switches.push(true);
        Ok(())
    }

    fn stop_profiling(&mut self) -> anyhow::Result<()> {
        self.profiler_switches.push(false);
        Ok(())
    }

    fn request_log_lines(&mut self, position: u64, delay: Duration) -> anyhow::Result<()> {
        self.log_requests.push((position, delay));
        Ok(())
    }
}

#[derive(Default)]
pub struct TestHooks {
    pub scripts: RefCell<Vec<ParsedScript>>,
    pub paused: RefCell<Vec<CallFrame>>,
    pub resumed: Cell<usize>,
    pub recording: RefCell<Vec<bool>>,
    pub profiles: RefCell<Vec<Profile>>,
}

impl AgentHook for TestHooks {
    fn on_script_parsed(&self, script: &ParsedScript) -> anyhow::Result<()> {
        self.scripts.borrow_mut().push(script.clone());
        Ok(())
    }

    fn on_paused(&self, frame: &CallFrame) -> anyhow::Result<()> {
        self.paused.borrow_mut().push(frame.clone());
        Ok(())
    }

    fn on_resumed(&self) -> anyhow::Result<()> {
        self.resumed.set(self.resumed.get() + 1);
        Ok(())
    }

    fn on_recording_profile(&self, recording: bool) -> anyhow::Result<()> {
        self.recording.borrow_mut().push(recording);
        Ok(())
    }

    fn on_profile_ready(&self, profile: Profile) -> anyhow::Result<()> {
        self.profiles.borrow_mut().push(profile);
        Ok(())
    }
}

pub type TestAgent = DebuggerAgent<TestBackend, TestHooks>;

pub fn new_agent() -> TestAgent {
    DebuggerAgent::new(
        TestBackend::default(),
        TestHooks::default(),
        AgentConfig::default(),
    )
}

/// Agent with inspected context `page,3` and a known script 59 (`http://a.js`).
pub fn session() -> TestAgent {
    let mut agent = new_agent();
    agent
        .did_get_context_id(Some(ContextId::new("page,3")))
        .unwrap();
    agent
        .handle_debugger_output(&after_compile(59, "http://a.js", "page,3"))
        .unwrap();
    agent
}

pub fn script(id: i64, name: &str, context_ref: i64) -> Value {
    json!({
        "handle": id + 1000,
        "type": "script",
        "id": id,
        "name": name,
        "lineOffset": 0,
        "context": {"ref": context_ref},
    })
}

pub fn context(handle: i64, data: Value) -> Value {
    json!({"handle": handle, "type": "context", "data": data})
}

pub fn after_compile(id: i64, name: &str, context_data: &str) -> String {
    json!({
        "seq": 100,
        "type": "event",
        "event": "afterCompile",
        "success": true,
        "running": true,
        "body": {"script": script(id, name, 7)},
        "refs": [context(7, json!(context_data))],
    })
    .to_string()
}

pub fn response(request_seq: u64, command: &str, success: bool, body: Value) -> String {
    json!({
        "seq": 200,
        "type": "response",
        "request_seq": request_seq,
        "command": command,
        "success": success,
        "running": false,
        "body": body,
    })
    .to_string()
}

pub fn failure(request_seq: u64, command: &str, message: &str) -> String {
    json!({
        "seq": 200,
        "type": "response",
        "request_seq": request_seq,
        "command": command,
        "success": false,
        "message": message,
    })
    .to_string()
}

pub fn event(name: &str, body: Value) -> String {
    json!({"seq": 300, "type": "event", "event": name, "body": body}).to_string()
}

/// Backtrace frame in compact format.
pub fn stack_frame(line: i64, function: &str, script_id: i64) -> Value {
    json!({
        "type": "frame",
        "line": line,
        "func": {"ref": 1, "type": "function", "name": function, "inferredName": "", "scriptId": script_id},
        "receiver": {"ref": 2, "type": "object", "className": "global"},
        "arguments": [{"name": "n", "value": {"ref": 3, "type": "number", "value": 1}}],
        "locals": [{"name": "x", "value": {"ref": 4, "type": "undefined"}}],
    })
}
