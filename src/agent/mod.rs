//! Debugger session agent.
//!
//! Agent talks with a remote VM debugger using the JSON protocol (see [`crate::protocol`]).
//! Every outgoing request gets a session-unique sequence number, a response is matched with its
//! request by that number, so responses may arrive in any order. Unsolicited events (`break`,
//! `exception`, `afterCompile`) are dispatched into the state machine.
//!
//! Agent never blocks: requests go out through a [`RemoteBackend`] and results are delivered
//! later, when the host feeds inbound packets into [`DebuggerAgent::handle_debugger_output`].
//! Interesting state changes are reported to an [`AgentHook`].

pub mod error;
pub mod frame;
pub mod profile;
pub mod registry;
pub mod value;

pub use error::Error;

use crate::agent::frame::{ui_to_vm_line, CallFrame};
use crate::agent::profile::{Profile, ProfileProcessor};
use crate::agent::registry::{BreakpointInfo, RemoteBreakpointId, ScriptId, ScriptRegistry};
use crate::agent::value::{format_object_properties, format_object_reference};
use crate::agent::value::{RemoteObject, ResolvedObject, ScopeValue};
use crate::protocol::{Command, Message, MessageKind, SequenceCounter};
use crate::weak_error;
use log::{debug, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use strum_macros::{Display, IntoStaticStr};

/// Script announced to a user interface.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScript {
    pub id: ScriptId,
    pub name: Option<String>,
    pub source: Option<String>,
    pub line_offset: i64,
}

/// Observer of session state changes.
pub trait AgentHook {
    /// Called when a new script from the inspected context is registered.
    fn on_script_parsed(&self, script: &ParsedScript) -> anyhow::Result<()>;

    /// Called when execution is stopped and the full call stack is known.
    fn on_paused(&self, frame: &CallFrame) -> anyhow::Result<()>;

    /// Called when the VM confirms that execution continues.
    fn on_resumed(&self) -> anyhow::Result<()>;

    /// Called when profile recording starts or stops.
    fn on_recording_profile(&self, recording: bool) -> anyhow::Result<()>;

    /// Called when profiling is stopped and the whole profiler log is processed.
    fn on_profile_ready(&self, profile: Profile) -> anyhow::Result<()>;
}

/// Remote side of a session: the debugger command channel and the host services around it.
pub trait RemoteBackend {
    /// Send a raw protocol packet to the VM debugger.
    fn send_command(&mut self, raw: &str) -> anyhow::Result<()>;

    /// Ask the host for the inspected context id,
    /// answer must be delivered into [`DebuggerAgent::did_get_context_id`].
    fn request_context_id(&mut self) -> anyhow::Result<()>;

    /// Stop VM as soon as possible.
    fn debug_break(&mut self) -> anyhow::Result<()>;

    /// Make VM execute something so that it gets to processing of queued commands.
    fn force_execution(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn start_profiling(&mut self) -> anyhow::Result<()>;

    fn stop_profiling(&mut self) -> anyhow::Result<()>;

    /// After `delay` read profiler log starting from `position`,
    /// answer must be delivered into [`DebuggerAgent::did_get_log_lines`].
    fn request_log_lines(&mut self, position: u64, delay: Duration) -> anyhow::Result<()>;
}

/// Identifier of the inspected page context, compared with the `data` of script contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextId(Value);

impl ContextId {
    pub fn new(id: impl Into<Value>) -> Self {
        Self(id.into())
    }

    fn as_text(v: &Value) -> Option<String> {
        match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Return true if context data of a script is exactly this id.
    /// A number and its decimal string are considered equal.
    pub fn matches(&self, data: &Value) -> bool {
        if &self.0 == data {
            return true;
        }
        match (Self::as_text(&self.0), Self::as_text(data)) {
            (Some(id), Some(data)) => id == data,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ContextState {
    /// Context id not received yet.
    Unknown,
    /// Host doesn't distinguish contexts, scripts with any context are accepted.
    Unfiltered,
    Known(ContextId),
}

/// Step kind of a `continue` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum StepAction {
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "out")]
    Out,
    #[strum(serialize = "next")]
    Next,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Stop in the debugger on exceptions.
    pub pause_on_exceptions: bool,
    /// Profiler log polling interval while a stopped profile is being drained.
    pub active_poll_interval: Duration,
    /// Profiler log polling interval during recording.
    pub idle_poll_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            pause_on_exceptions: true,
            active_poll_interval: Duration::from_millis(100),
            idle_poll_interval: Duration::from_millis(1000),
        }
    }
}

type ResponseCallback = Box<dyn FnOnce(&Message)>;

/// Request waiting for its response.
enum Pending {
    Callback(ResponseCallback),
    /// `setbreakpoint` request, response brings breakpoint id.
    Breakpoint(Rc<BreakpointInfo>),
}

#[derive(Default)]
struct ProfilingState {
    /// User stopped profiling and the rest of profiler log is being retrieved.
    processing: bool,
    /// Log polling loop is alive.
    polling: bool,
    /// Position in profiler log to read from.
    last_log_position: u64,
    processor: ProfileProcessor,
}

pub struct DebuggerAgent<B: RemoteBackend, H: AgentHook> {
    backend: B,
    hook: H,
    config: AgentConfig,
    seq: SequenceCounter,
    context: ContextState,
    scripts: ScriptRegistry,
    pending: HashMap<u64, Pending>,
    /// Stack top frame of stopped execution.
    current_frame: Option<CallFrame>,
    paused: bool,
    pause_on_exceptions: bool,
    scripts_cache_initialized: bool,
    profiling: ProfilingState,
}

impl<B: RemoteBackend, H: AgentHook> DebuggerAgent<B, H> {
    pub fn new(backend: B, hook: H, config: AgentConfig) -> Self {
        Self {
            backend,
            hook,
            pause_on_exceptions: config.pause_on_exceptions,
            config,
            seq: SequenceCounter::default(),
            context: ContextState::Unknown,
            scripts: ScriptRegistry::default(),
            pending: HashMap::new(),
            current_frame: None,
            paused: false,
            scripts_cache_initialized: false,
            profiling: ProfilingState::default(),
        }
    }

    /// Reset session to its initial state. All pending requests are forgotten.
    pub fn reset(&mut self) {
        self.scripts_cache_initialized = false;
        self.context = ContextState::Unknown;
        self.scripts = ScriptRegistry::default();
        self.pending.clear();
        self.current_frame = None;
        self.paused = false;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn scripts(&self) -> &ScriptRegistry {
        &self.scripts
    }

    /// Stack top frame, available while execution is stopped.
    pub fn current_call_frame(&self) -> Option<&CallFrame> {
        self.current_frame.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Number of requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// True iff the debugger will pause execution on exceptions.
    pub fn pause_on_exceptions(&self) -> bool {
        self.pause_on_exceptions
    }

    /// Affects only how future `exception` events are handled, nothing is sent to the VM.
    pub fn set_pause_on_exceptions(&mut self, value: bool) {
        self.pause_on_exceptions = value;
    }

    fn send(&mut self, cmd: &Command) -> Result<(), Error> {
        debug!(target: "agent", "send `{}` request #{}", cmd.name(), cmd.seq());
        self.backend
            .send_command(&cmd.encode())
            .map_err(Error::Backend)
    }

    fn send_with_callback(&mut self, cmd: Command, cb: ResponseCallback) -> Result<(), Error> {
        self.send(&cmd)?;
        self.pending.insert(cmd.seq(), Pending::Callback(cb));
        Ok(())
    }

    /// Request the list of parsed scripts once per session.
    pub fn initialize_scripts_cache(&mut self) -> Result<(), Error> {
        if !self.scripts_cache_initialized {
            self.scripts_cache_initialized = true;
            self.request_scripts()?;
        }
        Ok(())
    }

    /// Request the list of parsed scripts. If context id is not known yet it is requested first,
    /// scripts are requested when the id arrives.
    pub fn request_scripts(&mut self) -> Result<(), Error> {
        if self.context == ContextState::Unknown {
            return self.backend.request_context_id().map_err(Error::Backend);
        }
        let cmd = Command::next(&mut self.seq, "scripts", json!({"includeSource": false}));
        self.send(&cmd)?;
        self.backend.force_execution().map_err(Error::Backend)
    }

    /// Host answer to [`RemoteBackend::request_context_id`].
    /// [`None`] means that the host doesn't separate contexts.
    pub fn did_get_context_id(&mut self, id: Option<ContextId>) -> Result<(), Error> {
        self.context = match id {
            Some(id) => ContextState::Known(id),
            None => ContextState::Unfiltered,
        };
        self.request_scripts()
    }

    /// Request script source. Callback receives [`None`] if script is unknown or resolution
    /// fails.
    pub fn resolve_script_source(
        &mut self,
        script_id: ScriptId,
        callback: impl FnOnce(Option<String>) + 'static,
    ) -> Result<(), Error> {
        if !self.scripts.has_script(script_id) {
            callback(None);
            return Ok(());
        }

        let cmd = Command::next(
            &mut self.seq,
            "scripts",
            json!({"ids": [script_id], "includeSource": true}),
        );
        self.send_with_callback(
            cmd,
            Box::new(move |msg: &Message| {
                let source = msg
                    .is_success()
                    .then(|| msg.body().get(0)?.get("source")?.as_str())
                    .flatten()
                    .map(ToString::to_string);
                callback(source)
            }),
        )?;
        self.backend.force_execution().map_err(Error::Backend)
    }

    /// Stop execution as soon as possible.
    pub fn pause_execution(&mut self) -> Result<(), Error> {
        self.backend.debug_break().map_err(Error::Backend)
    }

    /// Continue execution after a stop on breakpoint or exception.
    pub fn resume_execution(&mut self) -> Result<(), Error> {
        let cmd = Command::next_bare(&mut self.seq, "continue");
        self.send(&cmd)
    }

    fn step(&mut self, action: StepAction) -> Result<(), Error> {
        let action: &'static str = action.into();
        let cmd = Command::next(
            &mut self.seq,
            "continue",
            json!({"stepaction": action, "stepcount": 1}),
        );
        self.send(&cmd)
    }

    pub fn step_into_statement(&mut self) -> Result<(), Error> {
        self.step(StepAction::In)
    }

    pub fn step_out_of_function(&mut self) -> Result<(), Error> {
        self.step(StepAction::Out)
    }

    pub fn step_over_statement(&mut self) -> Result<(), Error> {
        self.step(StepAction::Next)
    }

    /// Set breakpoint at 1-based `line` of a script. Nothing happens if script is unknown or
    /// there is a breakpoint at this line already.
    pub fn add_breakpoint(&mut self, script_id: ScriptId, line: i64) -> Result<(), Error> {
        if !self.scripts.has_script(script_id) {
            return Ok(());
        }
        let line = ui_to_vm_line(line);
        if self.scripts.get_breakpoint(script_id, line).is_some() {
            return Ok(());
        }

        let breakpoint = Rc::new(BreakpointInfo::new(script_id, line));
        self.scripts.set_breakpoint(script_id, breakpoint.clone());

        let cmd = Command::next(
            &mut self.seq,
            "setbreakpoint",
            json!({"type": "scriptId", "target": script_id, "line": line}),
        );
        self.pending
            .insert(cmd.seq(), Pending::Breakpoint(breakpoint));
        self.send(&cmd)
    }

    /// Remove breakpoint at 1-based `line` of a script. If breakpoint id is not known yet,
    /// it is cleared when `setbreakpoint` response arrives.
    pub fn remove_breakpoint(&mut self, script_id: ScriptId, line: i64) -> Result<(), Error> {
        let line = ui_to_vm_line(line);
        let Some(breakpoint) = self.scripts.get_breakpoint(script_id, line) else {
            return Ok(());
        };
        self.scripts.remove_breakpoint(script_id, &breakpoint);
        breakpoint.mark_as_removed();

        match breakpoint.remote_id() {
            Some(id) => self.request_clear_breakpoint(id),
            None => Ok(()),
        }
    }

    fn request_clear_breakpoint(&mut self, id: RemoteBreakpointId) -> Result<(), Error> {
        let cmd = Command::next(&mut self.seq, "clearbreakpoint", json!({"breakpoint": id}));
        self.send(&cmd)
    }

    fn request_backtrace(&mut self) -> Result<(), Error> {
        let cmd = Command::next(&mut self.seq, "backtrace", json!({"compactFormat": true}));
        self.send(&cmd)
    }

    /// Send `evaluate` request, callback receives the response.
    pub fn request_evaluate(
        &mut self,
        arguments: Value,
        callback: impl FnOnce(&Message) + 'static,
    ) -> Result<(), Error> {
        let cmd = Command::next(&mut self.seq, "evaluate", arguments);
        self.send_with_callback(cmd, Box::new(callback))
    }

    /// Evaluate an expression in the context of a call frame.
    pub fn evaluate_in_call_frame(
        &mut self,
        frame_number: usize,
        expression: &str,
        callback: impl FnOnce(Result<ScopeValue, String>) + 'static,
    ) -> Result<(), Error> {
        let arguments = json!({
            "expression": expression,
            "frame": frame_number,
            "global": false,
            "disable_break": false,
        });
        self.request_evaluate(arguments, move |msg| {
            if msg.is_success() {
                callback(Ok(format_object_reference(msg.body())))
            } else {
                callback(Err(msg.message().unwrap_or("evaluation failed").to_string()))
            }
        })
    }

    /// Resolve properties of an object. Objects without remote reference are returned
    /// as is (with an error if nothing was resolved before).
    pub fn resolve_children(
        &mut self,
        mut object: RemoteObject,
        callback: impl FnOnce(RemoteObject) + 'static,
    ) -> Result<(), Error> {
        let Some(handle) = object.reference() else {
            if object.resolved().is_none() {
                object.set_resolved(ResolvedObject::with_error(format!(
                    "Corrupted object: {}",
                    object.raw()
                )));
            }
            callback(object);
            return Ok(());
        };

        let cmd = Command::next(
            &mut self.seq,
            "lookup",
            json!({"compactFormat": true, "handles": [handle]}),
        );
        self.send_with_callback(
            cmd,
            Box::new(move |msg: &Message| {
                let resolved = if msg.is_success() {
                    match msg.body().get(handle.to_string()) {
                        Some(mirror) => format_object_properties(mirror),
                        None => ResolvedObject::with_error(format!(
                            "Failed to resolve children: object {handle} not found"
                        )),
                    }
                } else {
                    ResolvedObject::with_error(format!(
                        "Failed to resolve children: {}",
                        msg.message().unwrap_or_default()
                    ))
                };
                object.set_resolved(resolved);
                callback(object)
            }),
        )
    }

    /// Start (resume) profiling and log polling.
    pub fn start_profiling(&mut self) -> Result<(), Error> {
        if self.profiling.processing {
            return Ok(());
        }
        self.backend.start_profiling().map_err(Error::Backend)?;
        if !self.profiling.polling {
            self.profiling.polling = true;
            self.backend
                .request_log_lines(self.profiling.last_log_position, Duration::ZERO)
                .map_err(Error::Backend)?;
        }
        _ = weak_error!(self.hook.on_recording_profile(true).map_err(Error::Hook));
        Ok(())
    }

    /// Stop (pause) profiling. Polling continues until the log is drained, then profile is
    /// reported with [`AgentHook::on_profile_ready`]. Nothing happens if profiling is not
    /// started.
    pub fn stop_profiling(&mut self) -> Result<(), Error> {
        if !self.profiling.polling {
            return Ok(());
        }
        self.profiling.processing = true;
        self.backend.stop_profiling().map_err(Error::Backend)
    }

    /// Host answer to [`RemoteBackend::request_log_lines`].
    pub fn did_get_log_lines(&mut self, log: &str, new_position: u64) -> Result<(), Error> {
        if !log.is_empty() {
            self.profiling.processor.process_log_chunk(log);
            self.profiling.last_log_position = new_position;
        } else if self.profiling.processing {
            self.profiling.processing = false;
            self.profiling.polling = false;
            _ = weak_error!(self.hook.on_recording_profile(false).map_err(Error::Hook));
            let profile = self.profiling.processor.create_profile();
            _ = weak_error!(self.hook.on_profile_ready(profile).map_err(Error::Hook));
            return Ok(());
        }

        let delay = if self.profiling.processing {
            self.config.active_poll_interval
        } else {
            self.config.idle_poll_interval
        };
        self.backend
            .request_log_lines(new_position, delay)
            .map_err(Error::Backend)
    }

    /// Handle a packet sent by the VM debugger. The packet is either an asynchronous event or
    /// a response to a previously sent request.
    ///
    /// Return an error if packet is malformed or backend fails to send a follow-up request.
    pub fn handle_debugger_output(&mut self, output: &str) -> Result<(), Error> {
        let msg = match Message::decode(output) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(target: "agent", "failed to handle debugger response: {e}");
                return Err(e.into());
            }
        };

        match msg.kind() {
            MessageKind::Event => match msg.event().unwrap_or_default() {
                "break" => self.handle_break_event(&msg),
                "exception" => self.handle_exception_event(&msg),
                "afterCompile" => {
                    self.handle_after_compile_event(&msg);
                    Ok(())
                }
                _ => Ok(()),
            },
            MessageKind::Response => match msg.command().unwrap_or_default() {
                "scripts" => {
                    self.handle_scripts_response(&msg);
                    Ok(())
                }
                "setbreakpoint" => self.handle_set_breakpoint_response(&msg),
                "backtrace" => {
                    self.handle_backtrace_response(&msg);
                    Ok(())
                }
                "continue" => {
                    self.handle_continue_response(&msg);
                    Ok(())
                }
                "lookup" | "evaluate" => {
                    self.invoke_callback_for_response(&msg);
                    Ok(())
                }
                // nothing to do for `clearbreakpoint`
                _ => Ok(()),
            },
        }
    }

    fn handle_break_event(&mut self, msg: &Message) -> Result<(), Error> {
        self.current_frame = Some(CallFrame::header(msg.body()));
        self.request_backtrace()
    }

    fn handle_exception_event(&mut self, msg: &Message) -> Result<(), Error> {
        let body = msg.body();
        debug!(
            target: "agent",
            "uncaught exception in {}:{}",
            body.pointer("/script/name").and_then(Value::as_str).unwrap_or("<native>"),
            body.get("sourceLine").and_then(Value::as_i64).unwrap_or_default(),
        );

        if self.pause_on_exceptions {
            self.current_frame = Some(CallFrame::header(body));
            self.request_backtrace()
        } else {
            self.resume_execution()
        }
    }

    fn handle_after_compile_event(&mut self, msg: &Message) {
        let Some(script) = msg.body().get("script") else {
            return;
        };
        if self.is_script_from_inspected_context(script, msg) {
            self.add_script_info(script);
        }
    }

    fn handle_scripts_response(&mut self, msg: &Message) {
        if self.invoke_callback_for_response(msg) {
            return;
        }

        let Some(scripts) = msg.body().as_array() else {
            return;
        };
        for script in scripts {
            if !self.is_script_from_inspected_context(script, msg) {
                continue;
            }
            // may be already received in an `afterCompile` event
            let known = script
                .get("id")
                .and_then(Value::as_i64)
                .map(|id| self.scripts.has_script(id))
                .unwrap_or(true);
            if !known {
                self.add_script_info(script);
            }
        }
    }

    /// Script is accepted if its context resolves in the message references and either no
    /// context filter is set or the context data matches the inspected one. Scripts without
    /// context data come from the utility context and are always ignored.
    fn is_script_from_inspected_context(&self, script: &Value, msg: &Message) -> bool {
        let Some(context_ref) = script.pointer("/context/ref").and_then(Value::as_i64) else {
            return false;
        };
        let Some(data) = msg.lookup(context_ref).and_then(|ctx| ctx.get("data")) else {
            debug!(target: "agent", "script from unknown context {context_ref} ignored");
            return false;
        };
        match &self.context {
            ContextState::Known(id) => id.matches(data),
            ContextState::Unknown | ContextState::Unfiltered => true,
        }
    }

    fn add_script_info(&mut self, script: &Value) {
        let Some(id) = script.get("id").and_then(Value::as_i64) else {
            return;
        };
        let line_offset = script
            .get("lineOffset")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        if !self.scripts.add_script(id, line_offset) {
            return;
        }

        let parsed = ParsedScript {
            id,
            name: script.get("name").and_then(Value::as_str).map(ToString::to_string),
            source: script
                .get("source")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            line_offset,
        };
        _ = weak_error!(self.hook.on_script_parsed(&parsed).map_err(Error::Hook));
    }

    fn handle_set_breakpoint_response(&mut self, msg: &Message) -> Result<(), Error> {
        let Some(seq) = msg.request_seq() else {
            return Ok(());
        };
        let breakpoint = match self.pending.remove(&seq) {
            Some(Pending::Breakpoint(bp)) => bp,
            Some(other) => {
                self.pending.insert(seq, other);
                return Ok(());
            }
            None => {
                debug!(target: "agent", "unexpected setbreakpoint response #{seq}");
                return Ok(());
            }
        };

        if !msg.is_success() {
            debug!(
                target: "agent",
                "breakpoint at {}:{} not set: {}",
                breakpoint.script_id(),
                breakpoint.line(),
                msg.message().unwrap_or_default()
            );
            return Ok(());
        }
        let Some(id) = msg.body().get("breakpoint").and_then(Value::as_i64) else {
            return Ok(());
        };
        breakpoint.set_remote_id(id);

        if breakpoint.is_removed() {
            self.request_clear_breakpoint(id)?;
        }
        Ok(())
    }

    fn handle_backtrace_response(&mut self, msg: &Message) {
        let Some(header) = self.current_frame.take() else {
            debug!(target: "agent", "backtrace response without stopped frame ignored");
            return;
        };

        let frames = msg
            .body()
            .get("frames")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let top = CallFrame::chain(frames).unwrap_or(header);

        self.paused = true;
        _ = weak_error!(self.hook.on_paused(&top).map_err(Error::Hook));
        self.current_frame = Some(top);
    }

    fn handle_continue_response(&mut self, msg: &Message) {
        if !msg.is_success() {
            return;
        }
        self.current_frame = None;
        self.paused = false;
        _ = weak_error!(self.hook.on_resumed().map_err(Error::Hook));
    }

    /// Invoke a callback of the request answered by `msg`.
    /// Return false if there is no such request (it may happen after reset).
    fn invoke_callback_for_response(&mut self, msg: &Message) -> bool {
        let Some(seq) = msg.request_seq() else {
            return false;
        };
        match self.pending.remove(&seq) {
            Some(Pending::Callback(callback)) => {
                callback(msg);
                true
            }
            Some(other) => {
                self.pending.insert(seq, other);
                false
            }
            None => {
                debug!(target: "agent", "no request for response #{seq}");
                false
            }
        }
    }
}
