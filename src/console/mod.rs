//! Interactive terminal front-end.
//!
//! Three threads take part in a session: readline thread reads user commands, packet thread
//! reads VM debugger packets, both of them send [`Control`] messages into the application
//! loop. The loop owns the [`DebuggerAgent`] and also drives host timers (profiler log
//! polling).

use crate::agent::value::{ObjectKind, RemoteObject};
use crate::agent::{AgentConfig, DebuggerAgent, Error, StepAction};
use crate::console::backend::{HostEvent, TcpBackend};
use crate::console::command::{Command, CommandError, ProfileCommand, HELP};
use crate::console::hook::{frame_location, ScriptList, TerminalHook};
use crate::console::print::style::{ErrorView, HandleView, KeywordView, ScriptView};
use crate::console::print::ExternalPrinter;
use crate::transport::PacketReader;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::BufRead;
use std::io::Write;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::Instant;

pub mod backend;
pub mod command;
pub mod hook;
pub mod print;

const WELCOME_TEXT: &str = "scriptdbg: type `help` for a list of commands";
const PROMPT: &str = "(js) ";

enum Control {
    /// New command from user received.
    Cmd(String),
    /// Packet from the VM debugger received.
    Packet(String),
    /// Connection with the VM debugger is lost.
    Disconnected(String),
    /// Host timer is due.
    Tick,
    Terminate,
}

#[derive(thiserror::Error, Debug)]
enum HandlingError {
    #[error(transparent)]
    Parser(#[from] CommandError),
    #[error(transparent)]
    Agent(#[from] Error),
}

type ConsoleAgent<W> = DebuggerAgent<TcpBackend<W>, TerminalHook>;

pub struct TerminalApplication<W: Write> {
    agent: ConsoleAgent<W>,
    editor: DefaultEditor,
    printer: Rc<ExternalPrinter>,
    scripts: ScriptList,
}

impl<W: Write> TerminalApplication<W> {
    pub fn new(backend: TcpBackend<W>, agent_config: AgentConfig) -> anyhow::Result<Self> {
        let mut editor = DefaultEditor::new()?;
        let printer = Rc::new(ExternalPrinter::new(&mut editor));
        let scripts = ScriptList::default();
        let hook = TerminalHook::new(printer.clone(), scripts.clone());

        Ok(Self {
            agent: DebuggerAgent::new(backend, hook, agent_config),
            editor,
            printer,
            scripts,
        })
    }

    /// Run a session until user quits or the connection is lost.
    pub fn run<R: BufRead + Send + 'static>(
        self,
        mut reader: PacketReader<R>,
    ) -> anyhow::Result<()> {
        let (control_tx, control_rx) = mpsc::sync_channel::<Control>(0);

        {
            let control_tx = control_tx.clone();
            thread::spawn(move || loop {
                match reader.read_packet() {
                    Ok(packet) => {
                        if control_tx.send(Control::Packet(packet)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        _ = control_tx.send(Control::Disconnected(format!("{e:#}")));
                        return;
                    }
                }
            });
        }

        let mut editor = self.editor;
        thread::spawn(move || {
            println!("{WELCOME_TEXT}");
            loop {
                match editor.readline(PROMPT) {
                    Ok(input) => {
                        let input = input.trim().to_string();
                        if input == "q" || input == "quit" {
                            _ = control_tx.send(Control::Terminate);
                            break;
                        }
                        if input.is_empty() {
                            continue;
                        }
                        _ = editor.add_history_entry(&input);
                        if control_tx.send(Control::Cmd(input)).is_err() {
                            break;
                        }
                    }
                    Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                        _ = control_tx.send(Control::Terminate);
                        break;
                    }
                    Err(err) => {
                        println!("error: {err:#}");
                        _ = control_tx.send(Control::Terminate);
                        break;
                    }
                }
            }
        });

        let app_loop = AppLoop {
            agent: self.agent,
            control_rx,
            printer: self.printer,
            scripts: self.scripts,
        };
        app_loop.run()
    }
}

struct AppLoop<W: Write> {
    agent: ConsoleAgent<W>,
    control_rx: Receiver<Control>,
    printer: Rc<ExternalPrinter>,
    scripts: ScriptList,
}

impl<W: Write> AppLoop<W> {
    /// Deliver host answers that are due.
    fn handle_host_events(&mut self) -> Result<(), Error> {
        let events = self.agent.backend_mut().take_ready(Instant::now());
        for event in events {
            match event {
                HostEvent::ContextId(id) => self.agent.did_get_context_id(id)?,
                HostEvent::LogLines { chunk, position } => {
                    self.agent.did_get_log_lines(&chunk, position)?
                }
            }
        }
        Ok(())
    }

    fn next_control(&self) -> Option<Control> {
        match self.agent.backend().next_deadline() {
            None => self.control_rx.recv().ok(),
            Some(due) => {
                let timeout = due.saturating_duration_since(Instant::now());
                match self.control_rx.recv_timeout(timeout) {
                    Ok(ctl) => Some(ctl),
                    Err(RecvTimeoutError::Timeout) => Some(Control::Tick),
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: &str) -> Result<(), HandlingError> {
        match Command::parse(cmd)? {
            Command::Scripts => {
                let scripts = self.scripts.borrow();
                if scripts.is_empty() {
                    self.printer.print("No scripts");
                }
                for script in scripts.values() {
                    let breakpoints = self
                        .agent
                        .scripts()
                        .script(script.id)
                        .map(|s| s.breakpoints().count())
                        .unwrap_or_default();
                    self.printer.print(format!(
                        "{:>6} {} ({} breakpoints)",
                        script.id,
                        ScriptView::from(script.name.as_deref()),
                        breakpoints
                    ));
                }
            }
            Command::RefreshScripts => self.agent.request_scripts()?,
            Command::Source(id) => {
                let printer = self.printer.clone();
                self.agent.resolve_script_source(id, move |source| match source {
                    Some(source) => {
                        for (num, line) in source.lines().enumerate() {
                            printer.print(format!("{:>5} {line}", num + 1));
                        }
                    }
                    None => printer.print(ErrorView::from(format!("no source for script #{id}"))),
                })?;
            }
            Command::Break { script, line } => {
                if self.agent.scripts().has_script(script) {
                    self.agent.add_breakpoint(script, line)?
                } else {
                    self.printer
                        .print(ErrorView::from(format!("unknown script #{script}")));
                }
            }
            Command::Delete { script, line } => self.agent.remove_breakpoint(script, line)?,
            Command::Continue => self.agent.resume_execution()?,
            Command::Step(action) => match action {
                StepAction::In => self.agent.step_into_statement()?,
                StepAction::Out => self.agent.step_out_of_function()?,
                StepAction::Next => self.agent.step_over_statement()?,
            },
            Command::Pause => self.agent.pause_execution()?,
            Command::Backtrace => match self.agent.current_call_frame() {
                None => self.printer.print("Not paused"),
                Some(top) => {
                    let scripts = self.scripts.borrow();
                    for frame in top.iter() {
                        self.printer.print(format!(
                            "#{} {}",
                            frame.frame_number.unwrap_or_default(),
                            frame_location(frame, &scripts)
                        ));
                    }
                }
            },
            Command::Eval { frame, expression } => {
                let printer = self.printer.clone();
                self.agent
                    .evaluate_in_call_frame(frame, &expression, move |result| match result {
                        Ok(value) => printer.print(value),
                        Err(e) => printer.print(ErrorView::from(e)),
                    })?;
            }
            Command::Inspect(handle) => {
                let printer = self.printer.clone();
                let object = RemoteObject::new(ObjectKind::Object, Some(handle));
                self.agent.resolve_children(object, move |object| {
                    let Some(resolved) = object.resolved() else {
                        return;
                    };
                    if let Some(err) = &resolved.error {
                        printer.print(ErrorView::from(err));
                        return;
                    }
                    printer.print(format!("{}:", HandleView::from(format!("@{handle}"))));
                    for (name, value) in &resolved.properties {
                        printer.print(format!("  {} = {value}", KeywordView::from(name)));
                    }
                    let special = [
                        ("__proto__", &resolved.proto_object),
                        ("prototype", &resolved.prototype_object),
                        ("constructor", &resolved.constructor_function),
                    ];
                    for (name, value) in special {
                        if let Some(value) = value {
                            printer.print(format!("  {} = {value}", KeywordView::from(name)));
                        }
                    }
                })?;
            }
            Command::PauseOnExceptions(value) => self.agent.set_pause_on_exceptions(value),
            Command::Profile(ProfileCommand::Start) => self.agent.start_profiling()?,
            Command::Profile(ProfileCommand::Stop) => self.agent.stop_profiling()?,
            Command::Reset => {
                self.agent.reset();
                self.scripts.borrow_mut().clear();
                self.agent.initialize_scripts_cache()?;
            }
            Command::Help => self.printer.print(HELP),
        }
        Ok(())
    }

    fn run(mut self) -> anyhow::Result<()> {
        self.agent.initialize_scripts_cache()?;

        loop {
            if let Err(e) = self.handle_host_events() {
                if e.is_fatal() {
                    return Err(e.into());
                }
                self.printer.print(ErrorView::from(format!("{e:#}")));
            }

            let Some(ctl) = self.next_control() else {
                break;
            };

            match ctl {
                Control::Cmd(command) => match self.handle_command(&command) {
                    Ok(()) => {}
                    Err(HandlingError::Parser(e)) => self.printer.print(ErrorView::from(e)),
                    Err(HandlingError::Agent(e)) if e.is_fatal() => {
                        self.printer.print(ErrorView::from("shutdown debugger"));
                        return Err(e.into());
                    }
                    Err(HandlingError::Agent(e)) => {
                        self.printer
                            .print(ErrorView::from(format!("debugger error: {e:#}")));
                    }
                },
                Control::Packet(packet) => {
                    if let Err(e) = self.agent.handle_debugger_output(&packet) {
                        if e.is_fatal() {
                            return Err(e.into());
                        }
                        // malformed packets are already logged by agent
                        log::debug!(target: "console", "packet dropped: {e}");
                    }
                }
                Control::Disconnected(reason) => {
                    self.printer
                        .print(ErrorView::from(format!("connection closed: {reason}")));
                    break;
                }
                Control::Tick => {}
                Control::Terminate => break,
            }
        }

        _ = std::io::stdout().flush();
        Ok(())
    }
}
