use crate::agent::frame::CallFrame;
use crate::agent::profile::Profile;
use crate::agent::registry::ScriptId;
use crate::agent::{AgentHook, ParsedScript};
use crate::console::print::style::{FunctionNameView, KeywordView, ScriptView};
use crate::console::print::ExternalPrinter;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Scripts announced during the session, by id.
pub type ScriptList = Rc<RefCell<BTreeMap<ScriptId, ParsedScript>>>;

pub struct TerminalHook {
    printer: Rc<ExternalPrinter>,
    scripts: ScriptList,
}

impl TerminalHook {
    pub fn new(printer: Rc<ExternalPrinter>, scripts: ScriptList) -> Self {
        Self { printer, scripts }
    }
}

/// Short location of a frame: `<function> at <script>:<line>`.
pub fn frame_location(frame: &CallFrame, scripts: &BTreeMap<ScriptId, ParsedScript>) -> String {
    let script = match frame.source_id {
        Some(id) => scripts
            .get(&id)
            .and_then(|s| s.name.clone())
            .unwrap_or_else(|| format!("script #{id}")),
        None => "<native>".to_string(),
    };
    format!(
        "{} at {}:{}",
        FunctionNameView::from(frame.function_name.as_deref()),
        ScriptView::from(script),
        frame.line
    )
}

impl AgentHook for TerminalHook {
    fn on_script_parsed(&self, script: &ParsedScript) -> anyhow::Result<()> {
        log::debug!(target: "console", "script #{} parsed", script.id);
        self.scripts.borrow_mut().insert(script.id, script.clone());
        Ok(())
    }

    fn on_paused(&self, frame: &CallFrame) -> anyhow::Result<()> {
        let scripts = self.scripts.borrow();
        self.printer
            .print(format!("Paused in {}", frame_location(frame, &scripts)));
        for (name, value) in &frame.local_scope {
            if name == "this" {
                continue;
            }
            self.printer
                .print(format!("  {} = {value}", KeywordView::from(name)));
        }
        Ok(())
    }

    fn on_resumed(&self) -> anyhow::Result<()> {
        self.printer.print("Running");
        Ok(())
    }

    fn on_recording_profile(&self, recording: bool) -> anyhow::Result<()> {
        if recording {
            self.printer.print("Profiling started");
        } else {
            self.printer.print("Profiling stopped, processing profiler log");
        }
        Ok(())
    }

    fn on_profile_ready(&self, profile: Profile) -> anyhow::Result<()> {
        self.printer.print(format!(
            "Profile: {} ticks, {} unaccounted",
            profile.total_ticks, profile.unaccounted_ticks
        ));
        self.printer.print(format!("{:>8} {:>8}  function", "self", "total"));
        for function in profile.functions {
            self.printer.print(format!(
                "{:>8} {:>8}  {}",
                function.self_ticks,
                function.total_ticks,
                FunctionNameView::from(function.name)
            ));
        }
        Ok(())
    }
}
