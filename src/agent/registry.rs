use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

/// Script identifier assigned by the remote VM.
pub type ScriptId = i64;

/// Breakpoint identifier assigned by the remote VM.
pub type RemoteBreakpointId = i64;

/// Breakpoint representation.
///
/// A breakpoint is shared between the registry and a pending `setbreakpoint` request, remote id
/// becomes known only when the response arrives.
#[derive(Debug)]
pub struct BreakpointInfo {
    script_id: ScriptId,
    /// 0-based line number in the containing script.
    line: i64,
    remote_id: Cell<Option<RemoteBreakpointId>>,
    removed: Cell<bool>,
}

impl BreakpointInfo {
    pub fn new(script_id: ScriptId, line: i64) -> Self {
        Self {
            script_id,
            line,
            remote_id: Cell::default(),
            removed: Cell::default(),
        }
    }

    pub fn script_id(&self) -> ScriptId {
        self.script_id
    }

    pub fn line(&self) -> i64 {
        self.line
    }

    /// Unique identifier of this breakpoint in the remote debugger, [`None`] until known.
    pub fn remote_id(&self) -> Option<RemoteBreakpointId> {
        self.remote_id.get()
    }

    pub(super) fn set_remote_id(&self, id: RemoteBreakpointId) {
        self.remote_id.set(Some(id))
    }

    /// Whether this breakpoint has been removed by the user.
    pub fn is_removed(&self) -> bool {
        self.removed.get()
    }

    pub(super) fn mark_as_removed(&self) {
        self.removed.set(true)
    }
}

/// Known script with its breakpoints.
#[derive(Debug)]
pub struct ScriptInfo {
    id: ScriptId,
    /// First line 0-based offset in the containing document.
    line_offset: i64,
    breakpoints: HashMap<i64, Rc<BreakpointInfo>>,
}

impl ScriptInfo {
    fn new(id: ScriptId, line_offset: i64) -> Self {
        Self {
            id,
            line_offset,
            breakpoints: HashMap::new(),
        }
    }

    pub fn id(&self) -> ScriptId {
        self.id
    }

    pub fn line_offset(&self) -> i64 {
        self.line_offset
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &Rc<BreakpointInfo>> {
        self.breakpoints.values()
    }
}

/// Registry of parsed scripts. At most one breakpoint exists for each (script, line) pair.
#[derive(Debug, Default)]
pub struct ScriptRegistry {
    scripts: HashMap<ScriptId, ScriptInfo>,
}

impl ScriptRegistry {
    pub fn has_script(&self, id: ScriptId) -> bool {
        self.scripts.contains_key(&id)
    }

    pub fn script(&self, id: ScriptId) -> Option<&ScriptInfo> {
        self.scripts.get(&id)
    }

    /// Register a script. Return `false` and leave existing script untouched if it
    /// is already known.
    pub fn add_script(&mut self, id: ScriptId, line_offset: i64) -> bool {
        if self.scripts.contains_key(&id) {
            return false;
        }
        self.scripts.insert(id, ScriptInfo::new(id, line_offset));
        true
    }

    /// Return breakpoint at 0-based `line` of script.
    pub fn get_breakpoint(&self, script_id: ScriptId, line: i64) -> Option<Rc<BreakpointInfo>> {
        self.scripts
            .get(&script_id)
            .and_then(|script| script.breakpoints.get(&line))
            .cloned()
    }

    /// Attach breakpoint to script. Return `false` if script is unknown or the line
    /// is already occupied.
    pub fn set_breakpoint(&mut self, script_id: ScriptId, info: Rc<BreakpointInfo>) -> bool {
        let Some(script) = self.scripts.get_mut(&script_id) else {
            return false;
        };
        if script.breakpoints.contains_key(&info.line()) {
            return false;
        }
        script.breakpoints.insert(info.line(), info);
        true
    }

    /// Detach breakpoint from script. Only the same breakpoint instance is removed.
    pub fn remove_breakpoint(&mut self, script_id: ScriptId, info: &Rc<BreakpointInfo>) -> bool {
        let Some(script) = self.scripts.get_mut(&script_id) else {
            return false;
        };
        match script.breakpoints.get(&info.line()) {
            Some(existing) if Rc::ptr_eq(existing, info) => {
                script.breakpoints.remove(&info.line());
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
