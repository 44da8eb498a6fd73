use crate::agent::registry::ScriptId;
use crate::agent::value::{arguments_to_map, format_object_reference, properties_to_map};
use crate::agent::value::{PropertyMap, ScopeValue};
use serde_json::Value;
use std::iter;

/// Convert a line number from UI (1-based) to VM (0-based).
pub fn ui_to_vm_line(line: i64) -> i64 {
    line - 1
}

/// Convert a line number from VM (0-based) to UI (1-based).
pub fn vm_to_ui_line(line: i64) -> i64 {
    line + 1
}

/// Call stack frame. Frames are linked from the stack top to the outermost caller.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallFrame {
    /// Script of the frame, [`None`] for native code.
    pub source_id: Option<ScriptId>,
    /// 1-based line number.
    pub line: i64,
    pub function_name: Option<String>,
    pub local_scope: PropertyMap,
    pub this_object: Option<ScopeValue>,
    /// Frame index in the backtrace, 0 is the stack top.
    pub frame_number: Option<usize>,
    /// Script json object from the event that stopped execution.
    pub script: Option<Value>,
    pub caller: Option<Box<CallFrame>>,
}

impl CallFrame {
    /// Build stack top frame from a `break` or `exception` event body.
    pub(super) fn header(body: &Value) -> Self {
        let script = body.get("script").filter(|s| !s.is_null()).cloned();
        let source_id = script
            .as_ref()
            .and_then(|s| s.get("id"))
            .and_then(Value::as_i64);
        let line = body
            .get("sourceLine")
            .and_then(Value::as_i64)
            .map(vm_to_ui_line)
            .unwrap_or_default();

        Self {
            source_id,
            line,
            script,
            ..Default::default()
        }
    }

    /// Build a frame from a `backtrace` response frame.
    fn from_stack_frame(stack_frame: &Value) -> Self {
        let func = stack_frame.get("func").unwrap_or(&Value::Null);
        let function_name = ["name", "inferredName"]
            .iter()
            .find_map(|key| func.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
            .unwrap_or("(anonymous function)")
            .to_string();

        let mut scope = PropertyMap::new();
        if let Some(arguments) = stack_frame.get("arguments") {
            arguments_to_map(arguments, &mut scope);
        }
        if let Some(locals) = stack_frame.get("locals") {
            properties_to_map(locals, &mut scope);
        }
        let this_object =
            format_object_reference(stack_frame.get("receiver").unwrap_or(&Value::Null));
        scope.insert("this".to_string(), this_object.clone());

        Self {
            source_id: func.get("scriptId").and_then(Value::as_i64),
            line: stack_frame
                .get("line")
                .and_then(Value::as_i64)
                .map(vm_to_ui_line)
                .unwrap_or_default(),
            function_name: Some(function_name),
            local_scope: scope,
            this_object: Some(this_object),
            frame_number: None,
            script: None,
            caller: None,
        }
    }

    /// Link backtrace frames into a caller chain, return the stack top.
    pub(super) fn chain(frames: &[Value]) -> Option<Self> {
        frames
            .iter()
            .enumerate()
            .rev()
            .fold(None, |caller, (num, stack_frame)| {
                let mut frame = Self::from_stack_frame(stack_frame);
                frame.frame_number = Some(num);
                frame.caller = caller.map(Box::new);
                Some(frame)
            })
    }

    /// Iterate over this frame and all its callers.
    pub fn iter(&self) -> impl Iterator<Item = &CallFrame> {
        iter::successors(Some(self), |f| f.caller.as_deref())
    }
}
