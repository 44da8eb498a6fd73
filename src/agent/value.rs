//! Presentation of values referenced by debugger responses.

use indexmap::IndexMap;
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Named values of a scope or of an object's properties, in protocol order.
pub type PropertyMap = IndexMap<String, ScopeValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Object,
    Function,
}

/// Object living in the remote VM, children are resolved lazily by handle.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    kind: ObjectKind,
    reference: Option<i64>,
    class_name: Option<String>,
    raw: Value,
    resolved: Option<Box<ResolvedObject>>,
}

impl RemoteObject {
    pub fn new(kind: ObjectKind, reference: Option<i64>) -> Self {
        Self {
            kind,
            reference,
            class_name: None,
            raw: Value::Null,
            resolved: None,
        }
    }

    fn from_mirror(kind: ObjectKind, mirror: &Value) -> Self {
        Self {
            kind,
            reference: mirror.get("ref").and_then(Value::as_i64),
            class_name: mirror
                .get("className")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            raw: mirror.clone(),
            resolved: None,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// Handle of the object in the remote VM.
    pub fn reference(&self) -> Option<i64> {
        self.reference
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Protocol representation this object was built from.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn resolved(&self) -> Option<&ResolvedObject> {
        self.resolved.as_deref()
    }

    pub fn set_resolved(&mut self, resolved: ResolvedObject) {
        self.resolved = Some(Box::new(resolved));
    }
}

/// Children of a remote object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedObject {
    pub properties: PropertyMap,
    pub proto_object: Option<ScopeValue>,
    pub prototype_object: Option<ScopeValue>,
    pub constructor_function: Option<ScopeValue>,
    /// Set when resolution failed.
    pub error: Option<String>,
}

impl ResolvedObject {
    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// User-friendly representation of a protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum ScopeValue {
    Object(RemoteObject),
    Primitive(Value),
    /// Textual placeholder: `undefined`, `null`, a name or a diagnostic.
    Text(String),
}

impl Display for ScopeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScopeValue::Object(obj) => {
                let kind = match obj.kind {
                    ObjectKind::Object => obj.class_name().unwrap_or("Object"),
                    ObjectKind::Function => "function",
                };
                match obj.reference {
                    Some(r) => write!(f, "#<{kind} @{r}>"),
                    None => write!(f, "#<{kind}>"),
                }
            }
            ScopeValue::Primitive(v) => write!(f, "{v}"),
            ScopeValue::Text(text) => f.write_str(text),
        }
    }
}

fn js_display(v: Option<&Value>) -> String {
    match v {
        None => "undefined".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Convert an object reference from a debugger response into its presentation.
pub fn format_object_reference(v: &Value) -> ScopeValue {
    let r#type = v.get("type").and_then(Value::as_str);
    match r#type {
        Some("object") => {
            return ScopeValue::Object(RemoteObject::from_mirror(ObjectKind::Object, v))
        }
        Some("function") => {
            return ScopeValue::Object(RemoteObject::from_mirror(ObjectKind::Function, v))
        }
        _ => {}
    }

    if let Some(value) = v.get("value") {
        return ScopeValue::Primitive(value.clone());
    }

    match r#type {
        Some("undefined") => return ScopeValue::Text("undefined".to_string()),
        Some("null") => return ScopeValue::Text("null".to_string()),
        _ => {}
    }

    if let Some(name) = non_empty_str(v.get("name")) {
        return ScopeValue::Text(name.to_string());
    }
    if let Some(class_name) = non_empty_str(v.get("className")) {
        return ScopeValue::Text(class_name.to_string());
    }

    ScopeValue::Text(format!(
        "<unresolved ref: {}, type: {}>",
        js_display(v.get("ref")),
        js_display(v.get("type"))
    ))
}

fn property_name(v: &Value) -> Option<String> {
    match v.get("name")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Put each named property (or local variable) into `map`. Unnamed properties are skipped,
/// they appear when a function gets more actual parameters than formal ones.
pub fn properties_to_map(properties: &Value, map: &mut PropertyMap) {
    let Some(properties) = properties.as_array() else {
        return;
    };
    for prop in properties {
        if let Some(name) = property_name(prop) {
            let value = prop.get("value").unwrap_or(&Value::Null);
            map.insert(name, format_object_reference(value));
        }
    }
}

/// Put arguments into `map`, anonymous arguments are named by their position.
pub fn arguments_to_map(arguments: &Value, map: &mut PropertyMap) {
    let Some(arguments) = arguments.as_array() else {
        return;
    };
    for (j, arg) in arguments.iter().enumerate() {
        let name = property_name(arg).unwrap_or_else(|| format!("<arg #{j}>"));
        let value = arg.get("value").unwrap_or(&Value::Null);
        map.insert(name, format_object_reference(value));
    }
}

/// Collect properties and prototype links of an object from a `lookup` response.
pub fn format_object_properties(object: &Value) -> ResolvedObject {
    let mut resolved = ResolvedObject::default();
    if let Some(properties) = object.get("properties") {
        properties_to_map(properties, &mut resolved.properties);
    }
    resolved.proto_object = object.get("protoObject").map(format_object_reference);
    resolved.prototype_object = object.get("prototypeObject").map(format_object_reference);
    resolved.constructor_function = object
        .get("constructorFunction")
        .map(format_object_reference);
    resolved
}
