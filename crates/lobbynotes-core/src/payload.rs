// Untyped wire payloads and their conversion into display trees.

use std::fmt;

use serde_json::Value;

/// Default recursion bound for [`TreeBuilder`].
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Object key carrying the remote type name of a keyed object.
const TYPE_KEY: &str = "$type";

/// Object key marking a value the loader could not map to JSON.
const OPAQUE_KEY: &str = "$opaque";

/// The closed set of shapes a wire payload can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Named fields in wire order, optionally tagged with a type name.
    Object {
        type_name: Option<String>,
        fields: Vec<(String, Payload)>,
    },
    List(Vec<Payload>),
    Scalar(Scalar),
    Null,
    /// A value with no structured representation; only its description is kept.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Payload {
    pub fn field(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Object { fields, .. } => {
                fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
            }
            _ => None,
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        match self {
            Payload::Object { type_name, .. } => type_name.as_deref(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Scalar(Scalar::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Object { type_name, .. } => {
                f.write_str(type_name.as_deref().unwrap_or("Object"))
            }
            Payload::List(items) => write!(f, "Array[{}]", items.len()),
            Payload::Scalar(s) => write!(f, "{s}"),
            Payload::Null => f.write_str("null"),
            Payload::Unsupported(desc) => f.write_str(desc),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Null,
            Value::Bool(b) => Payload::Scalar(Scalar::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Payload::Scalar(Scalar::Int(i)),
                None => Payload::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN))),
            },
            Value::String(s) => Payload::Scalar(Scalar::Text(s)),
            Value::Array(items) => Payload::List(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(Value::String(desc)) = map.get(OPAQUE_KEY) {
                        return Payload::Unsupported(desc.clone());
                    }
                }
                let type_name = match map.get(TYPE_KEY) {
                    Some(Value::String(name)) => Some(name.clone()),
                    _ => None,
                };
                let fields = map
                    .into_iter()
                    .filter(|(k, _)| type_name.is_none() || k != TYPE_KEY)
                    .map(|(k, v)| (k, Payload::from(v)))
                    .collect();
                Payload::Object { type_name, fields }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Display tree
// ---------------------------------------------------------------------------

/// A labelled node of the diagnostic tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayNode {
    pub label: String,
    pub children: Vec<DisplayNode>,
}

impl DisplayNode {
    pub fn new(label: impl Into<String>, children: Vec<DisplayNode>) -> Self {
        DisplayNode {
            label: label.into(),
            children,
        }
    }

    pub fn leaf(label: impl Into<String>) -> Self {
        Self::new(label, Vec::new())
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Render the tree as indented lines, two spaces per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&self.label);
        out.push('\n');
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}

/// Converts payloads into display trees, giving up on expansion below
/// `max_depth` levels.
#[derive(Debug, Clone, Copy)]
pub struct TreeBuilder {
    max_depth: usize,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        TreeBuilder {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl TreeBuilder {
    pub fn new(max_depth: usize) -> Self {
        TreeBuilder { max_depth }
    }

    /// Build the tree for `value`. Returns `None` for scalars, nulls and
    /// unsupported values; the caller renders those from their string form.
    pub fn build(&self, value: &Payload, label_hint: &str) -> Option<DisplayNode> {
        self.build_at(value, label_hint, 0)
    }

    fn build_at(&self, value: &Payload, label_hint: &str, depth: usize) -> Option<DisplayNode> {
        match value {
            Payload::Object { type_name, fields } => {
                let label = match type_name.as_deref() {
                    Some(name) if !name.is_empty() => name.to_string(),
                    _ => hint_or(label_hint, "Object"),
                };
                if depth >= self.max_depth {
                    return Some(truncated(&label));
                }
                let children = fields
                    .iter()
                    .map(|(key, field)| {
                        self.build_at(field, key, depth + 1)
                            .unwrap_or_else(|| DisplayNode::leaf(format!("{key} = {field}")))
                    })
                    .collect();
                Some(DisplayNode::new(label, children))
            }
            Payload::List(items) => {
                let label = hint_or(label_hint, "Array");
                if items.is_empty() {
                    return Some(DisplayNode::leaf(format!("{label} = {{ }}")));
                }
                if depth >= self.max_depth {
                    return Some(truncated(&label));
                }
                let children = items
                    .iter()
                    .map(|item| {
                        self.build_at(item, &label, depth + 1)
                            .unwrap_or_else(|| DisplayNode::leaf(item.to_string()))
                    })
                    .collect();
                Some(DisplayNode::new(label, children))
            }
            Payload::Scalar(_) | Payload::Null | Payload::Unsupported(_) => None,
        }
    }
}

/// Build with the default depth bound.
pub fn build(value: &Payload, label_hint: &str) -> Option<DisplayNode> {
    TreeBuilder::default().build(value, label_hint)
}

fn hint_or(hint: &str, fallback: &str) -> String {
    if hint.is_empty() {
        fallback.to_string()
    } else {
        hint.to_string()
    }
}

fn truncated(label: &str) -> DisplayNode {
    DisplayNode::leaf(format!("{label} = …"))
}
