// Capture of raw call/notify traffic for the developer inspector.

use std::collections::VecDeque;

use crate::payload::{DisplayNode, Payload, Scalar, TreeBuilder};
use crate::protocol::{CallPayload, NotifyPayload};

/// A service invocation with its arguments converted to [`Payload`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub method: String,
    pub arguments: Vec<Payload>,
}

impl From<NotifyPayload> for ServiceCall {
    fn from(raw: NotifyPayload) -> Self {
        ServiceCall {
            method: raw.method,
            arguments: raw.arguments.into_iter().map(Payload::from).collect(),
        }
    }
}

impl ServiceCall {
    /// Results and errors come back as `_result` / `_error` invocations.
    pub fn is_result(&self) -> bool {
        self.method == "_result" || self.method == "_error"
    }

    fn describe_arguments(&self) -> String {
        self.arguments
            .iter()
            .map(describe_argument)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// One captured exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedCall {
    Call { call: ServiceCall, result: ServiceCall },
    Notify(ServiceCall),
}

impl From<CallPayload> for CapturedCall {
    fn from(raw: CallPayload) -> Self {
        CapturedCall::Call {
            call: raw.call.into(),
            result: raw.result.into(),
        }
    }
}

impl From<NotifyPayload> for CapturedCall {
    fn from(raw: NotifyPayload) -> Self {
        CapturedCall::Notify(raw.into())
    }
}

impl CapturedCall {
    /// One-line description for the call list.
    pub fn summary(&self) -> String {
        match self {
            CapturedCall::Call { call, result } => format!(
                "Call {} ({}), Return ({})",
                call.method,
                call.describe_arguments(),
                result.describe_arguments()
            ),
            CapturedCall::Notify(notify) => {
                let method = if notify.method.is_empty() {
                    String::new()
                } else {
                    format!("{} ", notify.method)
                };
                format!("Recv {method}({})", notify.describe_arguments())
            }
        }
    }

    pub fn parts(&self) -> Vec<&ServiceCall> {
        match self {
            CapturedCall::Call { call, result } => vec![call, result],
            CapturedCall::Notify(notify) => vec![notify],
        }
    }
}

/// Names of the flex command message operations.
fn command_operation_name(op: i64) -> &'static str {
    match op {
        0 => "subscribe",
        1 => "unsubscribe",
        2 => "poll",
        4 => "client_sync",
        5 => "client_ping",
        7 => "cluster_request",
        8 => "login",
        9 => "logout",
        10 => "subscription_invalidate",
        11 => "multi_subscribe",
        12 => "disconnect",
        13 => "trigger_connect",
        _ => "unknown",
    }
}

/// Short label for a call argument: the operation of remoting/command
/// messages, the type of a typed message body, the type of a typed object,
/// and the plain string form otherwise.
pub fn describe_argument(arg: &Payload) -> String {
    match arg.field("operation") {
        Some(Payload::Scalar(Scalar::Text(op))) => return op.clone(),
        Some(Payload::Scalar(Scalar::Int(op))) => return command_operation_name(*op).to_string(),
        _ => {}
    }
    if let Some(body_type) = arg.field("body").and_then(Payload::type_name) {
        return body_type.to_string();
    }
    arg.to_string()
}

/// Message bodies carried by the arguments of `call`. Arguments that are not
/// messages, and messages without a body, contribute nothing.
pub fn message_bodies(call: &ServiceCall) -> Vec<&Payload> {
    call.arguments
        .iter()
        .filter_map(|arg| arg.field("body"))
        .filter(|body| !body.is_null())
        .collect()
}

/// Build one root per part of `entry`, labelled `Call` or `Return`, holding the
/// trees of its message bodies.
pub fn inspect(entry: &CapturedCall, builder: &TreeBuilder) -> Vec<DisplayNode> {
    entry
        .parts()
        .into_iter()
        .map(|part| {
            let children = message_bodies(part)
                .into_iter()
                .map(|body| {
                    builder
                        .build(body, "")
                        .unwrap_or_else(|| DisplayNode::leaf(body.to_string()))
                })
                .collect();
            let label = if part.is_result() { "Return" } else { "Call" };
            DisplayNode::new(label, children)
        })
        .collect()
}

/// Bounded log of captured calls. Entries get increasing ids that survive the
/// eviction of older entries.
#[derive(Debug)]
pub struct CallLog {
    entries: VecDeque<(u64, CapturedCall)>,
    next_id: u64,
    max_entries: usize,
}

impl CallLog {
    pub fn new(max_entries: usize) -> Self {
        CallLog {
            entries: VecDeque::new(),
            next_id: 0,
            max_entries: max_entries.max(1),
        }
    }

    /// Append `entry`, evicting the oldest one when full. Returns its id.
    pub fn push(&mut self, entry: CapturedCall) -> u64 {
        if self.entries.len() >= self.max_entries {
            self.entries.pop_front();
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push_back((id, entry));
        id
    }

    pub fn get(&self, id: u64) -> Option<&CapturedCall> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, entry)| entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
