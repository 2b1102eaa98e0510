use serde::Deserialize;

use crate::error::AppError;

/// Wire shape of `POST /v3/buildspan`. `spanId` and `threadId` are accepted
/// (for forward-compatibility with emitters that send them) but dropped
/// immediately after parsing: the spec's identity tuple is node/peer/type,
/// and wire `spanId` is never trusted over the computed MD5 identity.
#[derive(Debug, Deserialize)]
pub struct RawEventWire {
    #[serde(rename = "traceId")]
    pub trace_id: String,
    #[serde(rename = "spanId")]
    pub span_id: Option<String>,
    #[serde(rename = "nodeId")]
    pub node_id: String,
    #[serde(rename = "peerNodeId")]
    pub peer_node_id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub timestamp: i64,
    #[serde(rename = "eventType")]
    pub event_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    End,
}

/// One accepted half-event: a wire event split into its span name and
/// START/END stage. Immutable once accepted.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub trace_id: String,
    pub node_id: String,
    pub peer_node_id: String,
    pub span_name: String,
    pub stage: Stage,
    pub timestamp_ns: i64,
}

impl RawEvent {
    /// Parses `event_type` by splitting on the last `_`; the suffix must be
    /// exactly `START` or `END`. No partial state is persisted for a
    /// malformed event.
    pub fn from_wire(wire: RawEventWire) -> Result<Self, AppError> {
        let (span_name, stage) = parse_event_type(&wire.event_type)?;
        Ok(Self {
            trace_id: wire.trace_id,
            node_id: wire.node_id,
            peer_node_id: wire.peer_node_id,
            span_name,
            stage,
            timestamp_ns: wire.timestamp,
        })
    }
}

fn parse_event_type(event_type: &str) -> Result<(String, Stage), AppError> {
    let (prefix, suffix) = event_type
        .rsplit_once('_')
        .ok_or_else(|| AppError::MalformedEvent(format!("eventType `{event_type}` has no `_` suffix")))?;
    let stage = match suffix {
        "START" => Stage::Start,
        "END" => Stage::End,
        _ => {
            return Err(AppError::MalformedEvent(format!(
                "eventType `{event_type}` does not end with START or END"
            )))
        }
    };
    Ok((prefix.to_string(), stage))
}

/// Identity of a half-open span at ingest time. Thread-id is intentionally
/// omitted: the causal graph is defined over the node/peer/type triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub node_id: String,
    pub peer_node_id: String,
    pub span_name: String,
}

impl From<&RawEvent> for EventKey {
    fn from(e: &RawEvent) -> Self {
        EventKey {
            node_id: e.node_id.clone(),
            peer_node_id: e.peer_node_id.clone(),
            span_name: e.span_name.clone(),
        }
    }
}

/// Mapping from stage to timestamp for one (node, peer, span_name) triple.
/// Complete when both START and END are present.
#[derive(Debug, Clone, Default)]
pub struct PartialSpan {
    pub start_ns: Option<i64>,
    pub end_ns: Option<i64>,
}

impl PartialSpan {
    pub fn set(&mut self, stage: Stage, ts: i64) {
        match stage {
            Stage::Start => self.start_ns = Some(ts),
            Stage::End => self.end_ns = Some(ts),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.start_ns.is_some() && self.end_ns.is_some()
    }
}

pub const GET_PROVIDERS_CLIENT: &str = "GET_PROVIDERS_CLIENT";
pub const GET_PROVIDERS_SERVER: &str = "GET_PROVIDERS_SERVER";
pub const BITSWAP_CLIENT: &str = "BITSWAP_CLIENT";
pub const BITSWAP_SERVER: &str = "BITSWAP_SERVER";
pub const READ_FROM_FILE_STORE: &str = "READ_FROM_FILE_STORE";

pub const MANDATORY_SPAN_NAMES: [&str; 5] = [
    GET_PROVIDERS_CLIENT,
    GET_PROVIDERS_SERVER,
    BITSWAP_CLIENT,
    BITSWAP_SERVER,
    READ_FROM_FILE_STORE,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_and_end_suffix() {
        assert_eq!(parse_event_type("BITSWAP_CLIENT_START").unwrap(), ("BITSWAP_CLIENT".to_string(), Stage::Start));
        assert_eq!(parse_event_type("READ_FROM_FILE_STORE_END").unwrap(), ("READ_FROM_FILE_STORE".to_string(), Stage::End));
    }

    #[test]
    fn rejects_missing_or_unknown_suffix() {
        assert!(parse_event_type("NO_UNDERSCORE").is_err());
        assert!(parse_event_type("BITSWAP_CLIENT_MIDDLE").is_err());
    }
}
