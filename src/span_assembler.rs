use md5::{Digest, Md5};

use crate::event::{
    EventKey, PartialSpan, BITSWAP_CLIENT, BITSWAP_SERVER, GET_PROVIDERS_CLIENT, GET_PROVIDERS_SERVER,
    MANDATORY_SPAN_NAMES, READ_FROM_FILE_STORE,
};

/// A fully paired span ready for (or pending) emission. `parent_span_id` is
/// `""` for roots, never omitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledSpan {
    pub span_id: String,
    pub node_id: String,
    pub peer_node_id: String,
    pub span_name: String,
    pub start_ns: i64,
    pub end_ns: i64,
    pub parent_span_id: String,
}

/// Deterministic span identity: first 16 hex chars of the MD5 of
/// `"<trace_id>_<node_id>_<peer_node_id>_<span_name>"`. Ignores any wire
/// `spanId` by construction — dedupe must work across retries regardless of
/// what the emitter sent.
pub fn compute_span_id(trace_id: &str, node_id: &str, peer_node_id: &str, span_name: &str) -> String {
    let input = format!("{trace_id}_{node_id}_{peer_node_id}_{span_name}");
    let digest = Md5::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Where a span-name's parent must be located, per the causal graph.
enum ParentLocation {
    /// No parent (a root span).
    None,
    /// On the peer node (`peer_node_id` of the span in question).
    Peer(&'static str),
    /// On the same node.
    Same(&'static str),
}

fn parent_location(span_name: &str) -> ParentLocation {
    match span_name {
        GET_PROVIDERS_CLIENT => ParentLocation::None,
        GET_PROVIDERS_SERVER => ParentLocation::Peer(GET_PROVIDERS_CLIENT),
        BITSWAP_CLIENT => ParentLocation::None,
        BITSWAP_SERVER => ParentLocation::Peer(BITSWAP_CLIENT),
        READ_FROM_FILE_STORE => ParentLocation::Same(BITSWAP_SERVER),
        _ => ParentLocation::None,
    }
}

struct Candidate {
    key: EventKey,
    start_ns: i64,
    end_ns: i64,
}

/// Builds the candidate list, resolves parent lineage, and returns every
/// span that is emittable (its parent, if any, was found among this
/// bucket's complete spans) gated on observing all five mandatory types.
/// Must be called while holding the owning trace's lock.
pub fn assemble(trace_id: &str, events: &std::collections::HashMap<EventKey, PartialSpan>) -> Vec<AssembledSpan> {
    let candidates: Vec<Candidate> = events
        .iter()
        .filter_map(|(key, span)| {
            span.is_complete().then(|| Candidate {
                key: key.clone(),
                start_ns: span.start_ns.unwrap(),
                end_ns: span.end_ns.unwrap(),
            })
        })
        .collect();

    let observed: std::collections::HashSet<&str> = candidates.iter().map(|c| c.key.span_name.as_str()).collect();
    let gate_open = MANDATORY_SPAN_NAMES.iter().all(|name| observed.contains(name));
    if !gate_open {
        return Vec::new();
    }

    let find = |node_id: &str, span_name: &str| -> Option<&Candidate> {
        candidates
            .iter()
            .find(|c| c.key.node_id == node_id && c.key.span_name == span_name)
    };

    let mut emittable = Vec::new();
    for c in &candidates {
        let parent_id = match parent_location(&c.key.span_name) {
            ParentLocation::None => Some(String::new()),
            ParentLocation::Peer(parent_type) => find(&c.key.peer_node_id, parent_type).map(|p| {
                compute_span_id(trace_id, &p.key.node_id, &p.key.peer_node_id, &p.key.span_name)
            }),
            ParentLocation::Same(parent_type) => find(&c.key.node_id, parent_type).map(|p| {
                compute_span_id(trace_id, &p.key.node_id, &p.key.peer_node_id, &p.key.span_name)
            }),
        };

        let Some(parent_span_id) = parent_id else {
            continue; // not yet emittable: required parent hasn't reported
        };

        emittable.push(AssembledSpan {
            span_id: compute_span_id(trace_id, &c.key.node_id, &c.key.peer_node_id, &c.key.span_name),
            node_id: c.key.node_id.clone(),
            peer_node_id: c.key.peer_node_id.clone(),
            span_name: c.key.span_name.clone(),
            start_ns: c.start_ns,
            end_ns: c.end_ns,
            parent_span_id,
        });
    }
    emittable
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Stage;

    fn complete(node_id: &str, peer_node_id: &str, span_name: &str, start: i64, end: i64) -> (EventKey, PartialSpan) {
        let mut span = PartialSpan::default();
        span.set(Stage::Start, start);
        span.set(Stage::End, end);
        (
            EventKey { node_id: node_id.into(), peer_node_id: peer_node_id.into(), span_name: span_name.into() },
            span,
        )
    }

    fn sample_trace() -> std::collections::HashMap<EventKey, PartialSpan> {
        // node2 is the client that asks node1 (GET_PROVIDERS) and node3 (BITSWAP).
        [
            complete("node2", "node1", GET_PROVIDERS_CLIENT, 1, 10),
            complete("node1", "node2", GET_PROVIDERS_SERVER, 2, 8),
            complete("node2", "node3", BITSWAP_CLIENT, 11, 40),
            complete("node3", "node2", BITSWAP_SERVER, 12, 35),
            complete("node3", "node2", READ_FROM_FILE_STORE, 13, 20),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn happy_path_emits_all_five_with_correct_parents() {
        let events = sample_trace();
        let spans = assemble("trace1", &events);
        assert_eq!(spans.len(), 5);

        let by_name = |name: &str| spans.iter().find(|s| s.span_name == name).unwrap();

        let gpc = by_name(GET_PROVIDERS_CLIENT);
        assert_eq!(gpc.parent_span_id, "");

        let gps = by_name(GET_PROVIDERS_SERVER);
        assert_eq!(gps.parent_span_id, compute_span_id("trace1", "node2", "node1", GET_PROVIDERS_CLIENT));
        assert_eq!(gps.parent_span_id, gpc.span_id);

        let bc = by_name(BITSWAP_CLIENT);
        assert_eq!(bc.parent_span_id, "");

        let bs = by_name(BITSWAP_SERVER);
        assert_eq!(bs.parent_span_id, bc.span_id);

        let rffs = by_name(READ_FROM_FILE_STORE);
        assert_eq!(rffs.parent_span_id, bs.span_id);
    }

    #[test]
    fn missing_peer_suppresses_all_emission() {
        let mut events = sample_trace();
        events.retain(|k, _| k.span_name != GET_PROVIDERS_CLIENT);
        let spans = assemble("trace1", &events);
        assert!(spans.is_empty());
    }

    #[test]
    fn read_from_file_store_without_sibling_bitswap_server_is_not_emitted_as_root() {
        let mut events = sample_trace();
        events.retain(|k, _| k.span_name != BITSWAP_SERVER);
        // Gate is closed anyway (missing mandatory type) but this also
        // exercises the per-span "not yet emittable" path directly.
        let spans = assemble("trace1", &events);
        assert!(spans.is_empty());
    }

    #[test]
    fn span_id_is_deterministic_and_ignores_wire_span_id() {
        let a = compute_span_id("t", "n1", "n2", "X");
        let b = compute_span_id("t", "n1", "n2", "X");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
