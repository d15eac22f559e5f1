use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filler for leaf strings. A fixed character keeps the serialized size
/// of a generated context reproducible for a given set of dimensions.
const FILLER: &str = ".";

/// Synthetic payload: a nested string-keyed map whose shape is described
/// by an ordered list of axis widths. The last axis is the length of the
/// leaf strings, every axis before it is the width of one nesting level.
///
/// `[2, 3]` is a map of 2 keys, each holding a 3-character string;
/// `[4]` is a map of 4 empty strings; `[]` is an empty map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Text(String),
    Nested(BTreeMap<String, Payload>),
}

impl Payload {
    pub fn generate(dimensions: &[u64]) -> Self {
        match dimensions {
            [] => Payload::Nested(BTreeMap::new()),
            [width] => level(&[*width, 0]),
            _ => level(dimensions),
        }
    }
}

fn level(dimensions: &[u64]) -> Payload {
    match dimensions {
        [] => Payload::Nested(BTreeMap::new()),
        [length] => Payload::Text(FILLER.repeat(*length as usize)),
        [width, rest @ ..] => Payload::Nested(
            (0..*width)
                .map(|key| (key.to_string(), level(rest)))
                .collect(),
        ),
    }
}

/// One dialog turn side (request or response) carrying a synthetic
/// payload of the configured message dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub misc: Payload,
}

impl Message {
    pub fn generate(message_dimensions: &[u64]) -> Self {
        Self {
            misc: Payload::generate(message_dimensions),
        }
    }
}

/// The conversational record under benchmarking: turn-indexed labels,
/// requests and responses plus one context-level misc payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub labels: BTreeMap<u64, (String, String)>,
    pub requests: BTreeMap<u64, Message>,
    pub responses: BTreeMap<u64, Message>,
    pub misc: Payload,
}

impl Context {
    pub fn generate(dialog_len: u64, message_dimensions: &[u64], misc_dimensions: &[u64]) -> Self {
        let mut context = Self::with_misc(Payload::generate(misc_dimensions));
        context.grow_to(dialog_len, message_dimensions);

        context
    }

    pub fn with_misc(misc: Payload) -> Self {
        Self {
            labels: BTreeMap::new(),
            requests: BTreeMap::new(),
            responses: BTreeMap::new(),
            misc,
        }
    }

    pub fn dialog_len(&self) -> u64 {
        self.labels.len() as u64
    }

    /// Append turns until the context holds `dialog_len` of them. A no-op
    /// when the context is already at (or beyond) that length, so later
    /// updates stay true increments over the previous length.
    pub fn grow_to(&mut self, dialog_len: u64, message_dimensions: &[u64]) {
        for turn in self.dialog_len()..dialog_len {
            self.insert_turn(
                turn,
                (format!("flow_{turn}"), format!("node_{turn}")),
                Message::generate(message_dimensions),
                Message::generate(message_dimensions),
            );
        }
    }

    pub fn insert_turn(
        &mut self,
        turn: u64,
        label: (String, String),
        request: Message,
        response: Message,
    ) {
        self.labels.insert(turn, label);
        self.requests.insert(turn, request);
        self.responses.insert(turn, response);
    }

    /// Turns in increasing order. Labels, requests and responses are kept
    /// in lockstep by construction.
    pub fn turns(&self) -> impl Iterator<Item = (u64, &(String, String), &Message, &Message)> {
        self.labels.iter().filter_map(move |(&turn, label)| {
            match (self.requests.get(&turn), self.responses.get(&turn)) {
                (Some(request), Some(response)) => Some((turn, label, request, response)),
                _ => None,
            }
        })
    }
}

/// Serialized JSON byte length, the size measure used for `Sizes`.
pub fn serialized_size<T: Serialize>(value: &T) -> Result<u64, serde_json::Error> {
    Ok(serde_json::to_vec(value)?.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_axes_describe_width_then_leaf_length() {
        match Payload::generate(&[2, 3]) {
            Payload::Nested(map) => {
                assert_eq!(map.len(), 2);
                for value in map.values() {
                    assert_eq!(value, &Payload::Text("...".to_owned()));
                }
            }
            other => panic!("expected a nested payload, got {other:?}"),
        }
    }

    #[test]
    fn single_axis_payload_is_a_map_of_empty_strings() {
        match Payload::generate(&[4]) {
            Payload::Nested(map) => {
                assert_eq!(map.len(), 4);
                for value in map.values() {
                    assert_eq!(value, &Payload::Text(String::new()));
                }
            }
            other => panic!("expected a nested payload, got {other:?}"),
        }
    }

    #[test]
    fn empty_dimensions_yield_a_minimal_payload() {
        assert_eq!(Payload::generate(&[]), Payload::Nested(BTreeMap::new()));
        assert_eq!(serialized_size(&Payload::generate(&[])).unwrap(), 2);
    }

    #[test]
    fn zero_length_dialog_is_a_valid_context() {
        let context = Context::generate(0, &[], &[]);

        assert_eq!(context.dialog_len(), 0);
        assert!(context.labels.is_empty());
        assert!(serialized_size(&context).unwrap() >= 1);
    }

    #[test]
    fn generation_is_deterministic() {
        let first = Context::generate(5, &[2, 3], &[10, 10]);
        let second = Context::generate(5, &[2, 3], &[10, 10]);

        assert_eq!(first, second);
        assert_eq!(
            serialized_size(&first).unwrap(),
            serialized_size(&second).unwrap()
        );
    }

    #[test]
    fn growing_appends_turns_in_order() {
        let mut context = Context::generate(2, &[1], &[]);
        context.grow_to(4, &[1]);

        assert_eq!(context.dialog_len(), 4);
        assert_eq!(context, Context::generate(4, &[1], &[]));
        assert_eq!(
            context.labels.get(&3),
            Some(&("flow_3".to_owned(), "node_3".to_owned()))
        );

        // shrinking is never requested; growing to a smaller length is a no-op
        context.grow_to(1, &[1]);
        assert_eq!(context.dialog_len(), 4);
    }

    #[test]
    fn turns_iterate_in_lockstep() {
        let context = Context::generate(3, &[1, 2], &[]);
        let turns: Vec<u64> = context.turns().map(|(turn, _, _, _)| turn).collect();

        assert_eq!(turns, vec![0, 1, 2]);
    }

    #[test]
    fn payloads_roundtrip_through_json() {
        let context = Context::generate(2, &[2, 3], &[1, 2, 3]);
        let raw = serde_json::to_string(&context).unwrap();
        let parsed: Context = serde_json::from_str(&raw).unwrap();

        assert_eq!(parsed, context);
    }
}
