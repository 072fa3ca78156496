use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::domain::{ElementId, EventKind, UnknownEventKind};

/// Value of a single element property as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl PropValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Bool(flag) => write!(f, "{flag}"),
            PropValue::Number(number) => write!(f, "{number}"),
            PropValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Number(value.into())
    }
}

impl From<u64> for PropValue {
    fn from(value: u64) -> Self {
        PropValue::Number(value.into())
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Text(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Text(value)
    }
}

/// Property name to value mapping sent with every relayed event.
pub type Props = BTreeMap<String, PropValue>;

/// Form body of `POST /`.
///
/// `props` is itself a JSON document, so the form stays flat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub event: String,
    #[serde(rename = "id_")]
    pub id: ElementId,
    pub props: String,
}

impl EventPayload {
    pub fn new(event: EventKind, id: ElementId, props: &Props) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: event.as_str().to_string(),
            id,
            props: serde_json::to_string(props)?,
        })
    }

    pub fn event_kind(&self) -> Result<EventKind, UnknownEventKind> {
        self.event.parse()
    }

    pub fn decode_props(&self) -> Result<Props, serde_json::Error> {
        serde_json::from_str(&self.props)
    }
}

/// Server directive to set one property on one element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateInstruction {
    #[serde(rename = "id_")]
    pub id: ElementId,
    pub key: String,
    pub value: PropValue,
}

impl UpdateInstruction {
    pub fn new(
        id: impl Into<ElementId>,
        key: impl Into<String>,
        value: impl Into<PropValue>,
    ) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body of `POST /`, applied in order.
pub type UpdateBatch = Vec<UpdateInstruction>;
