use std::{fmt, str::FromStr};

use shared::{
    domain::{ElementId, DEFAULT_MARKER_CLASS},
    protocol::{PropValue, Props},
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    Input,
    Label,
    Button,
    Checkbox,
}

impl WidgetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WidgetKind::Input => "input",
            WidgetKind::Label => "label",
            WidgetKind::Button => "button",
            WidgetKind::Checkbox => "checkbox",
        }
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown widget kind '{0}'")]
pub struct UnknownWidgetKind(pub String);

impl FromStr for WidgetKind {
    type Err = UnknownWidgetKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(WidgetKind::Input),
            "label" => Ok(WidgetKind::Label),
            "button" => Ok(WidgetKind::Button),
            "checkbox" => Ok(WidgetKind::Checkbox),
            other => Err(UnknownWidgetKind(other.to_string())),
        }
    }
}

/// Server-side mirror of one element on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: ElementId,
    pub kind: WidgetKind,
    props: Props,
}

impl Widget {
    pub fn new(id: impl Into<ElementId>, kind: WidgetKind) -> Self {
        let mut props = Props::new();
        match kind {
            WidgetKind::Input => {
                props.insert("value".into(), PropValue::from(""));
            }
            WidgetKind::Label | WidgetKind::Button => {
                props.insert("innerText".into(), PropValue::from(""));
            }
            WidgetKind::Checkbox => {
                props.insert("value".into(), PropValue::from("on"));
                props.insert("checked".into(), PropValue::from(false));
            }
        }
        Self {
            id: id.into(),
            kind,
            props,
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropValue> {
        self.props.get(key)
    }

    pub fn value(&self) -> Option<&PropValue> {
        self.get("value")
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<PropValue>) {
        self.props.insert(key.into(), value.into());
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).and_then(PropValue::as_bool).unwrap_or(false)
    }

    fn text(&self, key: &str) -> String {
        self.get(key).map(ToString::to_string).unwrap_or_default()
    }

    /// Markup for the widget reflecting its current state.
    pub fn render(&self) -> String {
        let id = escape_html(self.id.as_str());
        let disabled = if self.flag("disabled") { " disabled" } else { "" };
        match self.kind {
            WidgetKind::Input => {
                let value = self.text("value");
                let value_attr = if value.is_empty() {
                    String::new()
                } else {
                    format!(" value=\"{}\"", escape_html(&value))
                };
                format!(
                    "<input type=\"text\" id=\"{id}\" class=\"{DEFAULT_MARKER_CLASS}\"{value_attr}{disabled}>"
                )
            }
            WidgetKind::Label => format!(
                "<p id=\"{id}\" class=\"{DEFAULT_MARKER_CLASS}\">{}</p>",
                escape_html(&self.text("innerText"))
            ),
            WidgetKind::Button => format!(
                "<button id=\"{id}\" class=\"{DEFAULT_MARKER_CLASS}\"{disabled}>{}</button>",
                escape_html(&self.text("innerText"))
            ),
            WidgetKind::Checkbox => {
                let checked = if self.flag("checked") { " checked" } else { "" };
                format!(
                    "<input type=\"checkbox\" id=\"{id}\" class=\"{DEFAULT_MARKER_CLASS}\"{checked}{disabled}>"
                )
            }
        }
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
