//! Page templates with widget placeholders of the form `{{ kind#id }}`.

use std::collections::HashSet;

use shared::domain::ElementId;
use thiserror::Error;

use crate::widget::{UnknownWidgetKind, WidgetKind};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("placeholder opened at byte {offset} is never closed")]
    Unterminated { offset: usize },
    #[error("placeholder '{placeholder}' must look like kind#id")]
    Malformed { placeholder: String },
    #[error(transparent)]
    UnknownKind(#[from] UnknownWidgetKind),
    #[error("widget id '{0}' appears more than once")]
    DuplicateId(ElementId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Widget { kind: WidgetKind, id: ElementId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut seen = HashSet::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open
                .find(CLOSE)
                .ok_or(TemplateError::Unterminated {
                    offset: offset + start,
                })?;
            let placeholder = after_open[..end].trim();
            let (kind, id) = placeholder
                .split_once('#')
                .filter(|(kind, id)| !kind.is_empty() && !id.is_empty() && !id.contains('#'))
                .ok_or_else(|| TemplateError::Malformed {
                    placeholder: placeholder.to_string(),
                })?;
            let kind: WidgetKind = kind.trim().parse()?;
            let id = ElementId::new(id.trim());
            if !seen.insert(id.clone()) {
                return Err(TemplateError::DuplicateId(id));
            }
            segments.push(Segment::Widget { kind, id });

            let consumed = start + OPEN.len() + end + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn widgets(&self) -> impl Iterator<Item = (WidgetKind, &ElementId)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Widget { kind, id } => Some((*kind, id)),
            Segment::Text(_) => None,
        })
    }
}
