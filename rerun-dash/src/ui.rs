//! Widget layer
//!
//! A page declares its widgets while it runs, reading each widget's current
//! value from the session state, and emits output blocks. Interactions are
//! validated against the widgets declared by the previous rerun.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Errors raised for invalid widget input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WidgetError {
    #[error("unknown widget `{0}`")]
    Unknown(String),

    #[error("widget `{widget}` expects {expected}, got `{value}`")]
    WrongType {
        widget: String,
        expected: &'static str,
        value: String,
    },

    #[error("{value} is outside {min}..={max} for `{widget}`")]
    OutOfRange {
        widget: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("`{value}` is not an option of `{widget}`")]
    NotAnOption { widget: String, value: String },

    #[error("`{0}` is a button; press it instead")]
    IsAButton(String),

    #[error("`{0}` is not a button")]
    NotAButton(String),
}

/// Raw value carried by an interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl WidgetValue {
    /// Parse command-line text: booleans, integers, floats, comma lists, text
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(b) = raw.parse::<bool>() {
            WidgetValue::Bool(b)
        } else if let Ok(i) = raw.parse::<i64>() {
            WidgetValue::Int(i)
        } else if let Ok(f) = raw.parse::<f64>() {
            WidgetValue::Float(f)
        } else if raw.contains(',') {
            WidgetValue::List(
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
            )
        } else {
            WidgetValue::Text(raw.to_string())
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            WidgetValue::Int(i) => Some(*i),
            WidgetValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            WidgetValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            WidgetValue::Int(i) => Some(*i as f64),
            WidgetValue::Float(f) => Some(*f),
            WidgetValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            WidgetValue::Text(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn as_list(&self) -> Vec<String> {
        match self {
            WidgetValue::List(items) => items.clone(),
            WidgetValue::Text(s) if s.is_empty() => Vec::new(),
            other => vec![other.as_text()],
        }
    }
}

impl fmt::Display for WidgetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidgetValue::Bool(b) => write!(f, "{}", b),
            WidgetValue::Int(i) => write!(f, "{}", i),
            WidgetValue::Float(x) => write!(f, "{}", x),
            WidgetValue::Text(s) => f.write_str(s),
            WidgetValue::List(items) => f.write_str(&items.join(",")),
        }
    }
}

/// One user action that triggers a rerun
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Interaction {
    /// Change a widget's value
    Set { widget: String, value: WidgetValue },
    /// Press a button; it reads `true` for exactly one rerun
    Press { button: String },
}

impl Interaction {
    /// Parse `widget=value`
    pub fn parse_set(raw: &str) -> Result<Self, WidgetError> {
        let (widget, value) = raw.split_once('=').ok_or_else(|| WidgetError::WrongType {
            widget: raw.to_string(),
            expected: "widget=value",
            value: raw.to_string(),
        })?;
        Ok(Interaction::Set {
            widget: widget.trim().to_string(),
            value: WidgetValue::parse(value),
        })
    }

    pub fn press(button: impl Into<String>) -> Self {
        Interaction::Press {
            button: button.into(),
        }
    }

    pub fn set(widget: impl Into<String>, value: WidgetValue) -> Self {
        Interaction::Set {
            widget: widget.into(),
            value,
        }
    }
}

/// Kind and constraints of a declared widget
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetKind {
    Slider { min: i64, max: i64 },
    NumberInput { min: f64, max: f64 },
    Select { options: Vec<String> },
    Multiselect { options: Vec<String> },
    TextInput,
    Button,
}

impl WidgetKind {
    /// Check `value` against the widget's constraints, returning it in the
    /// widget's canonical representation.
    pub fn validate(&self, widget: &str, value: &WidgetValue) -> Result<WidgetValue, WidgetError> {
        let wrong_type = |expected: &'static str| WidgetError::WrongType {
            widget: widget.to_string(),
            expected,
            value: value.to_string(),
        };

        match self {
            WidgetKind::Slider { min, max } => {
                let v = value.as_i64().ok_or_else(|| wrong_type("an integer"))?;
                if v < *min || v > *max {
                    return Err(WidgetError::OutOfRange {
                        widget: widget.to_string(),
                        value: v.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                Ok(WidgetValue::Int(v))
            }
            WidgetKind::NumberInput { min, max } => {
                let v = value.as_f64().ok_or_else(|| wrong_type("a number"))?;
                if !(v >= *min && v <= *max) {
                    return Err(WidgetError::OutOfRange {
                        widget: widget.to_string(),
                        value: v.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                Ok(WidgetValue::Float(v))
            }
            WidgetKind::Select { options } => {
                let v = value.as_text();
                if !options.contains(&v) {
                    return Err(WidgetError::NotAnOption {
                        widget: widget.to_string(),
                        value: v,
                    });
                }
                Ok(WidgetValue::Text(v))
            }
            WidgetKind::Multiselect { options } => {
                let items = value.as_list();
                if let Some(bad) = items.iter().find(|item| !options.contains(item)) {
                    return Err(WidgetError::NotAnOption {
                        widget: widget.to_string(),
                        value: bad.clone(),
                    });
                }
                Ok(WidgetValue::List(items))
            }
            WidgetKind::TextInput => Ok(WidgetValue::Text(value.as_text())),
            WidgetKind::Button => Err(WidgetError::IsAButton(widget.to_string())),
        }
    }
}

/// Output produced by a rerun
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum Block {
    Title {
        text: String,
    },
    Text {
        text: String,
    },
    Metric {
        label: String,
        value: String,
    },
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    BarChart {
        title: String,
        bars: Vec<(String, f64)>,
    },
    Error {
        message: String,
    },
}

/// Widget values held by a session between reruns
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WidgetState {
    values: BTreeMap<String, WidgetValue>,
}

impl WidgetState {
    pub fn get(&self, widget: &str) -> Option<&WidgetValue> {
        self.values.get(widget)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn insert(&mut self, widget: String, value: WidgetValue) {
        self.values.insert(widget, value);
    }
}

/// Handle a page uses during one rerun
pub struct Ui<'s> {
    state: &'s WidgetState,
    pressed: Option<&'s str>,
    declared: BTreeMap<String, WidgetKind>,
    blocks: Vec<Block>,
}

impl<'s> Ui<'s> {
    pub fn new(state: &'s WidgetState, pressed: Option<&'s str>) -> Self {
        Self {
            state,
            pressed,
            declared: BTreeMap::new(),
            blocks: Vec::new(),
        }
    }

    /// Declare a widget and return its current value (validated), or `None`
    /// if the session holds nothing valid for it.
    fn current(&mut self, label: &str, kind: WidgetKind) -> Option<WidgetValue> {
        let current = self
            .state
            .get(label)
            .and_then(|value| kind.validate(label, value).ok());
        self.declared.insert(label.to_string(), kind);
        current
    }

    pub fn slider(&mut self, label: &str, min: i64, max: i64, default: i64) -> i64 {
        match self.current(label, WidgetKind::Slider { min, max }) {
            Some(WidgetValue::Int(v)) => v,
            _ => default.clamp(min, max),
        }
    }

    pub fn number_input(&mut self, label: &str, min: f64, max: f64, default: f64) -> f64 {
        match self.current(label, WidgetKind::NumberInput { min, max }) {
            Some(WidgetValue::Float(v)) => v,
            _ => default.clamp(min, max),
        }
    }

    pub fn select(&mut self, label: &str, options: &[&str], default_index: usize) -> String {
        let options: Vec<String> = options.iter().map(|o| o.to_string()).collect();
        let fallback = options
            .get(default_index)
            .or_else(|| options.first())
            .cloned()
            .unwrap_or_default();

        match self.current(label, WidgetKind::Select { options }) {
            Some(WidgetValue::Text(v)) => v,
            _ => fallback,
        }
    }

    pub fn multiselect(&mut self, label: &str, options: &[&str], default: &[&str]) -> Vec<String> {
        let options: Vec<String> = options.iter().map(|o| o.to_string()).collect();
        let fallback: Vec<String> = default
            .iter()
            .map(|d| d.to_string())
            .filter(|d| options.contains(d))
            .collect();

        match self.current(label, WidgetKind::Multiselect { options }) {
            Some(WidgetValue::List(v)) => v,
            _ => fallback,
        }
    }

    pub fn text_input(&mut self, label: &str, default: &str) -> String {
        match self.current(label, WidgetKind::TextInput) {
            Some(WidgetValue::Text(v)) => v,
            _ => default.to_string(),
        }
    }

    /// `true` only during the rerun triggered by pressing this button
    pub fn button(&mut self, label: &str) -> bool {
        self.declared.insert(label.to_string(), WidgetKind::Button);
        self.pressed == Some(label)
    }

    pub fn title(&mut self, text: impl Into<String>) {
        self.blocks.push(Block::Title { text: text.into() });
    }

    pub fn write(&mut self, text: impl Into<String>) {
        self.blocks.push(Block::Text { text: text.into() });
    }

    pub fn metric(&mut self, label: impl Into<String>, value: impl fmt::Display) {
        self.blocks.push(Block::Metric {
            label: label.into(),
            value: value.to_string(),
        });
    }

    pub fn table(&mut self, headers: &[&str], rows: Vec<Vec<String>>) {
        self.blocks.push(Block::Table {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows,
        });
    }

    pub fn bar_chart(&mut self, title: impl Into<String>, bars: Vec<(String, f64)>) {
        self.blocks.push(Block::BarChart {
            title: title.into(),
            bars,
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.blocks.push(Block::Error {
            message: message.into(),
        });
    }

    /// Widgets declared and blocks emitted during the rerun
    pub fn finish(self) -> (BTreeMap<String, WidgetKind>, Vec<Block>) {
        (self.declared, self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_widget_value() {
        assert_eq!(WidgetValue::parse("true"), WidgetValue::Bool(true));
        assert_eq!(WidgetValue::parse("12"), WidgetValue::Int(12));
        assert_eq!(WidgetValue::parse("0.5"), WidgetValue::Float(0.5));
        assert_eq!(
            WidgetValue::parse("north, south"),
            WidgetValue::List(vec!["north".to_string(), "south".to_string()])
        );
        assert_eq!(WidgetValue::parse("west"), WidgetValue::Text("west".to_string()));
    }

    #[test]
    fn test_parse_set() {
        let interaction = Interaction::parse_set("k=7").unwrap();
        assert_eq!(interaction, Interaction::set("k", WidgetValue::Int(7)));
        assert!(Interaction::parse_set("k").is_err());
    }

    #[test]
    fn test_slider_validation() {
        let kind = WidgetKind::Slider { min: 1, max: 10 };
        assert_eq!(kind.validate("k", &WidgetValue::Int(5)), Ok(WidgetValue::Int(5)));
        assert_eq!(
            kind.validate("k", &WidgetValue::Text("3".to_string())),
            Ok(WidgetValue::Int(3))
        );
        assert!(matches!(
            kind.validate("k", &WidgetValue::Int(11)),
            Err(WidgetError::OutOfRange { .. })
        ));
        assert!(matches!(
            kind.validate("k", &WidgetValue::Text("many".to_string())),
            Err(WidgetError::WrongType { .. })
        ));
    }

    #[test]
    fn test_select_validation() {
        let kind = WidgetKind::Multiselect {
            options: vec!["a".to_string(), "b".to_string()],
        };
        assert!(kind.validate("m", &WidgetValue::parse("a,b")).is_ok());
        assert!(matches!(
            kind.validate("m", &WidgetValue::parse("a,c")),
            Err(WidgetError::NotAnOption { .. })
        ));
        assert!(matches!(
            WidgetKind::Button.validate("go", &WidgetValue::Bool(true)),
            Err(WidgetError::IsAButton(_))
        ));
    }

    #[test]
    fn test_ui_reads_state_and_defaults() {
        let mut state = WidgetState::default();
        state.insert("k".to_string(), WidgetValue::Int(9));
        state.insert("region".to_string(), WidgetValue::Text("mars".to_string()));

        let mut ui = Ui::new(&state, Some("Draw"));
        assert_eq!(ui.slider("k", 1, 25, 5), 9);
        assert_eq!(ui.slider("seed", 0, 100, 42), 42);
        // Invalid stored value falls back to the default
        assert_eq!(ui.select("region", &["all", "west"], 0), "all");
        assert!(ui.button("Draw"));
        assert!(!ui.button("Clear cache"));
        ui.metric("accuracy", "0.93");

        let (declared, blocks) = ui.finish();
        assert_eq!(declared.len(), 5);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_text_and_multiselect_defaults() {
        let mut state = WidgetState::default();
        state.insert("name".to_string(), WidgetValue::Int(7));

        let mut ui = Ui::new(&state, None);
        // Text inputs accept anything, rendered as text
        assert_eq!(ui.text_input("name", "anon"), "7");
        assert_eq!(ui.text_input("note", "none"), "none");
        assert_eq!(
            ui.multiselect("tags", &["a", "b"], &["b", "z"]),
            vec!["b".to_string()]
        );
    }

    #[test]
    fn test_interaction_yaml_shape() {
        let yaml = "- action: set\n  widget: k\n  value: 5\n- action: press\n  button: Draw\n";
        let parsed: Vec<Interaction> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            parsed,
            vec![
                Interaction::set("k", WidgetValue::Int(5)),
                Interaction::press("Draw")
            ]
        );
    }
}
