//! Captured warnings and their schema-stable wire form.
//!
//! A warning may carry arbitrary host values (arguments, the emitting
//! object, an open file). [`serialize_warning`] always produces the same
//! key set; only individual values degrade:
//! - `message_args` becomes `null` when the arguments cannot be encoded,
//! - every detail attribute falls back to its printable representation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encode::{Encodable, encode_or_null, encode_or_repr};

/// Identity of a type: where it is defined and what it is called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    pub module: String,
    pub name: String,
}

impl TypeName {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
        }
    }
}

/// A structured warning object: its type, its text, and the arguments it was built from.
#[derive(Debug)]
pub struct WarningObject {
    pub class: TypeName,
    pub text: String,
    pub args: Box<dyn Encodable>,
}

#[derive(Debug)]
pub enum WarningText {
    Plain(String),
    Structured(WarningObject),
}

impl From<String> for WarningText {
    fn from(text: String) -> Self {
        Self::Plain(text)
    }
}

impl From<&str> for WarningText {
    fn from(text: &str) -> Self {
        Self::Plain(text.to_string())
    }
}

impl From<WarningObject> for WarningText {
    fn from(object: WarningObject) -> Self {
        Self::Structured(object)
    }
}

/// A warning as captured by the host.
#[derive(Debug)]
pub struct WarningMessage {
    pub message: WarningText,
    pub category: Option<TypeName>,
    pub filename: String,
    pub lineno: u32,
    pub file: Option<Box<dyn Encodable>>,
    pub line: Option<String>,
    pub source: Option<Box<dyn Encodable>>,
}

impl WarningMessage {
    pub fn new(
        message: impl Into<WarningText>,
        category: Option<TypeName>,
        filename: impl Into<String>,
        lineno: u32,
    ) -> Self {
        Self {
            message: message.into(),
            category,
            filename: filename.into(),
            lineno,
            file: None,
            line: None,
            source: None,
        }
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.line = Some(line.into());
        self
    }

    pub fn with_source(mut self, source: Box<dyn Encodable>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_file(mut self, file: Box<dyn Encodable>) -> Self {
        self.file = Some(file);
        self
    }

    /// Diagnostic attributes other than message and category, in a fixed order.
    ///
    /// Absent optional attributes are still listed so the key set never changes.
    pub fn details(&self) -> [(&'static str, Option<&dyn Encodable>); 5] {
        [
            ("filename", Some(&self.filename as &dyn Encodable)),
            ("lineno", Some(&self.lineno as &dyn Encodable)),
            ("file", self.file.as_deref()),
            ("line", self.line.as_ref().map(|l| l as &dyn Encodable)),
            ("source", self.source.as_deref()),
        ]
    }
}

/// Phase in which a warning was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningWhen {
    Config,
    Collect,
    Runtest,
}

/// Wire form of a [`WarningMessage`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedWarning {
    pub message_str: String,
    pub message_module: Option<String>,
    pub message_class_name: Option<String>,
    pub message_args: Option<Value>,
    pub category_module: Option<String>,
    pub category_class_name: Option<String>,
    #[serde(flatten)]
    pub details: IndexMap<String, Value>,
}

pub fn serialize_warning(warning: &WarningMessage) -> SerializedWarning {
    let (message_str, message_module, message_class_name, message_args) = match &warning.message {
        WarningText::Structured(object) => {
            let args = match encode_or_null(object.args.as_ref()) {
                Value::Null => None,
                encoded => Some(encoded),
            };
            (
                object.text.clone(),
                Some(object.class.module.clone()),
                Some(object.class.name.clone()),
                args,
            )
        }
        WarningText::Plain(text) => (text.clone(), None, None, None),
    };

    let (category_module, category_class_name) = match &warning.category {
        Some(category) => (Some(category.module.clone()), Some(category.name.clone())),
        None => (None, None),
    };

    let details = warning
        .details()
        .into_iter()
        .map(|(name, value)| {
            let encoded = value.map(encode_or_repr).unwrap_or(Value::Null);
            (name.to_string(), encoded)
        })
        .collect();

    SerializedWarning {
        message_str,
        message_module,
        message_class_name,
        message_args,
        category_module,
        category_class_name,
        details,
    }
}
