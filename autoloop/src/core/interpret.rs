//! Strict interpretation of model replies as a single structured action.
//!
//! A reply must contain one JSON object conforming to `schemas/action.schema.json`.
//! Every validator error is rendered as a dotted field path and the errors are
//! ordered by path, so the corrective instruction sent back to the model quotes
//! the first offending field.

use anyhow::{Context, Result};
use jsonschema::error::{TypeKind, ValidationErrorKind};
use jsonschema::paths::{Location, LocationSegment};
use jsonschema::{Draft, JsonType, ValidationError, Validator};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::repair::{close_unbalanced, extract_object};
use crate::core::types::ParsedAction;

pub const ACTION_SCHEMA: &str = include_str!("../../schemas/action.schema.json");

const ROOT_PATH: &str = "$";

/// Why a reply could not be turned into a [`ParsedAction`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    #[error("field `$` must be a JSON object, but the reply contains none")]
    NoObject,
    #[error("field `$` is not valid JSON ({detail})")]
    Syntax { detail: String },
    #[error("field `{path}` {message}")]
    Schema { path: String, message: String },
}

impl InterpretError {
    /// Dotted path of the offending field (`$` for the whole reply).
    pub fn field(&self) -> &str {
        match self {
            InterpretError::Schema { path, .. } => path,
            InterpretError::NoObject | InterpretError::Syntax { .. } => ROOT_PATH,
        }
    }

    /// Instruction resent to the model after a failed parse.
    pub fn corrective_instruction(&self) -> String {
        format!(
            "Your previous reply could not be used: {self}. \
             Respond with exactly one JSON object in the required response format, \
             with no other text."
        )
    }
}

/// A single schema violation at a field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

/// Parses and validates model replies against the action schema.
pub struct ResponseInterpreter {
    validator: Validator,
}

impl ResponseInterpreter {
    pub fn new() -> Result<Self> {
        let schema: Value = serde_json::from_str(ACTION_SCHEMA).context("parse action schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile action schema")?;
        Ok(Self { validator })
    }

    pub fn parse(&self, raw: &str) -> std::result::Result<ParsedAction, InterpretError> {
        let object = extract_object(raw).ok_or(InterpretError::NoObject)?;
        let value = parse_json_with_repair(object)?;

        let mut errors: Vec<FieldError> = self
            .validator
            .iter_errors(&value)
            .map(|err| field_error(&err))
            .collect();
        errors.sort_by(|a, b| a.path.cmp(&b.path));
        if let Some(first) = errors.into_iter().next() {
            warn!(field = %first.path, message = %first.message, "reply failed schema validation");
            return Err(InterpretError::Schema {
                path: first.path,
                message: first.message,
            });
        }

        serde_json::from_value(value).map_err(|err| InterpretError::Schema {
            path: ROOT_PATH.to_string(),
            message: err.to_string(),
        })
    }
}

fn parse_json_with_repair(object: &str) -> std::result::Result<Value, InterpretError> {
    match serde_json::from_str::<Value>(object) {
        Ok(value) => Ok(value),
        Err(err) => {
            let Some(repaired) = close_unbalanced(object) else {
                return Err(InterpretError::Syntax {
                    detail: err.to_string(),
                });
            };
            match serde_json::from_str::<Value>(&repaired) {
                Ok(value) => {
                    debug!(
                        appended = repaired.len().saturating_sub(object.trim_end().len()),
                        "repaired unbalanced reply"
                    );
                    Ok(value)
                }
                Err(_) => Err(InterpretError::Syntax {
                    detail: err.to_string(),
                }),
            }
        }
    }
}

/// Map a validator error to the dotted field path quoted back to the model.
fn field_error(err: &ValidationError<'_>) -> FieldError {
    let mut path = dotted_path(err.instance_path());
    let message = match err.kind() {
        ValidationErrorKind::Required { property } => {
            let name = property
                .as_str()
                .map_or_else(|| property.to_string(), str::to_string);
            path = child_path(&path, &name);
            "is required".to_string()
        }
        ValidationErrorKind::MinLength { limit: 1 } => "must not be empty".to_string(),
        ValidationErrorKind::Type {
            kind: TypeKind::Single(expected),
        } => format!(
            "must be of type {expected} (got {})",
            JsonType::from(&**err.instance())
        ),
        _ => err.to_string(),
    };
    FieldError { path, message }
}

/// `/command/name` becomes `command.name`, `/plan/1` becomes `plan[1]`.
fn dotted_path(location: &Location) -> String {
    let mut path = ROOT_PATH.to_string();
    for segment in location.iter() {
        match segment {
            LocationSegment::Property(name) => path = child_path(&path, &name),
            LocationSegment::Index(idx) => path.push_str(&format!("[{idx}]")),
        }
    }
    path
}

fn child_path(parent: &str, key: &str) -> String {
    if parent == ROOT_PATH {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interpreter() -> ResponseInterpreter {
        ResponseInterpreter::new().expect("interpreter")
    }

    fn valid_reply() -> Value {
        json!({
            "thought": "write the file",
            "reasoning": "the goal asks for it",
            "plan": ["write hello.txt", "finish"],
            "criticism": "none",
            "command": {"name": "write_file", "args": {"path": "hello.txt", "content": "hello"}}
        })
    }

    #[test]
    fn accepts_schema_valid_reply() {
        let action = interpreter()
            .parse(&valid_reply().to_string())
            .expect("valid");
        assert_eq!(action.command.name, "write_file");
        assert_eq!(action.command.args["path"], "hello.txt");
        assert_eq!(action.plan.len(), 2);
    }

    #[test]
    fn accepts_reply_wrapped_in_prose_and_fences() {
        let raw = format!("Here is my answer:\n```json\n{}\n```", valid_reply());
        assert!(interpreter().parse(&raw).is_ok());
    }

    #[test]
    fn repairs_missing_trailing_braces() {
        let raw = r#"{"thought": "t", "reasoning": "r", "plan": ["a"], "criticism": "c",
            "command": {"name": "write_file", "args": {"path": "hello.txt", "content": "hello"#;
        let action = interpreter().parse(raw).expect("repaired");
        assert_eq!(action.command.args["content"], "hello");
    }

    #[test]
    fn prose_reply_has_no_object() {
        let err = interpreter()
            .parse("I think I should write the file now.")
            .unwrap_err();
        assert_eq!(err, InterpretError::NoObject);
        assert!(err.corrective_instruction().contains("`$`"));
    }

    #[test]
    fn unrepairable_syntax_is_reported() {
        let err = interpreter().parse("{\"thought\": tru}").unwrap_err();
        assert!(matches!(err, InterpretError::Syntax { .. }));
    }

    #[test]
    fn missing_field_quotes_path() {
        let mut reply = valid_reply();
        reply["command"].as_object_mut().expect("command").remove("name");
        let err = interpreter().parse(&reply.to_string()).unwrap_err();
        assert_eq!(err.field(), "command.name");
        assert!(err.corrective_instruction().contains("`command.name`"));
        assert!(err.to_string().contains("is required"));
    }

    #[test]
    fn wrong_type_quotes_path() {
        let mut reply = valid_reply();
        reply["plan"] = json!("write then finish");
        let err = interpreter().parse(&reply.to_string()).unwrap_err();
        assert_eq!(err.field(), "plan");
        assert!(err.to_string().contains("must be of type array (got string)"));
    }

    #[test]
    fn wrong_item_type_is_indexed() {
        let mut reply = valid_reply();
        reply["plan"] = json!(["ok", 3]);
        let err = interpreter().parse(&reply.to_string()).unwrap_err();
        assert_eq!(err.field(), "plan[1]");
    }

    #[test]
    fn first_error_is_ordered_by_path() {
        let reply = json!({
            "reasoning": "r",
            "plan": [],
            "criticism": "c",
            "command": {"args": {}}
        });
        let err = interpreter().parse(&reply.to_string()).unwrap_err();
        // Both `thought` and `command.name` are missing; ordering is by path.
        assert_eq!(err.field(), "command.name");
    }

    #[test]
    fn empty_command_name_is_rejected() {
        let mut reply = valid_reply();
        reply["command"]["name"] = json!("");
        let err = interpreter().parse(&reply.to_string()).unwrap_err();
        assert_eq!(err.field(), "command.name");
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn non_object_args_are_rejected() {
        let mut reply = valid_reply();
        reply["command"]["args"] = json!(["hello.txt"]);
        let err = interpreter().parse(&reply.to_string()).unwrap_err();
        assert_eq!(err.field(), "command.args");
        assert!(err.to_string().contains("must be of type object (got array)"));
    }

    #[test]
    fn missing_top_level_field_sorts_before_later_type_errors() {
        let mut reply = valid_reply();
        reply.as_object_mut().expect("reply").remove("command");
        reply["thought"] = json!(7);
        let err = interpreter().parse(&reply.to_string()).unwrap_err();
        assert_eq!(err.field(), "command");
        assert!(err.to_string().contains("is required"));
    }

    #[test]
    fn dotted_path_renders_properties_and_indices() {
        let location = Location::new().join("plan").join(2usize);
        assert_eq!(dotted_path(&location), "plan[2]");
        let location = Location::new().join("command").join("name");
        assert_eq!(dotted_path(&location), "command.name");
        assert_eq!(dotted_path(&Location::new()), "$");
    }
}
