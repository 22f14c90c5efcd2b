use serde::Deserialize;
use serde_json::Value;

use crate::decision::error::DecisionError;

/// What the model said it wants to do.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionChoice {
    pub message: String,
    #[serde(default)]
    pub action: Option<String>,
}

pub fn parse_choice(content: &str) -> Result<ActionChoice, DecisionError> {
    let mut choice: ActionChoice = serde_json::from_str(content)
        .map_err(|err| DecisionError::malformed(format!("reply is not a choice: {err}"), content))?;
    if choice.action.as_deref().is_some_and(|action| action.trim().is_empty()) {
        choice.action = None;
    }
    Ok(choice)
}

/// Forced replies must name one of `allowed`.
pub fn parse_forced_choice(content: &str, allowed: &[String]) -> Result<ActionChoice, DecisionError> {
    let choice = parse_choice(content)?;
    match choice.action.as_deref() {
        None => Err(DecisionError::malformed("reply does not name an action", content)),
        Some(action) if !allowed.iter().any(|name| name == action) => Err(DecisionError::malformed(
            format!("action '{action}' is not among the allowed choices"),
            content,
        )),
        Some(_) => Ok(choice),
    }
}

pub fn ensure_json(content: &str) -> Result<(), DecisionError> {
    serde_json::from_str::<Value>(content)
        .map(|_| ())
        .map_err(|err| DecisionError::malformed(format!("reply is not json: {err}"), content))
}
