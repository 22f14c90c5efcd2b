use serde_json::{Value, json};

pub const DEFAULT_PERIODIC_INSTRUCTION: &str = "Respond with a message describing what you want to do and the name of the action you want to take. Respond in JSON.";

pub fn startup_message(game: &str) -> String {
    format!("A game of {game} has started.")
}

pub fn periodic_prompt(action_names: &[String], instruction: Option<&str>) -> String {
    format!(
        "You have the following actions available: {}. {}",
        encode_names(action_names),
        instruction.unwrap_or(DEFAULT_PERIODIC_INSTRUCTION)
    )
}

pub fn forced_prompt(state: Option<&str>, query: &str, action_names: &[String]) -> String {
    let mut prompt = String::new();
    if let Some(state) = state.filter(|state| !state.is_empty()) {
        prompt.push_str(&format!("The current state of the game is: {state}. "));
    }
    prompt.push_str(&format!(
        "{query} Respond with a message describing what you want to do and the name of the action you want to take. Choose one of the following actions: {}. Respond in JSON.",
        encode_names(action_names)
    ));
    prompt
}

pub fn dispatch_prompt(name: &str, description: &str) -> String {
    if description.is_empty() {
        format!("You are doing the following action: {name}. Respond in JSON.")
    } else {
        format!("You are doing the following action: {name}. {description} Respond in JSON.")
    }
}

/// Reply shape for a periodic decision; the action may be omitted.
pub fn periodic_reply_shape(action_names: &[String]) -> Value {
    choice_shape(action_names, &["message"])
}

/// Reply shape for a forced decision; an action is mandatory.
pub fn forced_reply_shape(action_names: &[String]) -> Value {
    choice_shape(action_names, &["message", "action"])
}

fn choice_shape(action_names: &[String], required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": {
            "message": { "type": "string" },
            "action": { "type": "string", "enum": action_names },
        },
        "required": required,
    })
}

fn encode_names(action_names: &[String]) -> String {
    json!(action_names).to_string()
}
