use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const COMMAND_STARTUP: &str = "startup";
pub const COMMAND_CONTEXT: &str = "context";
pub const COMMAND_ACTIONS_REGISTER: &str = "actions/register";
pub const COMMAND_ACTIONS_UNREGISTER: &str = "actions/unregister";
pub const COMMAND_ACTIONS_FORCE: &str = "actions/force";
pub const COMMAND_ACTIONS_RESULT: &str = "actions/result";

/// Response shape of an action, either inline JSON or a JSON-encoded string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionSchema {
    Encoded(String),
    Structured(Value),
}

impl ActionSchema {
    pub fn resolve(&self) -> Result<Value, serde_json::Error> {
        match self {
            ActionSchema::Encoded(text) => serde_json::from_str(text),
            ActionSchema::Structured(value) => Ok(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub schema: Option<ActionSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ForceRequest {
    #[serde(default)]
    pub state: Option<String>,
    pub query: String,
    #[serde(default)]
    pub ephemeral_context: bool,
    pub action_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(deserialize_with = "deserialize_action_id")]
    pub id: String,
    #[serde(rename = "bool", alias = "success")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Startup { game: String },
    Context { message: String, silent: bool },
    RegisterActions { actions: Vec<Action> },
    UnregisterActions { action_names: Vec<String> },
    ForceActions(ForceRequest),
    ActionResult(ActionResult),
}

impl InboundMessage {
    pub fn command(&self) -> &'static str {
        match self {
            InboundMessage::Startup { .. } => COMMAND_STARTUP,
            InboundMessage::Context { .. } => COMMAND_CONTEXT,
            InboundMessage::RegisterActions { .. } => COMMAND_ACTIONS_REGISTER,
            InboundMessage::UnregisterActions { .. } => COMMAND_ACTIONS_UNREGISTER,
            InboundMessage::ForceActions(_) => COMMAND_ACTIONS_FORCE,
            InboundMessage::ActionResult(_) => COMMAND_ACTIONS_RESULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "data")]
pub enum OutboundMessage {
    #[serde(rename = "action")]
    Action(ActionRequest),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("command '{command}' requires a data payload")]
    MissingData { command: String },
    #[error("invalid data for command '{command}': {source}")]
    InvalidData {
        command: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("startup message does not name a game")]
    MissingGame,
    #[error("actions/force requires at least one action name")]
    EmptyActionNames,
}

#[derive(Debug, Deserialize)]
struct WireEnvelope {
    command: String,
    #[serde(default)]
    game: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct WireStartup {
    #[serde(default)]
    game: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireContext {
    message: String,
    #[serde(default)]
    silent: bool,
}

#[derive(Debug, Deserialize)]
struct WireRegister {
    actions: Vec<Action>,
}

#[derive(Debug, Deserialize)]
struct WireUnregister {
    action_names: Vec<String>,
}

pub fn parse_inbound_message(frame: &str) -> Result<InboundMessage, ProtocolError> {
    let envelope: WireEnvelope = serde_json::from_str(frame)?;
    let command = envelope.command.as_str();

    let message = match command {
        COMMAND_STARTUP => {
            let startup: WireStartup = match envelope.data {
                Some(Value::Null) | None => WireStartup::default(),
                Some(data) => decode_data(command, data)?,
            };
            let game = startup
                .game
                .or(envelope.game)
                .filter(|game| !game.trim().is_empty())
                .ok_or(ProtocolError::MissingGame)?;
            InboundMessage::Startup { game }
        }
        COMMAND_CONTEXT => {
            let context: WireContext = decode_data(command, required_data(command, envelope.data)?)?;
            InboundMessage::Context {
                message: context.message,
                silent: context.silent,
            }
        }
        COMMAND_ACTIONS_REGISTER => {
            let register: WireRegister =
                decode_data(command, required_data(command, envelope.data)?)?;
            InboundMessage::RegisterActions {
                actions: register.actions,
            }
        }
        COMMAND_ACTIONS_UNREGISTER => {
            let unregister: WireUnregister =
                decode_data(command, required_data(command, envelope.data)?)?;
            InboundMessage::UnregisterActions {
                action_names: unregister.action_names,
            }
        }
        COMMAND_ACTIONS_FORCE => {
            let force: ForceRequest = decode_data(command, required_data(command, envelope.data)?)?;
            if force.action_names.is_empty() {
                return Err(ProtocolError::EmptyActionNames);
            }
            InboundMessage::ForceActions(force)
        }
        COMMAND_ACTIONS_RESULT => {
            let result: ActionResult =
                decode_data(command, required_data(command, envelope.data)?)?;
            InboundMessage::ActionResult(result)
        }
        other => return Err(ProtocolError::UnknownCommand(other.to_string())),
    };

    Ok(message)
}

pub fn encode_outbound_message(message: &OutboundMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

fn required_data(command: &str, data: Option<Value>) -> Result<Value, ProtocolError> {
    match data {
        Some(Value::Null) | None => Err(ProtocolError::MissingData {
            command: command.to_string(),
        }),
        Some(data) => Ok(data),
    }
}

fn decode_data<T: serde::de::DeserializeOwned>(
    command: &str,
    data: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::InvalidData {
        command: command.to_string(),
        source,
    })
}

// Games echo the id back verbatim, but some send it as a number.
fn deserialize_action_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}
