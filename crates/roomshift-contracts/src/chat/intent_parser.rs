use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

/// One parsed line of chat input. Plain text is a `generate` request; a
/// leading `/` selects a command.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args.get(key).and_then(Value::as_str)
    }
}

fn find_spec(command: &str, specs: &'static [CommandSpec]) -> Option<&'static CommandSpec> {
    specs.iter().find(|spec| spec.command == command)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .command_args
                    .insert(spec.arg_key.to_string(), Value::String(arg.to_string()));
                if spec.action == "refine" && !arg.is_empty() {
                    intent.prompt = Some(arg.to_string());
                }
                return intent;
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                let path = parse_single_path_arg(arg);
                intent.command_args.insert(
                    spec.arg_key.to_string(),
                    if path.is_empty() {
                        Value::Null
                    } else {
                        Value::String(path)
                    },
                );
                return intent;
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
