//! Answers for required claim fields

use std::collections::HashMap;

use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};
use lash_kube::claims::{Field, FieldType};
use lash_kube::{KubeError, Prompter};

/// Asks on the terminal
pub struct InteractivePrompter;

impl Prompter for InteractivePrompter {
    fn ask(&self, field: &Field) -> lash_kube::Result<String> {
        let theme = ColorfulTheme::default();
        let prompt = format!("{} ({})", field.name, field.field_type);

        let answer = match field.field_type {
            FieldType::Boolean => {
                let default = field.default.as_deref() == Some("true");
                Confirm::with_theme(&theme)
                    .with_prompt(prompt)
                    .default(default)
                    .interact()
                    .map(|value| value.to_string())
            }
            _ => {
                let mut input = Input::<String>::with_theme(&theme).with_prompt(prompt);
                if let Some(default) = &field.default {
                    input = input.default(default.clone());
                }
                input
                    .validate_with(|value: &String| -> Result<(), String> {
                        field.parse_value(value).map(|_| ()).map_err(|e| e.to_string())
                    })
                    .interact_text()
            }
        };

        answer.map_err(|e| KubeError::Collaborator(format!("prompt for '{}' failed: {}", field.name, e)))
    }
}

/// Answers from `--set` values or schema defaults, never asks
#[derive(Debug, Default)]
pub struct NonInteractivePrompter {
    preset: HashMap<String, String>,
}

impl NonInteractivePrompter {
    /// Answers taken from `key=value` arguments
    pub fn from_set_values(set_values: &[String]) -> Self {
        let preset = set_values
            .iter()
            .filter_map(|arg| arg.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.to_string()))
            .collect();
        Self { preset }
    }
}

impl Prompter for NonInteractivePrompter {
    fn ask(&self, field: &Field) -> lash_kube::Result<String> {
        if let Some(value) = self.preset.get(&field.name) {
            return Ok(value.clone());
        }
        field.default.clone().ok_or_else(|| {
            KubeError::Collaborator(format!(
                "no value for required field '{}'; pass --set {}=<{}>",
                field.name, field.name, field.field_type
            ))
        })
    }
}
