//! Chat-message-to-prompt rendering (spec §4.D).
//!
//! If `chat_template.jinja2` is present it is rendered with `minijinja`
//! (the teacher's workspace already declares this dependency but never
//! actually uses it — this is its first real caller); otherwise the
//! default `<|im_start|>` format is emitted directly.

use std::path::Path;

use serde::Serialize;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

pub struct ChatTemplate {
    raw: Option<String>,
}

impl ChatTemplate {
    pub fn load_optional(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self { raw: None });
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidModelDirectory(format!("chat_template.jinja2: {e}")))?;
        Ok(Self { raw: Some(raw) })
    }

    pub fn none() -> Self {
        Self { raw: None }
    }

    /// Renders `messages` into prompt text. When `tool_schema` is
    /// non-empty, a system message carrying the schema and a literal
    /// tool-call JSON example is prepended first.
    pub fn render(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
        tool_schema: Option<&serde_json::Value>,
    ) -> Result<String> {
        let mut all_messages = Vec::new();
        if let Some(schema) = tool_schema {
            if !schema.is_null() && schema.as_array().map(|a| !a.is_empty()).unwrap_or(true) {
                all_messages.push(ChatMessage {
                    role: "system".to_string(),
                    content: format!(
                        "Available tools:\n{}\n\nTo call a tool, respond with a leading JSON object: {{\"tool_calls\": [{{\"name\": \"...\", \"arguments\": {{...}}}}]}}",
                        serde_json::to_string_pretty(schema).unwrap_or_default()
                    ),
                });
            }
        }
        all_messages.extend(messages.iter().cloned());

        match &self.raw {
            Some(template) => self.render_jinja(template, &all_messages, add_generation_prompt),
            None => Ok(self.render_default(&all_messages, add_generation_prompt)),
        }
    }

    fn render_default(&self, messages: &[ChatMessage], add_generation_prompt: bool) -> String {
        let mut out = String::new();
        for m in messages {
            out.push_str(&format!("<|im_start|>{}\n{}<|im_end|>\n", m.role, m.content));
        }
        if add_generation_prompt {
            out.push_str("<|im_start|>assistant\n");
        }
        out
    }

    fn render_jinja(
        &self,
        template: &str,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> Result<String> {
        let mut env = minijinja::Environment::new();
        env.add_template("chat", template)
            .map_err(|e| EngineError::InvalidModelDirectory(format!("chat_template.jinja2: {e}")))?;
        let tmpl = env
            .get_template("chat")
            .map_err(|e| EngineError::InvalidModelDirectory(format!("chat_template.jinja2: {e}")))?;
        tmpl.render(minijinja::context! {
            messages => messages,
            add_generation_prompt => add_generation_prompt,
        })
        .map_err(|e| EngineError::InvalidModelDirectory(format!("chat_template.jinja2 render: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_matches_im_start_format() {
        let template = ChatTemplate::none();
        let messages = vec![ChatMessage {
            role: "user".into(),
            content: "Hi".into(),
        }];
        let rendered = template.render(&messages, true, None).unwrap();
        assert_eq!(rendered, "<|im_start|>user\nHi<|im_end|>\n<|im_start|>assistant\n");
    }
}
