//! ReAct agent loop: the LLM alternates between tool invocations and a final
//! answer, under a hard step budget.
//!
//! Each step sends the tool catalog, a strict output grammar, and the
//! conversation so far to the LLM, then parses the reply as exactly one of:
//!
//! ```text
//! THOUGHT: <reasoning>
//! ACTION: <tool name>
//! ACTION_INPUT: <JSON object>
//! ```
//!
//! or
//!
//! ```text
//! FINAL_ANSWER: <answer>
//! ```
//!
//! Parsing is deterministic and strict: a reply carrying both `ACTION` and
//! `FINAL_ANSWER` markers is unparseable. The first unparseable reply earns
//! one retry with a clarifying suffix; a second one ends the run with a
//! best-effort final answer drawn from the raw reply. Tool failures never
//! abort the loop; the registry folds them into `ToolError: ...`
//! observations the model can react to.
//!
//! The agent's conversation history persists across `run` calls on the same
//! instance (role-tagged plain text, no embeddings) and is cleared by
//! [`Agent::reset`]. Concurrent runs on one instance are not supported;
//! callers serialize access.

use crate::llm::LlmProvider;
use crate::tools::ToolRegistry;
use crate::types::GenerateOptions;
use crate::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

/// One recorded step of an agent run.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceStep {
    ToolCall {
        thought: String,
        tool_name: String,
        input_args: Value,
        result: String,
    },
    Final {
        content: String,
    },
    Error {
        message: String,
    },
}

/// Result of one `run` call.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub final_answer: String,
    pub trace: Vec<TraceStep>,
    pub tools_used: BTreeSet<String>,
    /// Number of LLM reasoning calls made; `1 <= iterations <= max_steps`.
    pub iterations: u32,
    /// True when the step budget ran out before the model produced a final
    /// answer and one was synthesized from the last raw reply.
    pub capped: bool,
}

/// What one parsed LLM reply asks for.
#[derive(Debug, Clone, PartialEq)]
enum StepOutput {
    ToolCall {
        thought: String,
        tool_name: String,
        input_args: Value,
    },
    Final {
        content: String,
    },
}

/// A ReAct agent bound to one model, one tool registry, and one running
/// conversation history.
pub struct Agent {
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    model: String,
    max_steps: u32,
    options: GenerateOptions,
    history: Vec<String>,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        model: impl Into<String>,
        max_steps: u32,
    ) -> Self {
        Self {
            llm,
            registry,
            model: model.into(),
            max_steps: max_steps.max(1),
            options: GenerateOptions::deterministic(),
            history: Vec::new(),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Clear the running conversation history.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Run one Reason-Act loop for `user_message`.
    ///
    /// Errors only on LLM transport failures; everything the loop can
    /// recover from (bad tool calls, unparseable replies, the step cap) is
    /// recorded in the trace instead.
    pub async fn run(&mut self, user_message: &str) -> Result<AgentOutcome> {
        let user_message = user_message.trim();
        if user_message.is_empty() {
            return Err(Error::agent("empty agent query"));
        }
        self.history.push(format!("User: {user_message}"));

        let mut trace: Vec<TraceStep> = Vec::new();
        let mut tools_used: BTreeSet<String> = BTreeSet::new();
        let mut iterations: u32 = 0;
        let mut last_raw = String::new();
        let mut clarify = false;
        let mut unparseable_seen = false;

        loop {
            if iterations == self.max_steps {
                // Budget exhausted without a final answer.
                let content = if last_raw.trim().is_empty() {
                    "I was unable to finish reasoning within the step limit.".to_string()
                } else {
                    last_raw.trim().to_string()
                };
                trace.push(TraceStep::Final {
                    content: content.clone(),
                });
                self.history.push(format!("Assistant: {content}"));
                return Ok(AgentOutcome {
                    final_answer: content,
                    trace,
                    tools_used,
                    iterations,
                    capped: true,
                });
            }

            iterations += 1;
            let prompt = self.build_prompt(clarify);
            clarify = false;

            let raw = self
                .llm
                .generate(&self.model, &prompt, &self.options)
                .await?;
            last_raw = raw.clone();

            match parse_step(&raw) {
                Ok(StepOutput::Final { content }) => {
                    trace.push(TraceStep::Final {
                        content: content.clone(),
                    });
                    self.history.push(format!("Assistant: {content}"));
                    return Ok(AgentOutcome {
                        final_answer: content,
                        trace,
                        tools_used,
                        iterations,
                        capped: false,
                    });
                }
                Ok(StepOutput::ToolCall {
                    thought,
                    tool_name,
                    input_args,
                }) => {
                    let result = self.registry.execute(&tool_name, &input_args).await;
                    log::debug!("agent step {iterations}: {tool_name} -> {result}");

                    self.history.push(format!(
                        "Assistant: THOUGHT: {thought}\nACTION: {tool_name}\nACTION_INPUT: {input_args}"
                    ));
                    self.history.push(format!("Observation: {result}"));

                    tools_used.insert(tool_name.clone());
                    trace.push(TraceStep::ToolCall {
                        thought,
                        tool_name,
                        input_args,
                        result,
                    });
                }
                Err(reason) => {
                    trace.push(TraceStep::Error {
                        message: reason.clone(),
                    });
                    if !unparseable_seen {
                        // One retry with a clarifying suffix.
                        unparseable_seen = true;
                        clarify = true;
                        continue;
                    }

                    // Second strike: best-effort final answer from the raw
                    // reply, deterministically.
                    let content = raw.trim().to_string();
                    trace.push(TraceStep::Final {
                        content: content.clone(),
                    });
                    self.history.push(format!("Assistant: {content}"));
                    return Ok(AgentOutcome {
                        final_answer: content,
                        trace,
                        tools_used,
                        iterations,
                        capped: false,
                    });
                }
            }
        }
    }

    fn build_prompt(&self, clarify: bool) -> String {
        let mut prompt = String::from(
            "You are a helpful assistant that solves tasks step by step, \
             using tools when they help.\n\n",
        );

        if self.registry.is_empty() {
            prompt.push_str("You have no tools available. Answer directly.\n\n");
        } else {
            prompt.push_str("Available tools:\n");
            prompt.push_str(&self.registry.render_for_prompt());
            prompt.push_str("\n\n");
        }

        prompt.push_str(
            "Respond in exactly one of these two formats and nothing else.\n\n\
             To use a tool:\n\
             THOUGHT: <why this tool helps>\n\
             ACTION: <tool name>\n\
             ACTION_INPUT: <arguments as a JSON object>\n\n\
             To answer the user:\n\
             FINAL_ANSWER: <your answer>\n\n\
             Never put ACTION and FINAL_ANSWER in the same response.\n\n",
        );

        prompt.push_str("Conversation so far:\n");
        for turn in &self.history {
            prompt.push_str(turn);
            prompt.push('\n');
        }

        if clarify {
            prompt.push_str(
                "\nYour previous response could not be parsed. Reply again using \
                 exactly the THOUGHT/ACTION/ACTION_INPUT format or a single \
                 FINAL_ANSWER line.\n",
            );
        }

        prompt.push_str("Assistant:");
        prompt
    }
}

/// Parse one LLM reply against the step grammar.
fn parse_step(raw: &str) -> std::result::Result<StepOutput, String> {
    let has_final = find_marker(raw, "FINAL_ANSWER:").is_some();
    let has_action = find_marker(raw, "ACTION:").is_some();

    if has_final && has_action {
        return Err("response contains both ACTION and FINAL_ANSWER".to_string());
    }

    if let Some(rest) = find_marker(raw, "FINAL_ANSWER:") {
        let content = rest.trim().to_string();
        if content.is_empty() {
            return Err("FINAL_ANSWER marker with empty content".to_string());
        }
        return Ok(StepOutput::Final { content });
    }

    if has_action {
        let action_rest =
            find_marker(raw, "ACTION:").unwrap_or_else(|| unreachable!("checked above"));
        let tool_name = action_rest
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if tool_name.is_empty() {
            return Err("ACTION marker with no tool name".to_string());
        }

        let thought = find_marker(raw, "THOUGHT:")
            .and_then(|rest| rest.lines().next())
            .unwrap_or("")
            .trim()
            .to_string();

        let Some(input_rest) = find_marker(raw, "ACTION_INPUT:") else {
            return Err(format!("ACTION '{tool_name}' is missing ACTION_INPUT"));
        };
        let Some(json_text) = extract_json_object(input_rest) else {
            return Err(format!(
                "ACTION_INPUT for '{tool_name}' does not contain a JSON object"
            ));
        };
        let input_args: Value = serde_json::from_str(json_text)
            .map_err(|e| format!("ACTION_INPUT for '{tool_name}' is not valid JSON: {e}"))?;

        return Ok(StepOutput::ToolCall {
            thought,
            tool_name,
            input_args,
        });
    }

    Err("response contains neither FINAL_ANSWER nor ACTION".to_string())
}

/// Find `marker` at the start of a line (leading whitespace tolerated) and
/// return everything after it.
fn find_marker<'a>(raw: &'a str, marker: &str) -> Option<&'a str> {
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with(marker) {
            let line_start = offset + (line.len() - trimmed.len());
            return Some(&raw[line_start + marker.len()..]);
        }
        offset += line.len();
    }
    None
}

/// Extract the first balanced `{...}` object from `text`, respecting string
/// literals and escapes.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
