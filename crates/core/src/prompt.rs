// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prompt rendering.
//!
//! A pre-rendered prompt is used verbatim. Otherwise the prompt is
//! synthesised from the prompt plan: template, JSON-encoded vars,
//! JSON-encoded context, and the JSON-encoded task shape, separated by
//! blank lines.

use crate::packet::TaskPacket;

/// Render the prompt text for a packet.
pub fn render_prompt(packet: &TaskPacket) -> String {
    if let Some(rendered) = packet.prompt.rendered.as_deref() {
        if !rendered.is_empty() {
            return rendered.to_string();
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(template) = packet.prompt_plan.template.as_deref() {
        if !template.is_empty() {
            parts.push(template.to_string());
        }
    }
    if let Some(ref vars) = packet.prompt_plan.vars {
        parts.push(vars.to_string());
    }
    if let Some(ref context) = packet.context {
        parts.push(context.to_string());
    }
    parts.push(packet.task_shape().to_string());

    parts.join("\n\n")
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
