//! Planners: instruction injection and plan extraction around model calls

use agentflow_core::{Invocation, Response};
use std::sync::Arc;

/// Strategy hooks the planning processors delegate to
pub trait Planner: Send + Sync {
    /// Instruction injected into the request when planning is enabled.
    fn planning_instruction(&self, invocation: &Invocation) -> Option<String>;

    /// Extract the plan section from a model response, when present.
    fn extract_plan(&self, response: &Response) -> Option<String>;
}

/// Shared planner handle
pub type PlannerRef = Arc<dyn Planner>;

/// Tag-delimited planning: the model writes its plan between a planning tag
/// and a final-answer tag; the response processor surfaces the plan as an
/// auxiliary event.
pub struct TagPlanner {
    planning_tag: String,
    final_tag: String,
}

impl TagPlanner {
    pub fn new() -> Self {
        Self {
            planning_tag: "/*PLANNING*/".to_string(),
            final_tag: "/*FINAL_ANSWER*/".to_string(),
        }
    }

    pub fn with_tags(mut self, planning: impl Into<String>, final_answer: impl Into<String>) -> Self {
        self.planning_tag = planning.into();
        self.final_tag = final_answer.into();
        self
    }
}

impl Default for TagPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner for TagPlanner {
    fn planning_instruction(&self, _invocation: &Invocation) -> Option<String> {
        Some(format!(
            "Before answering, write your step-by-step plan between {} and {}. \
             Then write the final answer after {}.",
            self.planning_tag, self.final_tag, self.final_tag
        ))
    }

    fn extract_plan(&self, response: &Response) -> Option<String> {
        let content = response
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.as_str())?;

        let start = content.find(&self.planning_tag)? + self.planning_tag.len();
        let rest = &content[start..];
        let end = rest.find(&self.final_tag).unwrap_or(rest.len());
        let plan = rest[..end].trim();
        (!plan.is_empty()).then(|| plan.to_string())
    }
}
