//! # agentflow-runtime - Agent Composition and the LLM Flow
//!
//! The executable layer of the agentflow workspace: agent composites, the
//! processor-driven flow around each model call, the graph-backed agent,
//! and the session-scoped runner facade.
//!
//! ## Agents
//!
//! - [`LlmAgent`] - leaf agent owning a model, instructions, tools, an
//!   optional planner, and sub-agents (delegation via `transfer_to_agent`)
//! - [`ChainAgent`] - sequential composition, stop on first error
//! - [`ParallelAgent`] - concurrent branches with merged streams
//! - [`CycleAgent`] - iterate until a bound, an escalation, or cancellation
//! - [`GraphAgent`] - binds the `agentflow-graph` executor to an event
//!   channel
//!
//! ## Flow
//!
//! Each model call runs through ordered [`RequestProcessor`]s, a streaming
//! response consumption loop with tool-call dispatch, and ordered
//! [`ResponseProcessor`]s, until a final (non-tool) response or an
//! `end_invocation` signal.
//!
//! ## Entry point
//!
//! [`Runner`] binds an app name, a root agent, and a [`SessionService`];
//! every `run` produces one cancellable event stream and persists completed
//! events into the session.

pub mod callbacks;
pub mod chain;
pub mod cycle;
pub mod flow;
pub mod graph_agent;
pub mod graph_nodes;
pub mod llm_agent;
pub mod parallel;
pub mod planner;
pub mod runner;
pub mod session;
pub mod testing;
pub mod transfer;

pub use callbacks::{AgentCallbacks, AfterAgentFn, BeforeAgentFn};
pub use chain::ChainAgent;
pub use cycle::CycleAgent;
pub use flow::processors::{
    BasicRequestProcessor, ContentRequestProcessor, IdentityRequestProcessor,
    InstructionRequestProcessor, PlanningRequestProcessor, PlanningResponseProcessor,
};
pub use flow::{LlmFlow, RequestProcessor, ResponseProcessor};
pub use graph_agent::{GraphAgent, DEFAULT_INPUT_KEY, DEFAULT_OUTPUT_KEY};
pub use graph_nodes::{agent_node, llm_node, tool_node};
pub use llm_agent::{LlmAgent, LlmAgentBuilder};
pub use parallel::ParallelAgent;
pub use planner::{Planner, PlannerRef, TagPlanner};
pub use runner::Runner;
pub use session::{InMemorySessionService, SessionService};
pub use transfer::{transfer_tool, TransferResponseProcessor, TRANSFER_TOOL_NAME};
