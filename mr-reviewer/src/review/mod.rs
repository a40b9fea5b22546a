//! Review building blocks: input assembly and agent execution.

pub mod agent;
pub mod prompt;

pub use agent::{AgentConfig, AgentRegistry, AgentResult, AgentRunner, CommandAgentRunner};
pub use prompt::{assemble_review_input, load_prompt_template};
