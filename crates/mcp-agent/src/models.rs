//! These models represent the objects passed around by the agent
//!
//! There are a few related formats we need to interact with:
//! - openai-style chat messages/tools, sent from the agent to the model endpoint
//! - MCP tool descriptors and results, exchanged with remote tool servers
//! - the internal history threaded through the control loop
//!
//! We always immediately convert those data models into the internal structs
//! using to/from helpers, so the loop only ever sees the types below.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
