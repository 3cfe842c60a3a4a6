#![cfg_attr(docsrs, feature(doc_cfg))]
//! Kumo is the execution core of a conversational agent runtime: an event
//! loop that drives turns between a language model and a set of tools, and
//! two multi-agent orchestrators (a deterministic DAG and a
//! self-organizing swarm) that compose whole agents as nodes.
//!
//! The crate is provider-agnostic. A model backend implements
//! [`model::Model`] by mapping its wire protocol onto the
//! [`stream::StreamEvent`] shape; tools implement [`tool::Tool`]; progress
//! observers implement [`observer::Observer`]. Everything else — the turn
//! state machine, concurrent tool execution with failure isolation,
//! throttle retry, orphan cleanup, graph waves, and swarm handoffs — lives
//! here.
//!
//! # Example
//!
//! ```rust,ignore
//! use kumo::prelude::*;
//!
//! let mut agent = Agent::builder()
//!     .name("assistant")
//!     .model(my_model)
//!     .tool(my_tool)
//!     .build()?;
//!
//! let result = agent.invoke("What is 3 + 4?").await?;
//! println!("{}", result.text());
//! ```

pub mod agent;
pub mod context;
pub mod error;
pub mod message;
pub mod model;
pub mod multiagent;
pub mod observer;
pub mod prelude;
pub mod session;
pub mod stream;
pub mod tool;
pub mod usage;

pub use error::{Error, Result};
