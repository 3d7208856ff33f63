//! langchat core library: credential session, agent deployment client, thread directory, and
//! the conversation stream coordinator used by the CLI.

pub mod auth;
pub mod chat;
pub mod config;
pub mod init;
pub mod langgraph;
pub mod threads;
