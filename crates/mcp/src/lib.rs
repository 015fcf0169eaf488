// MCP (Model Context Protocol) tool host: dispatch, tools and quality gates

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod quality;
pub mod schema;
pub mod server;
pub mod tools;
pub mod transport;

pub use config::ToolhostConfig;
pub use context::{Environment, InvocationContext};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::DispatchError;
pub use quality::{ProgressEntry, ProgressLog, QualityCheck, QualityReport, Severity};
pub use server::McpServer;
pub use tools::{Tool, ToolRegistry};
pub use transport::TransportMeta;
