//! MCP (Model Context Protocol) client support
//!
//! ```text
//! SharedSession  (lifecycle: start once, shut down once)
//!      │
//!      ▼
//! PeerSession    (manifest, tool calls, timeouts, error mapping)
//!      │
//!      ▼
//! McpClient      (initialize, tools/list, tools/call)
//!      │
//!      ▼
//! StdioTransport (newline-delimited JSON-RPC over the peer's stdio)
//! ```

pub mod client;
pub mod lifecycle;
pub mod session;
pub mod transport;

pub use lifecycle::with_session;
