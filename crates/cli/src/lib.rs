//! BridgeWarden gateway binary internals: the `bw_*` tool layer, the
//! JSON-RPC serve loop, and signal wiring. Split out as a library so the
//! integration tests can drive the gateway without a subprocess.

pub mod server;
pub mod signals;
pub mod tools;
