//! kite-daemon: the HTTP surface.
//!
//! `build_router` is the single entry point; `main.rs` attaches middleware
//! and serves. Handlers are `pub(crate)` so the router tests in `tests/`
//! can compose the bare router.

pub mod api_types;
pub mod routes;
pub mod server;
pub mod state;

pub use routes::build_router;
pub use state::{AppState, BuildInfo, BusMsg};
