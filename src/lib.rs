//! Discrete-event simulator for a Breakwater-style credit admission
//! controller cooperating with a dynamically-resized work-stealing worker
//! pool.
//!
//! The crate is organized leaf-first, following dependency order: `clock`
//! and `rng` have no internal dependencies; `config` and `error` are pure
//! data; `task` and `queue` build on those; `worker` depends on `queue`;
//! `client` and `server` depend on `queue`'s notion of delay; `allocator`
//! coordinates `worker` state; `sim` owns everything and runs the per-tick
//! cycle; `stats` and `replay` are the engine's output and input-schedule
//! boundaries.

pub mod allocator;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod loadgen;
pub mod queue;
pub mod replay;
pub mod rng;
pub mod server;
pub mod sim;
pub mod stats;
pub mod task;
pub mod worker;

pub use config::Config;
pub use error::{SimError, SimResult};
pub use rng::SimRng;
pub use sim::SimulationState;
