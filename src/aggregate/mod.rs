//! The erasure-coded object aggregation engine, cf. spec.md §2-§5.
//!
//! Submodules mirror the component list of spec.md §2: [`state`]/
//! [`assembler`] (stripe assembly, §4.2), [`parity_probe`] (§4.3),
//! [`classify`] (§4.4), [`codec_ops`] (§4.5), [`coordinator`] (§4.6),
//! [`committer`] (§4.7), [`offload`] (§4.8), tied together by [`driver`]
//! (§4.1).

pub mod assembler;
pub mod classify;
pub mod codec_ops;
pub mod committer;
pub mod coordinator;
pub mod driver;
pub mod offload;
pub mod parity_probe;
pub mod state;

pub use classify::Action;
pub use driver::{AggregateEngine, AggregateReport};
pub use state::{AkeyState, DataExtent, ParityProbe};
