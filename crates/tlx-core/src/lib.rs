//! tlx core: the telemetry transmission pipeline.
//!
//! Records flow producer → [`buffer`] → [`transmitter`] → [`serializer`] →
//! [`dispatcher`] → network or disk [`output`]. The [`policy`] manager
//! interprets every network attempt and decides whether the network may be
//! used at all; the [`loader`] replays persisted payloads once it may.
//! [`channel::TelemetryChannel`] wires all of it behind `send`/`stop`.

pub mod buffer;
pub mod channel;
pub mod delivery;
pub mod dispatcher;
pub mod exit_codes;
pub mod loader;
pub mod logging;
pub mod output;
pub mod policy;
pub mod scheduler;
pub mod serializer;
pub mod transmitter;
pub mod worker;

pub use buffer::TelemetryBuffer;
pub use channel::{ChannelError, TelemetryChannel};
pub use policy::{PolicyManager, PolicyState, PolicyView};
pub use transmitter::{TelemetriesTransmitter, Transmitter};
