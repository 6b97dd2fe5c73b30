//! Line-oriented JSON protocol spoken with the child process.
//!
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with a 1 MiB line cap.
//! - `decoder`: line-to-[`Event`](event::Event) decoding with sequence, turn and
//!   session bookkeeping.
//! - `event`: typed inbound events.
//! - `frames`: outbound prompt, control-response and capability-result frames.
//! - `value`: structured action input and rewrite merging.

pub mod codec;
pub mod decoder;
pub mod event;
pub mod frames;
pub mod value;
