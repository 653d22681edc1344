//! Wire-level frame codec for the NWS coordination protocol.
//!
//! Everything here is byte-shape only: counted-length primitives, the
//! name/value map and argument tuple shapes, the large-value spill
//! mechanism, and wire status codes. Connection state, handshake
//! negotiation and verb dispatch live in `nws-server`; the container and
//! workspace object model lives in `nws-core`.

pub mod error;
pub mod frame;
pub mod map;
pub mod status;
pub mod tuple;
pub mod value;

pub use error::{Error, Result};
pub use map::NameValueMap;
pub use status::Status;
pub use tuple::{Payload, SpillConfig};
pub use value::Value;
