#![forbid(unsafe_code)]

pub mod frame;
pub mod messages;

pub use frame::{DEFAULT_MAX_FRAME_LEN, FrameError, decode_frame, encode_frame};
pub use messages::{ChannelInfo, ClientMessage, Coord, GREETING_CODE, QuotaParams, ServerMessage, valid_connection_code};

/// Protocol version constants.
pub mod version {
	/// Current protocol major version (v1).
	pub const PROTOCOL_MAJOR: u32 = 1;
	/// Current protocol minor version.
	pub const PROTOCOL_MINOR: u32 = 0;
}
