#![forbid(unsafe_code)]

use serde_json::Value;
use thiserror::Error;

use crate::messages::{ClientMessage, ServerMessage};

/// Default maximum inbound frame length in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum FrameError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge { len: usize, max: usize },

	#[error("frame is not a JSON array")]
	NotAnArray,

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Decode one inbound frame: a JSON array of messages.
///
/// A frame that is not valid JSON or not an array fails as a whole; a
/// well-formed frame yields one result per element so a malformed
/// message can be skipped without aborting the rest of the batch.
pub fn decode_frame(raw: &str, max_len: usize) -> Result<Vec<Result<ClientMessage, FrameError>>, FrameError> {
	if raw.len() > max_len {
		return Err(FrameError::FrameTooLarge {
			len: raw.len(),
			max: max_len,
		});
	}

	let value: Value = serde_json::from_str(raw)?;
	let Value::Array(elements) = value else {
		return Err(FrameError::NotAnArray);
	};

	Ok(elements
		.into_iter()
		.map(|el| serde_json::from_value::<ClientMessage>(el).map_err(FrameError::from))
		.collect())
}

/// Encode an outbound frame: a JSON array of messages.
pub fn encode_frame(messages: &[ServerMessage]) -> Result<String, FrameError> {
	Ok(serde_json::to_string(messages)?)
}
