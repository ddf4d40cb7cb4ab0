#![forbid(unsafe_code)]

use rondo_domain::{
	ChannelId, ChannelSettings, ChannelSettingsPatch, ChatMessage, Crown, DirectMessage, HistoryEntry, IdentityId,
	Participant, ParticipantPatch,
};
use serde::{Deserialize, Serialize};

/// Payload of the initial greeting (`b`) frame: a client-evaluated
/// snippet that produces the handshake connection code.
pub const GREETING_CODE: &str = "~let l=\"0123456789abcdefghijklmnopqrstuvwxyz\",o=Array(5).fill(\"\");for(let r=0;r<5;r++)for(let t=0;t<5;t++)o[r]+=2==r&&0==t?\"0\":l[Math.floor(36*Math.random())];return o.join(\".\");";

/// Validate a handshake connection code: five dot-separated groups of
/// five lowercase alphanumerics, the third group starting with `0`.
pub fn valid_connection_code(code: &str) -> bool {
	if code.len() != 29 {
		return false;
	}
	let groups: Vec<&str> = code.split('.').collect();
	if groups.len() != 5 {
		return false;
	}
	for (i, group) in groups.iter().enumerate() {
		if group.len() != 5 {
			return false;
		}
		if !group.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
			return false;
		}
		if i == 2 && !group.starts_with('0') {
			return false;
		}
	}
	true
}

/// A cursor coordinate as delivered on the wire: clients send either a
/// JSON number or a stringified one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Coord {
	Number(f64),
	Text(String),
}

impl Coord {
	/// Parse into a finite float, rejecting NaN/inf and garbage text.
	pub fn as_finite(&self) -> Option<f64> {
		let v = match self {
			Coord::Number(n) => *n,
			Coord::Text(s) => s.trim().parse::<f64>().ok()?,
		};
		v.is_finite().then_some(v)
	}
}

/// Inbound protocol messages, keyed by the `m` discriminator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "m")]
pub enum ClientMessage {
	/// Handshake.
	#[serde(rename = "hi")]
	Hi {
		code: String,
		#[serde(default)]
		token: Option<String>,
	},

	/// Join (or create) a channel.
	#[serde(rename = "ch")]
	Join {
		#[serde(rename = "_id")]
		channel: String,
		#[serde(default)]
		set: Option<ChannelSettingsPatch>,
	},

	/// Crown transfer; no target means the holder drops the crown, and
	/// a sender without the crown attempts a claim.
	#[serde(rename = "chown")]
	CrownTransfer {
		#[serde(default)]
		id: Option<IdentityId>,
	},

	/// Mutate channel settings.
	#[serde(rename = "chset")]
	ChannelSet { set: ChannelSettingsPatch },

	/// Cursor move.
	#[serde(rename = "m")]
	Cursor {
		#[serde(default)]
		x: Option<Coord>,
		#[serde(default)]
		y: Option<Coord>,
	},

	/// Chat; a `^`-prefixed body routes to the command dispatcher.
	#[serde(rename = "a")]
	Chat {
		message: String,
		#[serde(default)]
		reply_to: Option<String>,
	},

	/// Direct message to a participant in the same channel.
	#[serde(rename = "dm")]
	Direct {
		#[serde(rename = "_id")]
		recipient: IdentityId,
		message: String,
		#[serde(default)]
		reply_to: Option<String>,
	},

	/// Timed note event; the payload is opaque and its length is the
	/// quota cost.
	#[serde(rename = "n")]
	Note { n: String },

	/// Profile update.
	#[serde(rename = "userset")]
	UserSet { set: ParticipantPatch },

	/// Subscribe to the room list.
	#[serde(rename = "+ls")]
	SubscribeChannelList,

	/// Unsubscribe from the room list.
	#[serde(rename = "-ls")]
	UnsubscribeChannelList,
}

/// Wire snapshot of a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
	#[serde(rename = "_id")]
	pub id: ChannelId,
	pub count: usize,
	pub settings: ChannelSettings,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub crown: Option<Crown>,
}

/// Quota parameters pushed to a peer (`nq`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaParams {
	pub allowance: f64,
	pub max: f64,
	#[serde(rename = "maxHistLen")]
	pub max_hist_len: u32,
}

/// Outbound protocol messages, keyed by the `m` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "m")]
pub enum ServerMessage {
	/// Welcome; carries a freshly minted token for new identities.
	#[serde(rename = "hi")]
	Hi {
		motd: String,
		t: u64,
		#[serde(skip_serializing_if = "Option::is_none")]
		token: Option<String>,
		u: Participant,
	},

	/// Channel snapshot with member list, sent to the joiner and, on
	/// crown transitions, to the whole channel.
	#[serde(rename = "ch")]
	Channel {
		ch: ChannelInfo,
		p: IdentityId,
		ppl: Vec<Participant>,
	},

	/// Channel history, already filtered for the recipient.
	#[serde(rename = "c")]
	History { c: Vec<HistoryEntry> },

	/// Quota parameters for the peer's note budget.
	#[serde(rename = "nq")]
	Quota(QuotaParams),

	/// Profile broadcast.
	#[serde(rename = "p")]
	Profile {
		#[serde(flatten)]
		participant: Participant,
	},

	/// A participant left the channel.
	#[serde(rename = "bye")]
	Bye { p: IdentityId },

	/// Cursor echo; coordinates are formatted with two decimals.
	#[serde(rename = "m")]
	Cursor { x: String, y: String, id: IdentityId },

	/// Chat echo.
	#[serde(rename = "a")]
	Chat(ChatMessage),

	/// Direct message delivery.
	#[serde(rename = "dm")]
	Direct(DirectMessage),

	/// Note echo.
	#[serde(rename = "n")]
	Note { n: String, p: IdentityId, t: u64 },

	/// Visible channel list for room-list subscribers.
	#[serde(rename = "ls")]
	ChannelList { c: bool, u: Vec<ChannelInfo> },

	/// Initial greeting payload.
	#[serde(rename = "b")]
	Greeting { code: String },
}
