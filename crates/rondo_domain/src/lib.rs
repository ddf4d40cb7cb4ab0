#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

/// Durable participant identity: 24 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
	pub const LEN: usize = 24;

	/// Create a validated `IdentityId`.
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.is_empty() {
			return Err(ParseIdError::Empty);
		}
		if id.len() != Self::LEN || !id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
			return Err(ParseIdError::InvalidFormat("expected 24 lowercase hex characters".into()));
		}
		Ok(Self(id))
	}

	/// Mint a fresh random identity.
	pub fn random() -> Self {
		let hex = uuid::Uuid::new_v4().simple().to_string();
		Self(hex[..Self::LEN].to_string())
	}

	/// Fixed identity used for server-originated messages.
	pub fn server() -> Self {
		Self("0".repeat(Self::LEN))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for IdentityId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for IdentityId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		IdentityId::new(s)
	}
}

/// Channel (room) identifier. Free-form, non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		Ok(Self(id))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for ChannelId {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ChannelId::new(s)
	}
}

/// Participant rank, clamped to `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Rank(u8);

// Deserialization clamps rather than deriving transparently, so a
// stored or wire value outside `0..=3` can never mint an admin rank.
impl<'de> Deserialize<'de> for Rank {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let value = i64::deserialize(deserializer)?;
		Ok(Rank::clamped(value))
	}
}

impl Rank {
	pub const MEMBER: Rank = Rank(0);
	pub const MODERATOR: Rank = Rank(1);
	pub const ADMIN: Rank = Rank(2);
	pub const OWNER: Rank = Rank(3);

	pub const MAX: u8 = 3;

	/// Clamp an arbitrary integer into a valid rank.
	pub fn clamped(value: i64) -> Rank {
		Rank(value.clamp(0, Self::MAX as i64) as u8)
	}

	/// Parse a rank, rejecting out-of-range values instead of coercing.
	pub fn parse(value: i64) -> Option<Rank> {
		if (0..=Self::MAX as i64).contains(&value) {
			Some(Rank(value as u8))
		} else {
			None
		}
	}

	pub fn as_u8(self) -> u8 {
		self.0
	}

	/// Whether this rank may run server commands and moderate channels.
	pub fn is_admin(self) -> bool {
		self >= Rank::ADMIN
	}

	/// Decorative tag shown next to the display name, derived from rank.
	pub fn tag(self) -> Option<RankTag> {
		match self {
			Rank::MODERATOR => Some(RankTag::new("MOD", "#00aa00")),
			Rank::ADMIN => Some(RankTag::new("ADMIN", "#ff0000")),
			Rank::OWNER => Some(RankTag::new("OWNER", "#830000")),
			_ => None,
		}
	}
}

impl Default for Rank {
	fn default() -> Self {
		Rank::MEMBER
	}
}

impl fmt::Display for Rank {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Rank-derived display tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTag {
	pub text: String,
	pub color: String,
}

impl RankTag {
	pub fn new(text: impl Into<String>, color: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			color: color.into(),
		}
	}
}

/// Validate a display color: `#` followed by exactly six hex digits.
pub fn valid_hex_color(code: &str) -> bool {
	let Some(rest) = code.strip_prefix('#') else {
		return false;
	};
	rest.len() == 6 && rest.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Derive a display color from raw entropy bytes.
pub fn random_color() -> String {
	let bytes = uuid::Uuid::new_v4().into_bytes();
	format!("#{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2])
}

/// A participant as seen by everyone in a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
	pub id: IdentityId,
	pub name: String,
	pub color: String,
	#[serde(default)]
	pub afk: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tag: Option<RankTag>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub x: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub y: Option<f64>,
}

impl Participant {
	/// Fresh anonymous participant with a random color.
	pub fn anonymous(id: IdentityId) -> Self {
		Self {
			id,
			name: "Anonymous".to_string(),
			color: random_color(),
			afk: false,
			tag: None,
			x: None,
			y: None,
		}
	}

	/// The participant server-originated messages are attributed to.
	pub fn server() -> Self {
		Self {
			id: IdentityId::server(),
			name: "Server".to_string(),
			color: "#0066ff".to_string(),
			afk: false,
			tag: None,
			x: None,
			y: None,
		}
	}

	/// Merge a profile patch; fields not supplied are preserved.
	pub fn merge(&mut self, patch: &ParticipantPatch) {
		if let Some(name) = &patch.name {
			self.name = name.clone();
		}
		if let Some(color) = &patch.color {
			self.color = color.clone();
		}
		if let Some(afk) = patch.afk {
			self.afk = afk;
		}
	}
}

/// Caller-supplied profile mutation. Absent fields are left untouched;
/// the rank tag is never caller-controlled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantPatch {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub color: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub afk: Option<bool>,
}

/// Per-category quota multipliers for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuotaMultipliers {
	pub chat: f64,
	pub note: f64,
	pub cursor: f64,
	pub profile: f64,
}

impl Default for QuotaMultipliers {
	fn default() -> Self {
		Self {
			chat: 1.0,
			note: 1.0,
			cursor: 1.0,
			profile: 1.0,
		}
	}
}

/// Rank plus quota multipliers; loaded at startup, persisted on change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipantModifier {
	#[serde(default)]
	pub rank: Rank,
	#[serde(default)]
	pub quota: QuotaMultipliers,
}

/// 2D position used for cursors and crown drop trajectories.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
	pub x: f64,
	pub y: f64,
}

impl Vector2 {
	pub const CENTER: Vector2 = Vector2 { x: 50.0, y: 50.0 };

	pub fn new(x: f64, y: f64) -> Self {
		Self { x, y }
	}
}

/// Exclusive channel ownership token.
///
/// `holder == None` means the crown is dropped; `time` records the
/// moment of the last state change and gates re-claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crown {
	#[serde(rename = "participantId", skip_serializing_if = "Option::is_none")]
	pub holder: Option<IdentityId>,
	#[serde(rename = "userId")]
	pub owner: IdentityId,
	#[serde(rename = "startPos")]
	pub start_pos: Vector2,
	#[serde(rename = "endPos")]
	pub end_pos: Vector2,
	pub time: u64,
}

impl Crown {
	/// Cooldown before a dropped crown may be claimed.
	pub const CLAIM_COOLDOWN_MS: u64 = 15_000;

	/// Crown held by the channel's creator.
	pub fn for_creator(creator: IdentityId, now_ms: u64) -> Self {
		Self {
			holder: Some(creator.clone()),
			owner: creator,
			start_pos: Vector2::CENTER,
			end_pos: Vector2::CENTER,
			time: now_ms,
		}
	}

	pub fn is_held_by(&self, id: &IdentityId) -> bool {
		self.holder.as_ref() == Some(id)
	}

	/// Whether a claim from the dropped state is allowed at `now_ms`.
	pub fn claimable_at(&self, now_ms: u64) -> bool {
		self.holder.is_none() && now_ms.saturating_sub(self.time) >= Self::CLAIM_COOLDOWN_MS
	}
}

/// Mutable channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
	#[serde(rename = "allowBots")]
	pub allow_bots: bool,
	pub chat: bool,
	pub color: String,
	pub color2: String,
	pub limit: u32,
	#[serde(default)]
	pub lobby: bool,
	#[serde(default)]
	pub crownsolo: bool,
	#[serde(rename = "no cussing", default)]
	pub no_cussing: bool,
	pub noindex: bool,
	pub visible: bool,
}

impl ChannelSettings {
	/// Highest accepted occupancy limit.
	pub const MAX_LIMIT: u32 = 99;

	/// Defaults for a lazily created channel.
	pub fn normal() -> Self {
		Self {
			allow_bots: true,
			chat: true,
			color: "#3b5054".to_string(),
			color2: "#001014".to_string(),
			limit: 50,
			lobby: false,
			crownsolo: false,
			no_cussing: false,
			noindex: false,
			visible: true,
		}
	}

	/// Defaults for a permanent lobby channel.
	pub fn lobby() -> Self {
		Self {
			allow_bots: true,
			chat: true,
			color: "#73b3cc".to_string(),
			color2: "#273546".to_string(),
			limit: 20,
			lobby: true,
			crownsolo: false,
			no_cussing: false,
			noindex: false,
			visible: true,
		}
	}

	/// Apply a settings patch. Returns `false` without mutating when the
	/// patch carries a malformed limit.
	pub fn apply(&mut self, patch: &ChannelSettingsPatch) -> bool {
		if let Some(limit) = patch.limit {
			if limit == 0 || limit > Self::MAX_LIMIT {
				return false;
			}
		}
		if let Some(limit) = patch.limit {
			self.limit = limit;
		}
		if let Some(chat) = patch.chat {
			self.chat = chat;
		}
		if let Some(visible) = patch.visible {
			self.visible = visible;
		}
		if let Some(color) = &patch.color {
			if valid_hex_color(color) {
				self.color = color.clone();
			}
		}
		if let Some(color2) = &patch.color2 {
			if valid_hex_color(color2) {
				self.color2 = color2.clone();
			}
		}
		if let Some(crownsolo) = patch.crownsolo {
			self.crownsolo = crownsolo;
		}
		if let Some(no_cussing) = patch.no_cussing {
			self.no_cussing = no_cussing;
		}
		if let Some(noindex) = patch.noindex {
			self.noindex = noindex;
		}
		true
	}
}

/// Caller-supplied channel settings mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettingsPatch {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub limit: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub chat: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub visible: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub color: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub color2: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub crownsolo: Option<bool>,
	#[serde(rename = "no cussing", skip_serializing_if = "Option::is_none")]
	pub no_cussing: Option<bool>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub noindex: Option<bool>,
}

/// Random 8-hex-digit message id.
pub fn random_message_id() -> String {
	let hex = uuid::Uuid::new_v4().simple().to_string();
	hex[..8].to_string()
}

/// A chat message broadcast to a channel. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
	pub id: String,
	#[serde(rename = "a")]
	pub body: String,
	#[serde(rename = "p")]
	pub author: Participant,
	#[serde(rename = "t")]
	pub timestamp_ms: u64,
	#[serde(rename = "r", skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<String>,
}

/// A direct message between two participants. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectMessage {
	pub id: String,
	#[serde(rename = "a")]
	pub body: String,
	pub sender: Participant,
	pub recipient: Participant,
	#[serde(rename = "t")]
	pub timestamp_ms: u64,
	#[serde(rename = "r", skip_serializing_if = "Option::is_none")]
	pub reply_to: Option<String>,
}

/// One entry in a channel's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "m")]
pub enum HistoryEntry {
	#[serde(rename = "a")]
	Chat(ChatMessage),
	#[serde(rename = "dm")]
	Direct(DirectMessage),
}

impl HistoryEntry {
	/// Chat messages are public; a direct message is visible on
	/// read-back only to its recipient.
	pub fn visible_to(&self, viewer: &IdentityId) -> bool {
		match self {
			HistoryEntry::Chat(_) => true,
			HistoryEntry::Direct(dm) => &dm.recipient.id == viewer,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_id_validates_length_and_charset() {
		assert!(IdentityId::new("a".repeat(24)).is_ok());
		assert!(IdentityId::new("a".repeat(23)).is_err());
		assert!(IdentityId::new("G".repeat(24)).is_err());
		assert!(IdentityId::new("").is_err());

		let id = IdentityId::random();
		assert_eq!(id.as_str().len(), 24);
		assert!(IdentityId::new(id.as_str()).is_ok());
	}

	#[test]
	fn rank_parse_rejects_out_of_range() {
		assert_eq!(Rank::parse(0), Some(Rank::MEMBER));
		assert_eq!(Rank::parse(3), Some(Rank::OWNER));
		assert_eq!(Rank::parse(4), None);
		assert_eq!(Rank::parse(-1), None);
		assert_eq!(Rank::clamped(99), Rank::OWNER);
	}

	#[test]
	fn rank_deserialization_clamps_out_of_range_values() {
		let high: Rank = serde_json::from_str("200").unwrap();
		assert_eq!(high, Rank::OWNER);
		assert!(!Rank::is_admin(serde_json::from_str("-1").unwrap()));
		let exact: Rank = serde_json::from_str("2").unwrap();
		assert_eq!(exact, Rank::ADMIN);
	}

	#[test]
	fn rank_tags_follow_the_table() {
		assert_eq!(Rank::MEMBER.tag(), None);
		assert_eq!(Rank::MODERATOR.tag().unwrap().text, "MOD");
		assert_eq!(Rank::ADMIN.tag().unwrap().color, "#ff0000");
		assert_eq!(Rank::OWNER.tag().unwrap().text, "OWNER");
	}

	#[test]
	fn hex_color_validation() {
		assert!(valid_hex_color("#a1b2c3"));
		assert!(!valid_hex_color("a1b2c3"));
		assert!(!valid_hex_color("#a1b2c"));
		assert!(!valid_hex_color("#a1b2c3d"));
		assert!(!valid_hex_color("#a1b2cg"));
		assert!(valid_hex_color(&random_color()));
	}

	#[test]
	fn participant_merge_preserves_missing_fields() {
		let mut p = Participant::anonymous(IdentityId::random());
		let original_color = p.color.clone();

		p.merge(&ParticipantPatch {
			name: Some("ada".to_string()),
			color: None,
			afk: None,
		});

		assert_eq!(p.name, "ada");
		assert_eq!(p.color, original_color);
	}

	#[test]
	fn settings_patch_rejects_malformed_limit() {
		let mut settings = ChannelSettings::normal();
		assert!(!settings.apply(&ChannelSettingsPatch {
			limit: Some(0),
			..Default::default()
		}));
		assert!(!settings.apply(&ChannelSettingsPatch {
			limit: Some(100),
			..Default::default()
		}));
		assert_eq!(settings.limit, 50);

		assert!(settings.apply(&ChannelSettingsPatch {
			limit: Some(10),
			chat: Some(false),
			..Default::default()
		}));
		assert_eq!(settings.limit, 10);
		assert!(!settings.chat);
	}

	#[test]
	fn crown_claim_cooldown() {
		let creator = IdentityId::random();
		let mut crown = Crown::for_creator(creator, 1_000);
		assert!(!crown.claimable_at(1_000_000));

		crown.holder = None;
		crown.time = 10_000;
		assert!(!crown.claimable_at(10_000 + 14_999));
		assert!(crown.claimable_at(10_000 + 15_000));
	}

	#[test]
	fn dm_history_visibility() {
		let a = Participant::anonymous(IdentityId::random());
		let b = Participant::anonymous(IdentityId::random());
		let c = IdentityId::random();

		let entry = HistoryEntry::Direct(DirectMessage {
			id: random_message_id(),
			body: "psst".to_string(),
			sender: a.clone(),
			recipient: b.clone(),
			timestamp_ms: 0,
			reply_to: None,
		});

		assert!(entry.visible_to(&b.id));
		assert!(!entry.visible_to(&a.id));
		assert!(!entry.visible_to(&c));
	}
}
