#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use rondo_domain::{ChannelId, IdentityId, QuotaMultipliers};
use rondo_protocol::{ServerMessage, encode_frame};
use tokio::sync::mpsc;
use tracing::debug;

use super::limiter::EventLimiter;
use super::quota::NoteQuota;

pub type ConnId = u64;

/// Items pushed to a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
	Frame(String),
	Close,
}

/// Outbound queue capacity per connection.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Configured per-window limiter maxima before per-identity scaling.
#[derive(Debug, Clone, Copy)]
pub struct LimiterBases {
	pub chat: u32,
	pub profile: u32,
	pub cursor: u32,
}

impl Default for LimiterBases {
	fn default() -> Self {
		Self {
			chat: EventLimiter::MAX_CHAT,
			profile: EventLimiter::MAX_PROFILE,
			cursor: EventLimiter::MAX_CURSOR,
		}
	}
}

/// Router-owned state for one live connection.
///
/// The limiters and quota here are this connection's own instances;
/// shared state (profiles, channels) lives in the directory and
/// registry, never in a session copy.
#[derive(Debug)]
pub struct Session {
	pub conn_id: ConnId,
	pub token: Option<String>,
	pub identity: Option<IdentityId>,
	pub channel: Option<ChannelId>,
	pub chat_limiter: EventLimiter,
	pub profile_limiter: EventLimiter,
	pub cursor_limiter: EventLimiter,
	pub note_quota: NoteQuota,
	pub note_multiplier: f64,
	pub wants_channel_list: bool,
	outbound: mpsc::Sender<Outbound>,
}

impl Session {
	pub fn new(conn_id: ConnId, outbound: mpsc::Sender<Outbound>, now_ms: u64) -> Self {
		Self {
			conn_id,
			token: None,
			identity: None,
			channel: None,
			chat_limiter: EventLimiter::scaled(EventLimiter::MAX_CHAT, 1.0, now_ms),
			profile_limiter: EventLimiter::scaled(EventLimiter::MAX_PROFILE, 1.0, now_ms),
			cursor_limiter: EventLimiter::scaled(EventLimiter::MAX_CURSOR, 1.0, now_ms),
			note_quota: NoteQuota::new(NoteQuota::MAX_OFFLINE, now_ms),
			note_multiplier: 1.0,
			wants_channel_list: false,
			outbound,
		}
	}

	/// Bind the session to an identity; limiter maxima are rescaled by
	/// the identity's modifier multipliers.
	pub fn bind(&mut self, token: String, identity: IdentityId, bases: LimiterBases, quota: QuotaMultipliers, now_ms: u64) {
		self.token = Some(token);
		self.identity = Some(identity);
		self.chat_limiter = EventLimiter::scaled(bases.chat, quota.chat, now_ms);
		self.profile_limiter = EventLimiter::scaled(bases.profile, quota.profile, now_ms);
		self.cursor_limiter = EventLimiter::scaled(bases.cursor, quota.cursor, now_ms);
		self.note_multiplier = quota.note;
	}

	pub fn is_bound(&self) -> bool {
		self.token.is_some()
	}

	/// Queue an already-encoded frame. A full or closed peer drops the
	/// frame; it never blocks the router.
	pub fn send_frame(&self, frame: String) {
		match self.outbound.try_send(Outbound::Frame(frame)) {
			Ok(()) => {
				metrics::counter!("rondo_frames_out_total").increment(1);
			}
			Err(mpsc::error::TrySendError::Full(_)) => {
				metrics::counter!("rondo_outbound_dropped_total").increment(1);
				debug!(conn = self.conn_id, "dropping frame for slow peer");
			}
			Err(mpsc::error::TrySendError::Closed(_)) => {}
		}
	}

	/// Encode and queue a batch of messages as one frame.
	pub fn send(&self, messages: &[ServerMessage]) {
		match encode_frame(messages) {
			Ok(frame) => self.send_frame(frame),
			Err(err) => {
				debug!(conn = self.conn_id, %err, "failed to encode outbound frame");
			}
		}
	}

	/// Ask the writer task to close the socket.
	pub fn request_close(&self) {
		let _ = self.outbound.try_send(Outbound::Close);
	}
}

/// All live sessions, keyed by connection id.
#[derive(Debug, Default)]
pub struct SessionTable {
	sessions: HashMap<ConnId, Session>,
}

impl SessionTable {
	pub fn insert(&mut self, session: Session) {
		self.sessions.insert(session.conn_id, session);
	}

	pub fn remove(&mut self, conn_id: ConnId) -> Option<Session> {
		self.sessions.remove(&conn_id)
	}

	pub fn get(&self, conn_id: ConnId) -> Option<&Session> {
		self.sessions.get(&conn_id)
	}

	pub fn get_mut(&mut self, conn_id: ConnId) -> Option<&mut Session> {
		self.sessions.get_mut(&conn_id)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Session> {
		self.sessions.values()
	}

	/// Distinct identities currently in `channel`. Two connections
	/// bound to the same token count once.
	pub fn occupancy(&self, channel: &ChannelId) -> usize {
		self.members_of(channel).len()
	}

	/// Distinct member identities of a channel.
	pub fn members_of(&self, channel: &ChannelId) -> HashSet<IdentityId> {
		self.sessions
			.values()
			.filter(|s| s.channel.as_ref() == Some(channel))
			.filter_map(|s| s.identity.clone())
			.collect()
	}

	/// Live connections for `identity` inside `channel`.
	pub fn connections_for_identity_in(&self, identity: &IdentityId, channel: &ChannelId) -> usize {
		self.sessions
			.values()
			.filter(|s| s.channel.as_ref() == Some(channel) && s.identity.as_ref() == Some(identity))
			.count()
	}

	/// Whether `identity` is present anywhere in `channel`.
	pub fn identity_in_channel(&self, identity: &IdentityId, channel: &ChannelId) -> bool {
		self.connections_for_identity_in(identity, channel) > 0
	}

	/// Fan a pre-encoded frame out to every session in `channel`,
	/// optionally excluding one connection.
	pub fn broadcast_frame(&self, channel: &ChannelId, frame: &str, exclude: Option<ConnId>) {
		for session in self.sessions.values() {
			if session.channel.as_ref() != Some(channel) {
				continue;
			}
			if exclude == Some(session.conn_id) {
				continue;
			}
			session.send_frame(frame.to_string());
		}
	}

	/// Send a frame to every connection bound to `identity` inside
	/// `channel` (a participant may hold several connections).
	pub fn send_to_identity_in(&self, identity: &IdentityId, channel: &ChannelId, frame: &str) {
		for session in self.sessions.values() {
			if session.channel.as_ref() == Some(channel) && session.identity.as_ref() == Some(identity) {
				session.send_frame(frame.to_string());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn session(conn_id: ConnId, identity: &IdentityId, channel: &str) -> (Session, mpsc::Receiver<Outbound>) {
		let (tx, rx) = mpsc::channel(4);
		let mut s = Session::new(conn_id, tx, 0);
		s.bind(
			format!("tok{conn_id}"),
			identity.clone(),
			LimiterBases::default(),
			QuotaMultipliers::default(),
			0,
		);
		s.channel = Some(ChannelId::new(channel).unwrap());
		(s, rx)
	}

	#[test]
	fn occupancy_counts_distinct_identities() {
		let mut table = SessionTable::default();
		let a = IdentityId::random();
		let b = IdentityId::random();
		let ch = ChannelId::new("room").unwrap();

		let (s1, _rx1) = session(1, &a, "room");
		let (s2, _rx2) = session(2, &a, "room");
		let (s3, _rx3) = session(3, &b, "room");
		table.insert(s1);
		table.insert(s2);
		table.insert(s3);

		assert_eq!(table.occupancy(&ch), 2);
		assert_eq!(table.connections_for_identity_in(&a, &ch), 2);
		assert_eq!(table.connections_for_identity_in(&b, &ch), 1);
	}

	#[test]
	fn broadcast_excludes_sender_and_other_channels() {
		let mut table = SessionTable::default();
		let a = IdentityId::random();
		let ch = ChannelId::new("room").unwrap();

		let (s1, mut rx1) = session(1, &a, "room");
		let (s2, mut rx2) = session(2, &IdentityId::random(), "room");
		let (s3, mut rx3) = session(3, &IdentityId::random(), "elsewhere");
		table.insert(s1);
		table.insert(s2);
		table.insert(s3);

		table.broadcast_frame(&ch, "[]", Some(1));

		assert!(rx1.try_recv().is_err());
		assert!(matches!(rx2.try_recv(), Ok(Outbound::Frame(f)) if f == "[]"));
		assert!(rx3.try_recv().is_err());
	}

	#[test]
	fn full_queue_drops_instead_of_blocking() {
		let (tx, mut rx) = mpsc::channel(1);
		let s = Session::new(1, tx, 0);

		s.send_frame("[1]".to_string());
		s.send_frame("[2]".to_string());

		assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(f)) if f == "[1]"));
		assert!(rx.try_recv().is_err());
	}
}
