#![forbid(unsafe_code)]

use rondo_domain::{
	ChannelId, ChannelSettingsPatch, ChatMessage, DirectMessage, HistoryEntry, IdentityId, Participant,
	ParticipantPatch, Rank, random_message_id,
};
use rondo_protocol::{
	ChannelInfo, ClientMessage, Coord, DEFAULT_MAX_FRAME_LEN, GREETING_CODE, ServerMessage, decode_frame,
	valid_connection_code,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{self, TokenScheme};
use super::commands::{self, COMMAND_PREFIX, CommandOutcome};
use super::directory::Directory;
use super::quota::NoteQuota;
use super::registry::ChannelRegistry;
use super::session::{ConnId, LimiterBases, Outbound, Session, SessionTable};
use super::store::Store;
use crate::config::{ServerConfig, TokenSchemeConfig};
use crate::util::time::unix_ms_now;

/// Capacity of the router's inbound event queue.
pub const EVENT_QUEUE_CAPACITY: usize = 4096;

/// Events fed to the router by connection tasks.
#[derive(Debug)]
pub enum RouterEvent {
	Open { conn_id: ConnId, outbound: mpsc::Sender<Outbound> },
	Frame { conn_id: ConnId, raw: String },
	Close { conn_id: ConnId },
}

/// Router-side settings derived from the server config.
#[derive(Debug, Clone)]
pub struct RouterConfig {
	pub motd: String,
	pub token_scheme: TokenSchemeConfig,
	pub token_secret: Option<String>,
	pub limiter_bases: LimiterBases,
}

impl RouterConfig {
	pub fn from_server_config(cfg: &ServerConfig) -> Self {
		Self {
			motd: cfg.server.motd.clone(),
			token_scheme: cfg.effective_token_scheme(),
			token_secret: cfg.server.token_secret.clone(),
			limiter_bases: LimiterBases {
				chat: cfg.limits.chat_per_window,
				profile: cfg.limits.profile_per_window,
				cursor: cfg.limits.cursor_per_window,
			},
		}
	}
}

/// Single-task owner of all shared state.
///
/// Every directory, registry and session mutation happens here, one
/// inbound event at a time; handlers never race and never hold locks.
/// Outbound delivery is bounded `try_send` fan-out, so a slow peer
/// cannot stall the event loop.
pub struct Router {
	cfg: RouterConfig,
	directory: Directory,
	registry: ChannelRegistry,
	sessions: SessionTable,
	store: Store,
	events: mpsc::Receiver<RouterEvent>,
}

impl Router {
	pub fn new(
		cfg: RouterConfig,
		directory: Directory,
		registry: ChannelRegistry,
		store: Store,
	) -> (Self, mpsc::Sender<RouterEvent>) {
		let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
		let router = Self {
			cfg,
			directory,
			registry,
			sessions: SessionTable::default(),
			store,
			events: rx,
		};
		(router, tx)
	}

	pub async fn run(mut self) {
		info!("router started");
		while let Some(event) = self.events.recv().await {
			self.handle_event_at(event, unix_ms_now()).await;
		}
		info!("router stopped");
	}

	pub(crate) async fn handle_event_at(&mut self, event: RouterEvent, now_ms: u64) {
		match event {
			RouterEvent::Open { conn_id, outbound } => self.on_open(conn_id, outbound, now_ms),
			RouterEvent::Frame { conn_id, raw } => self.on_frame(conn_id, &raw, now_ms).await,
			RouterEvent::Close { conn_id } => self.on_close(conn_id, now_ms).await,
		}
	}

	fn on_open(&mut self, conn_id: ConnId, outbound: mpsc::Sender<Outbound>, now_ms: u64) {
		let session = Session::new(conn_id, outbound, now_ms);
		session.send(&[ServerMessage::Greeting {
			code: GREETING_CODE.to_string(),
		}]);
		self.sessions.insert(session);

		metrics::counter!("rondo_connections_total").increment(1);
		metrics::gauge!("rondo_connections").increment(1.0);
		debug!(conn = conn_id, "connection opened");
	}

	async fn on_frame(&mut self, conn_id: ConnId, raw: &str, now_ms: u64) {
		metrics::counter!("rondo_frames_in_total").increment(1);

		let messages = match decode_frame(raw, DEFAULT_MAX_FRAME_LEN) {
			Ok(messages) => messages,
			Err(err) => {
				debug!(conn = conn_id, %err, "dropping undecodable frame");
				return;
			}
		};

		// One bad message never aborts the rest of the batch.
		for message in messages {
			match message {
				Ok(message) => self.dispatch(conn_id, message, now_ms).await,
				Err(err) => {
					debug!(conn = conn_id, %err, "skipping undecodable message");
				}
			}
		}
	}

	async fn dispatch(&mut self, conn_id: ConnId, message: ClientMessage, now_ms: u64) {
		if !matches!(message, ClientMessage::Hi { .. })
			&& !self.sessions.get(conn_id).is_some_and(Session::is_bound)
		{
			return;
		}

		match message {
			ClientMessage::Hi { code, token } => self.handle_hi(conn_id, &code, token, now_ms).await,
			ClientMessage::Join { channel, set } => self.handle_join(conn_id, &channel, set, now_ms),
			ClientMessage::CrownTransfer { id } => self.handle_crown_transfer(conn_id, id, now_ms),
			ClientMessage::ChannelSet { set } => self.handle_channel_set(conn_id, &set),
			ClientMessage::Cursor { x, y } => self.handle_cursor(conn_id, x, y, now_ms),
			ClientMessage::Chat { message, reply_to } => self.handle_chat(conn_id, message, reply_to, now_ms).await,
			ClientMessage::Direct {
				recipient,
				message,
				reply_to,
			} => self.handle_direct(conn_id, recipient, message, reply_to, now_ms),
			ClientMessage::Note { n } => self.handle_note(conn_id, n, now_ms),
			ClientMessage::UserSet { set } => self.handle_userset(conn_id, &set, now_ms).await,
			ClientMessage::SubscribeChannelList => self.handle_subscribe(conn_id),
			ClientMessage::UnsubscribeChannelList => self.handle_unsubscribe(conn_id),
		}
	}

	/// Handshake. A bad connection code closes the connection; the
	/// mint-a-new-identity path never fails closed.
	async fn handle_hi(&mut self, conn_id: ConnId, code: &str, token: Option<String>, now_ms: u64) {
		if !valid_connection_code(code) {
			if let Some(session) = self.sessions.get(conn_id) {
				session.request_close();
			}
			debug!(conn = conn_id, "closing connection on bad handshake code");
			return;
		}

		// An offered token binds only if it verifies under the configured
		// scheme and resolves to a known profile.
		if let Some(token) = token
			&& let Some(identity) = self.verify_token(&token)
			&& self.directory.profile(&token).is_some_and(|p| p.id == identity)
		{
			let profile = self.directory.profile(&token).cloned().unwrap_or_else(|| Participant::anonymous(identity));
			let quota = self.directory.modifier(&token).quota;
			let bases = self.cfg.limiter_bases;
			if let Some(session) = self.sessions.get_mut(conn_id) {
				session.bind(token, profile.id.clone(), bases, quota, now_ms);
				session.send(&[ServerMessage::Hi {
					motd: self.cfg.motd.clone(),
					t: now_ms,
					token: None,
					u: profile,
				}]);
			}
			return;
		}

		let identity = IdentityId::random();
		let token = self.mint_token(&identity, now_ms);
		let profile = self.directory.bind(&token, identity.clone()).clone();
		if let Err(err) = self.store.save_profile(&token, &profile).await {
			warn!(%err, "failed to persist new profile");
		}

		let bases = self.cfg.limiter_bases;
		let quota = self.directory.modifier(&token).quota;
		if let Some(session) = self.sessions.get_mut(conn_id) {
			session.bind(token.clone(), identity, bases, quota, now_ms);
			session.send(&[ServerMessage::Hi {
				motd: self.cfg.motd.clone(),
				t: now_ms,
				token: Some(token),
				u: profile,
			}]);
		}
	}

	fn verify_token(&self, token: &str) -> Option<IdentityId> {
		match (TokenScheme::detect(token)?, self.cfg.token_scheme) {
			(TokenScheme::Legacy, TokenSchemeConfig::Legacy) => auth::validate_legacy(token).ok(),
			(TokenScheme::Signed, TokenSchemeConfig::Signed) => {
				let secret = self.cfg.token_secret.as_deref()?;
				let claims = auth::verify_signed(token, secret).ok()?;
				IdentityId::new(claims.sub).ok()
			}
			_ => None,
		}
	}

	fn mint_token(&self, identity: &IdentityId, now_ms: u64) -> String {
		if self.cfg.token_scheme == TokenSchemeConfig::Signed
			&& let Some(secret) = self.cfg.token_secret.as_deref()
		{
			match auth::mint_signed(identity, now_ms / 1_000, secret) {
				Ok(token) => return token,
				Err(err) => warn!(%err, "failed to mint signed token; issuing legacy token"),
			}
		}
		format!("{identity}.{}", Uuid::new_v4())
	}

	fn handle_join(&mut self, conn_id: ConnId, channel: &str, set: Option<ChannelSettingsPatch>, now_ms: u64) {
		let Some(session) = self.sessions.get(conn_id) else {
			return;
		};
		let (Some(token), Some(identity)) = (session.token.clone(), session.identity.clone()) else {
			return;
		};
		let prev = session.channel.clone();
		let Ok(mut target) = channel.parse::<ChannelId>() else {
			return;
		};

		// Capacity policy. An identity already inside never adds to the
		// occupancy, so reconnects into a full channel pass.
		if let Some(existing) = self.registry.get(&target) {
			let full = self.sessions.occupancy(&target) >= existing.settings.limit as usize;
			if full && !self.sessions.identity_in_channel(&identity, &target) {
				match &prev {
					None => {
						let sessions = &self.sessions;
						target = self.registry.probe_lobby(|id| sessions.occupancy(id), now_ms);
					}
					Some(_) => {
						self.send_server_dm(conn_id, format!("\"{target}\" is full."), None, now_ms);
						return;
					}
				}
			}
		}

		let rank = self.directory.rank(&token);
		{
			let channel = self.registry.get_or_create(&target, &identity, set.as_ref(), now_ms);
			let preset = if rank == Rank::OWNER {
				NoteQuota::MAX_UNLIMITED
			} else if channel.crown.as_ref().is_some_and(|c| c.is_held_by(&identity)) {
				NoteQuota::MAX_CROWN
			} else if channel.settings.lobby {
				NoteQuota::MAX_LOBBY
			} else {
				NoteQuota::MAX_NORMAL
			};

			let session = self.sessions.get_mut(conn_id).expect("session checked above");
			session.channel = Some(target.clone());
			session.note_quota.set_params_at(preset * session.note_multiplier, now_ms);
		}

		// Join bundle: snapshot, recipient-filtered history, quota.
		let info = self.channel_info(&target).expect("channel just created");
		let ppl = self.channel_members(&target);
		let history: Vec<HistoryEntry> = self
			.registry
			.get(&target)
			.map(|ch| ch.history.iter().filter(|e| e.visible_to(&identity)).cloned().collect())
			.unwrap_or_default();

		let session = self.sessions.get(conn_id).expect("session checked above");
		let quota_params = session.note_quota.params();
		session.send(&[
			ServerMessage::Channel {
				ch: info,
				p: identity.clone(),
				ppl,
			},
			ServerMessage::History { c: history },
			ServerMessage::Quota(quota_params),
		]);

		// Presence: only the identity's first connection announces.
		if self.sessions.connections_for_identity_in(&identity, &target) == 1
			&& let Some(profile) = self.directory.profile(&token).cloned()
			&& let Ok(frame) = rondo_protocol::encode_frame(&[ServerMessage::Profile { participant: profile }])
		{
			self.sessions.broadcast_frame(&target, &frame, Some(conn_id));
		}

		if let Some(prev) = prev
			&& prev != target
		{
			self.announce_leave(&identity, &prev, now_ms);
		}
		self.notify_list_subscribers(&target);
	}

	/// Join/claim/transfer/release of a channel's crown.
	fn handle_crown_transfer(&mut self, conn_id: ConnId, target: Option<IdentityId>, now_ms: u64) {
		let Some(session) = self.sessions.get(conn_id) else {
			return;
		};
		let (Some(token), Some(identity), Some(channel_id)) =
			(session.token.clone(), session.identity.clone(), session.channel.clone())
		else {
			return;
		};
		let rank = self.directory.rank(&token);
		let caller_pos = self
			.directory
			.profile(&token)
			.and_then(|p| Some(rondo_domain::Vector2::new(p.x?, p.y?)));

		let changed = {
			let Some(channel) = self.registry.get_mut(&channel_id) else {
				return;
			};
			let Some(crown) = channel.crown.clone() else {
				return;
			};

			match (crown.holder.as_ref(), target) {
				// Holder drops the crown.
				(Some(holder), None) if holder == &identity => {
					channel.release_crown(&identity, caller_pos, now_ms)
				}
				// Self-transfer is a no-op.
				(Some(holder), Some(recipient)) if holder == &recipient => false,
				// Holder or operator hands the crown to a present member.
				(Some(holder), Some(recipient)) if holder == &identity || rank.is_admin() => {
					if self.sessions.identity_in_channel(&recipient, &channel_id) {
						channel.seat_crown(recipient, now_ms)
					} else {
						false
					}
				}
				// Claim from unclaimed, gated by the cooldown.
				(None, target) => {
					let recipient = target.unwrap_or_else(|| identity.clone());
					let allowed = (recipient == identity || rank.is_admin())
						&& self.sessions.identity_in_channel(&recipient, &channel_id)
						&& crown.claimable_at(now_ms);
					allowed && channel.seat_crown(recipient, now_ms)
				}
				_ => false,
			}
		};

		if changed {
			self.broadcast_channel_update(&channel_id);
		}
	}

	fn handle_channel_set(&mut self, conn_id: ConnId, patch: &ChannelSettingsPatch) {
		let Some(session) = self.sessions.get(conn_id) else {
			return;
		};
		let (Some(token), Some(identity), Some(channel_id)) =
			(session.token.clone(), session.identity.clone(), session.channel.clone())
		else {
			return;
		};

		let rank = self.directory.rank(&token);
		let changed = {
			let Some(channel) = self.registry.get_mut(&channel_id) else {
				return;
			};
			let holds_crown = channel.crown.as_ref().is_some_and(|c| c.is_held_by(&identity));
			if !holds_crown && !rank.is_admin() {
				return;
			}
			channel.settings.apply(patch)
		};

		if changed {
			self.broadcast_channel_update(&channel_id);
		}
	}

	fn handle_cursor(&mut self, conn_id: ConnId, x: Option<Coord>, y: Option<Coord>, now_ms: u64) {
		let Some(session) = self.sessions.get_mut(conn_id) else {
			return;
		};
		let (Some(token), Some(identity), Some(channel)) =
			(session.token.clone(), session.identity.clone(), session.channel.clone())
		else {
			return;
		};
		if !session.cursor_limiter.emit_at(now_ms) {
			metrics::counter!("rondo_rate_limited_total", "kind" => "cursor").increment(1);
			return;
		}
		let (Some(x), Some(y)) = (x.and_then(|c| c.as_finite()), y.and_then(|c| c.as_finite())) else {
			return;
		};

		self.directory.set_position(&token, x, y);

		if let Ok(frame) = rondo_protocol::encode_frame(&[ServerMessage::Cursor {
			x: format!("{x:.2}"),
			y: format!("{y:.2}"),
			id: identity,
		}]) {
			self.sessions.broadcast_frame(&channel, &frame, Some(conn_id));
		}
	}

	async fn handle_chat(&mut self, conn_id: ConnId, message: String, reply_to: Option<String>, now_ms: u64) {
		let Some(session) = self.sessions.get_mut(conn_id) else {
			return;
		};
		let (Some(token), Some(channel)) = (session.token.clone(), session.channel.clone()) else {
			return;
		};
		if !session.chat_limiter.emit_at(now_ms) {
			metrics::counter!("rondo_rate_limited_total", "kind" => "chat").increment(1);
			return;
		}
		let Some(author) = self.directory.profile(&token).cloned() else {
			return;
		};

		if message.starts_with(COMMAND_PREFIX) {
			self.handle_command(conn_id, &token, author, channel, message, now_ms).await;
			return;
		}

		let chat = ChatMessage {
			id: random_message_id(),
			body: message,
			author,
			timestamp_ms: now_ms,
			reply_to,
		};

		if let Ok(frame) = rondo_protocol::encode_frame(&[ServerMessage::Chat(chat.clone())]) {
			self.sessions.broadcast_frame(&channel, &frame, None);
		}
		if let Some(ch) = self.registry.get_mut(&channel) {
			ch.history.push(HistoryEntry::Chat(chat));
		}
	}

	/// A `^`-prefixed chat body: echoed back as a direct message to the
	/// server participant, appended to history, then dispatched.
	async fn handle_command(
		&mut self,
		conn_id: ConnId,
		token: &str,
		author: Participant,
		channel: ChannelId,
		body: String,
		now_ms: u64,
	) {
		let trigger = DirectMessage {
			id: random_message_id(),
			body,
			sender: author,
			recipient: Participant::server(),
			timestamp_ms: now_ms,
			reply_to: None,
		};

		if let Some(session) = self.sessions.get(conn_id) {
			session.send(&[ServerMessage::Direct(trigger.clone())]);
		}
		if let Some(ch) = self.registry.get_mut(&channel) {
			ch.history.push(HistoryEntry::Direct(trigger.clone()));
		}

		let rank = self.directory.rank(token);
		match commands::dispatch(rank, &trigger.body) {
			CommandOutcome::Reply(reply) => {
				self.send_server_dm(conn_id, reply, Some(trigger.id), now_ms);
			}
			CommandOutcome::SetRank { rank, reply } => {
				let modifier = self.directory.set_rank(token, rank);
				if let Err(err) = self.store.save_modifier(token, &modifier).await {
					warn!(%err, "failed to persist modifier");
				}
				if let Some(profile) = self.directory.profile(token).cloned()
					&& let Err(err) = self.store.save_profile(token, &profile).await
				{
					warn!(%err, "failed to persist profile");
				}
				self.send_server_dm(conn_id, reply, Some(trigger.id), now_ms);
			}
		}
	}

	fn handle_direct(
		&mut self,
		conn_id: ConnId,
		recipient: IdentityId,
		message: String,
		reply_to: Option<String>,
		now_ms: u64,
	) {
		let Some(session) = self.sessions.get(conn_id) else {
			return;
		};
		let (Some(token), Some(identity), Some(channel)) =
			(session.token.clone(), session.identity.clone(), session.channel.clone())
		else {
			return;
		};
		// Sender and recipient must share a channel.
		if !self.sessions.identity_in_channel(&recipient, &channel) {
			return;
		}
		let (Some(sender), Some(recipient_profile)) = (
			self.directory.profile(&token).cloned(),
			self.directory.profile_for_identity(&recipient).cloned(),
		) else {
			return;
		};

		let dm = DirectMessage {
			id: random_message_id(),
			body: message,
			sender,
			recipient: recipient_profile,
			timestamp_ms: now_ms,
			reply_to,
		};

		if let Ok(frame) = rondo_protocol::encode_frame(&[ServerMessage::Direct(dm.clone())]) {
			self.sessions.send_to_identity_in(&identity, &channel, &frame);
			if recipient != identity {
				self.sessions.send_to_identity_in(&recipient, &channel, &frame);
			}
		}
		if let Some(ch) = self.registry.get_mut(&channel) {
			ch.history.push(HistoryEntry::Direct(dm));
		}
	}

	fn handle_note(&mut self, conn_id: ConnId, n: String, now_ms: u64) {
		if n.is_empty() {
			return;
		}
		let Some(session) = self.sessions.get_mut(conn_id) else {
			return;
		};
		let (Some(identity), Some(channel)) = (session.identity.clone(), session.channel.clone()) else {
			return;
		};
		if !session.note_quota.spend_at(n.len() as f64, now_ms) {
			metrics::counter!("rondo_quota_rejected_total").increment(1);
			return;
		}

		if let Ok(frame) = rondo_protocol::encode_frame(&[ServerMessage::Note {
			n,
			p: identity,
			t: now_ms,
		}]) {
			self.sessions.broadcast_frame(&channel, &frame, Some(conn_id));
		}
	}

	async fn handle_userset(&mut self, conn_id: ConnId, patch: &ParticipantPatch, now_ms: u64) {
		let Some(session) = self.sessions.get_mut(conn_id) else {
			return;
		};
		let Some(token) = session.token.clone() else {
			return;
		};
		let channel = session.channel.clone();
		if !session.profile_limiter.emit_at(now_ms) {
			metrics::counter!("rondo_rate_limited_total", "kind" => "profile").increment(1);
			return;
		}
		if let Some(color) = &patch.color
			&& !rondo_domain::valid_hex_color(color)
		{
			return;
		}

		let Some(profile) = self.directory.merge_profile(&token, patch).cloned() else {
			return;
		};
		if let Err(err) = self.store.save_profile(&token, &profile).await {
			warn!(%err, "failed to persist profile");
		}

		if let Some(channel) = channel
			&& let Ok(frame) = rondo_protocol::encode_frame(&[ServerMessage::Profile { participant: profile }])
		{
			self.sessions.broadcast_frame(&channel, &frame, None);
		}
	}

	fn handle_subscribe(&mut self, conn_id: ConnId) {
		let viewer_channel = {
			let Some(session) = self.sessions.get_mut(conn_id) else {
				return;
			};
			session.wants_channel_list = true;
			session.channel.clone()
		};

		// Refresh doubles as the registry's garbage collection point.
		let sessions = &self.sessions;
		let removed = self.registry.collect_empty(|id| sessions.occupancy(id));
		if removed > 0 {
			debug!(removed, "collected empty channels");
		}

		let list: Vec<ChannelInfo> = self
			.registry
			.iter()
			.filter(|ch| ch.settings.visible || Some(&ch.id) == viewer_channel.as_ref())
			.map(|ch| ChannelInfo {
				id: ch.id.clone(),
				count: self.sessions.occupancy(&ch.id),
				settings: ch.settings.clone(),
				crown: ch.crown.clone(),
			})
			.collect();

		if let Some(session) = self.sessions.get(conn_id) {
			session.send(&[ServerMessage::ChannelList { c: true, u: list }]);
		}
	}

	fn handle_unsubscribe(&mut self, conn_id: ConnId) {
		if let Some(session) = self.sessions.get_mut(conn_id) {
			session.wants_channel_list = false;
		}
	}

	async fn on_close(&mut self, conn_id: ConnId, now_ms: u64) {
		metrics::gauge!("rondo_connections").decrement(1.0);
		debug!(conn = conn_id, "connection closed");

		let Some(session) = self.sessions.remove(conn_id) else {
			return;
		};
		let Some(token) = session.token else {
			return;
		};

		if let (Some(identity), Some(channel)) = (session.identity, session.channel) {
			self.announce_leave(&identity, &channel, now_ms);
		}

		if let Some(profile) = self.directory.profile(&token).cloned()
			&& let Err(err) = self.store.save_profile(&token, &profile).await
		{
			warn!(%err, "failed to persist profile on close");
		}
	}

	/// Leave-side bookkeeping once an identity may have no connections
	/// left in `channel`: forced crown release, leave presence.
	fn announce_leave(&mut self, identity: &IdentityId, channel: &ChannelId, now_ms: u64) {
		if self.sessions.connections_for_identity_in(identity, channel) > 0 {
			return;
		}

		let pos = self
			.directory
			.profile_for_identity(identity)
			.and_then(|p| Some(rondo_domain::Vector2::new(p.x?, p.y?)));
		let released = self
			.registry
			.get_mut(channel)
			.is_some_and(|ch| ch.release_crown(identity, pos, now_ms));
		if released {
			self.broadcast_channel_update(channel);
		}

		if let Ok(frame) = rondo_protocol::encode_frame(&[ServerMessage::Bye { p: identity.clone() }]) {
			self.sessions.broadcast_frame(channel, &frame, None);
		}
		self.notify_list_subscribers(channel);
	}

	fn channel_info(&self, id: &ChannelId) -> Option<ChannelInfo> {
		let channel = self.registry.get(id)?;
		Some(ChannelInfo {
			id: channel.id.clone(),
			count: self.sessions.occupancy(id),
			settings: channel.settings.clone(),
			crown: channel.crown.clone(),
		})
	}

	fn channel_members(&self, id: &ChannelId) -> Vec<Participant> {
		self.sessions
			.members_of(id)
			.into_iter()
			.filter_map(|identity| self.directory.profile_for_identity(&identity).cloned())
			.collect()
	}

	/// Channel snapshot to every member; the `p` field is personalized
	/// to each recipient's own identity.
	fn broadcast_channel_update(&self, id: &ChannelId) {
		let Some(info) = self.channel_info(id) else {
			return;
		};
		let ppl = self.channel_members(id);

		for session in self.sessions.iter() {
			if session.channel.as_ref() != Some(id) {
				continue;
			}
			let Some(identity) = session.identity.clone() else {
				continue;
			};
			session.send(&[ServerMessage::Channel {
				ch: info.clone(),
				p: identity,
				ppl: ppl.clone(),
			}]);
		}
		self.notify_list_subscribers(id);
	}

	/// Incremental room-list update (`c: false`) pushed to subscribed
	/// sessions whenever a visible channel changes.
	fn notify_list_subscribers(&self, id: &ChannelId) {
		let Some(info) = self.channel_info(id) else {
			return;
		};
		if !info.settings.visible {
			return;
		}
		for session in self.sessions.iter() {
			if session.wants_channel_list {
				session.send(&[ServerMessage::ChannelList {
					c: false,
					u: vec![info.clone()],
				}]);
			}
		}
	}

	/// Direct message from the server participant to one connection,
	/// optionally threaded to the message that triggered it.
	fn send_server_dm(&self, conn_id: ConnId, body: String, reply_to: Option<String>, now_ms: u64) {
		let Some(session) = self.sessions.get(conn_id) else {
			return;
		};
		let Some(recipient) = session
			.token
			.as_deref()
			.and_then(|token| self.directory.profile(token))
			.cloned()
		else {
			return;
		};

		session.send(&[ServerMessage::Direct(DirectMessage {
			id: random_message_id(),
			body,
			sender: Participant::server(),
			recipient,
			timestamp_ms: now_ms,
			reply_to,
		})]);
	}
}
