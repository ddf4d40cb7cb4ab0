#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use rondo_domain::{
	ChannelId, ChannelSettings, ChannelSettingsPatch, Crown, HistoryEntry, IdentityId, Vector2,
};

/// A live channel: settings, optional crown, append-only history.
/// Occupancy is never stored here; the router recomputes it from the
/// session table.
#[derive(Debug, Clone)]
pub struct Channel {
	pub id: ChannelId,
	pub settings: ChannelSettings,
	pub crown: Option<Crown>,
	pub history: Vec<HistoryEntry>,
}

impl Channel {
	/// Vertical offset applied to the decorative crown drop trajectory.
	const DROP_FALL: f64 = 30.0;

	/// Drop the crown if `holder` currently wears it. The drop records
	/// the holder's last position as the start of the trajectory.
	pub fn release_crown(&mut self, holder: &IdentityId, from: Option<Vector2>, now_ms: u64) -> bool {
		let Some(crown) = &mut self.crown else {
			return false;
		};
		if !crown.is_held_by(holder) {
			return false;
		}

		let start = from.unwrap_or(Vector2::CENTER);
		crown.holder = None;
		crown.start_pos = start;
		crown.end_pos = Vector2::new(start.x, (start.y + Self::DROP_FALL).min(100.0));
		crown.time = now_ms;
		true
	}

	/// Seat `holder` on the crown unconditionally. Callers check policy
	/// (cooldown, rank, presence) first.
	pub fn seat_crown(&mut self, holder: IdentityId, now_ms: u64) -> bool {
		let Some(crown) = &mut self.crown else {
			return false;
		};

		crown.holder = Some(holder);
		crown.time = now_ms;
		true
	}
}

/// All live channels plus the set of permanent lobby ids.
///
/// Channels are created lazily on first join; lobbies are created at
/// startup and never garbage-collected.
#[derive(Debug)]
pub struct ChannelRegistry {
	channels: BTreeMap<ChannelId, Channel>,
	lobbies: Vec<ChannelId>,
}

impl ChannelRegistry {
	pub fn new(lobbies: Vec<ChannelId>) -> Self {
		let mut registry = Self {
			channels: BTreeMap::new(),
			lobbies,
		};

		for id in registry.lobbies.clone() {
			registry.channels.insert(
				id.clone(),
				Channel {
					id,
					settings: ChannelSettings::lobby(),
					crown: None,
					history: Vec::new(),
				},
			);
		}

		registry
	}

	/// Permanent lobbies plus the sequentially numbered auxiliary ones
	/// minted by capacity overflow.
	pub fn is_lobby_id(&self, id: &ChannelId) -> bool {
		self.lobbies.contains(id) || aux_lobby_id(id)
	}

	pub fn get(&self, id: &ChannelId) -> Option<&Channel> {
		self.channels.get(id)
	}

	pub fn get_mut(&mut self, id: &ChannelId) -> Option<&mut Channel> {
		self.channels.get_mut(id)
	}

	pub fn contains(&self, id: &ChannelId) -> bool {
		self.channels.contains_key(id)
	}

	/// Fetch a channel, creating it on first join. A new non-lobby
	/// channel starts with the creator's crown and any settings the
	/// creator supplied; a new lobby gets lobby defaults and no crown.
	pub fn get_or_create(
		&mut self,
		id: &ChannelId,
		creator: &IdentityId,
		set: Option<&ChannelSettingsPatch>,
		now_ms: u64,
	) -> &mut Channel {
		if !self.channels.contains_key(id) {
			let channel = if self.is_lobby_id(id) {
				Channel {
					id: id.clone(),
					settings: ChannelSettings::lobby(),
					crown: None,
					history: Vec::new(),
				}
			} else {
				let mut settings = ChannelSettings::normal();
				if let Some(patch) = set {
					settings.apply(patch);
				}
				Channel {
					id: id.clone(),
					settings,
					crown: Some(Crown::for_creator(creator.clone(), now_ms)),
					history: Vec::new(),
				}
			};
			self.channels.insert(id.clone(), channel);
		}

		self.channels.get_mut(id).expect("just inserted")
	}

	/// Pick a lobby with room to spare, probing `lobby`, `lobby2`,
	/// `lobby3`, ... and minting the first missing one if all existing
	/// lobbies are full. `occupancy` reports live occupancy per channel.
	pub fn probe_lobby(&mut self, occupancy: impl Fn(&ChannelId) -> usize, now_ms: u64) -> ChannelId {
		let creator = IdentityId::server();
		for n in 1usize.. {
			let name = if n == 1 { "lobby".to_string() } else { format!("lobby{n}") };
			let id = ChannelId::new(name).expect("lobby ids are non-empty");
			let channel = self.get_or_create(&id, &creator, None, now_ms);
			if occupancy(&id) < channel.settings.limit as usize {
				return id;
			}
		}
		unreachable!("lobby probe always terminates at the first minted lobby")
	}

	/// Drop every non-lobby channel with zero occupancy, history
	/// included. Runs on room-list subscription refresh.
	pub fn collect_empty(&mut self, occupancy: impl Fn(&ChannelId) -> usize) -> usize {
		let before = self.channels.len();
		let lobbies = std::mem::take(&mut self.lobbies);
		self.channels
			.retain(|id, _| lobbies.contains(id) || aux_lobby_id(id) || occupancy(id) > 0);
		self.lobbies = lobbies;
		before - self.channels.len()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Channel> {
		self.channels.values()
	}
}

/// Auxiliary lobby ids: `lobby` followed by digits only.
fn aux_lobby_id(id: &ChannelId) -> bool {
	id.as_str()
		.strip_prefix("lobby")
		.is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}
