#![forbid(unsafe_code)]

use std::collections::HashMap;

use rondo_domain::{IdentityId, Participant, ParticipantModifier, ParticipantPatch, Rank};

/// Token-keyed registry of durable participant state.
///
/// One token maps to one profile and one modifier; every connection
/// presenting the same token shares them. Loaded from the store at
/// startup, mutated in memory, written through by the router.
#[derive(Debug, Default)]
pub struct Directory {
	profiles: HashMap<String, Participant>,
	modifiers: HashMap<String, ParticipantModifier>,
}

impl Directory {
	pub fn new(profiles: HashMap<String, Participant>, modifiers: HashMap<String, ParticipantModifier>) -> Self {
		Self { profiles, modifiers }
	}

	/// Look up the profile for a token, creating a fresh anonymous one
	/// bound to `identity` when the token is new.
	pub fn bind(&mut self, token: &str, identity: IdentityId) -> &Participant {
		let tag = self.modifiers.get(token).and_then(|m| m.rank.tag());
		self.profiles.entry(token.to_string()).or_insert_with(|| {
			let mut profile = Participant::anonymous(identity);
			profile.tag = tag;
			profile
		})
	}

	pub fn profile(&self, token: &str) -> Option<&Participant> {
		self.profiles.get(token)
	}

	pub fn profile_for_identity(&self, identity: &IdentityId) -> Option<&Participant> {
		self.profiles.values().find(|p| &p.id == identity)
	}

	/// Apply a profile patch and return the updated profile. The rank
	/// tag is re-derived from the current rank, never from the patch.
	pub fn merge_profile(&mut self, token: &str, patch: &ParticipantPatch) -> Option<&Participant> {
		let rank = self.rank(token);
		let profile = self.profiles.get_mut(token)?;
		profile.merge(patch);
		profile.tag = rank.tag();
		Some(profile)
	}

	/// Cache a participant's last cursor position.
	pub fn set_position(&mut self, token: &str, x: f64, y: f64) {
		if let Some(profile) = self.profiles.get_mut(token) {
			profile.x = Some(x);
			profile.y = Some(y);
		}
	}

	pub fn modifier(&self, token: &str) -> ParticipantModifier {
		self.modifiers.get(token).copied().unwrap_or_default()
	}

	pub fn rank(&self, token: &str) -> Rank {
		self.modifier(token).rank
	}

	/// Assign a rank, refreshing the profile's derived tag.
	pub fn set_rank(&mut self, token: &str, rank: Rank) -> ParticipantModifier {
		let modifier = self.modifiers.entry(token.to_string()).or_default();
		modifier.rank = rank;
		let modifier = *modifier;

		if let Some(profile) = self.profiles.get_mut(token) {
			profile.tag = rank.tag();
		}

		modifier
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bind_creates_once_and_reuses() {
		let mut dir = Directory::default();
		let id = IdentityId::random();

		let name = dir.bind("tok", id.clone()).name.clone();
		assert_eq!(name, "Anonymous");

		dir.merge_profile(
			"tok",
			&ParticipantPatch {
				name: Some("grace".to_string()),
				..Default::default()
			},
		);

		// same token keeps the merged profile
		assert_eq!(dir.bind("tok", IdentityId::random()).name, "grace");
		assert_eq!(dir.bind("tok", IdentityId::random()).id, id);
	}

	#[test]
	fn set_rank_refreshes_tag() {
		let mut dir = Directory::default();
		dir.bind("tok", IdentityId::random());

		dir.set_rank("tok", Rank::ADMIN);
		assert_eq!(dir.profile("tok").unwrap().tag.as_ref().unwrap().text, "ADMIN");
		assert_eq!(dir.rank("tok"), Rank::ADMIN);

		dir.set_rank("tok", Rank::MEMBER);
		assert!(dir.profile("tok").unwrap().tag.is_none());
	}

	#[test]
	fn profile_reverse_lookup() {
		let mut dir = Directory::default();
		let id = dir.bind("tok", IdentityId::random()).id.clone();
		assert_eq!(dir.profile_for_identity(&id).unwrap().id, id);
		assert!(dir.profile_for_identity(&IdentityId::random()).is_none());
	}
}
