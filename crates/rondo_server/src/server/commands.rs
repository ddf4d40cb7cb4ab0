#![forbid(unsafe_code)]

use rondo_domain::Rank;

/// Chat bodies starting with this prefix route to the dispatcher
/// instead of broadcasting.
pub const COMMAND_PREFIX: char = '^';

/// What the router should do after dispatching a command. Every
/// outcome carries a reply body; replies are delivered as a server
/// direct message threaded to the triggering message.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
	Reply(String),
	SetRank { rank: Rank, reply: String },
}

struct Command {
	name: &'static str,
	aliases: &'static [&'static str],
	min_rank: Rank,
	run: fn(Rank, &str) -> CommandOutcome,
}

// `setrank` is open to everyone because it can only lower (or keep)
// the caller's own rank; everything else needs an operator.
const COMMANDS: &[Command] = &[
	Command {
		name: "rank",
		aliases: &[],
		min_rank: Rank::ADMIN,
		run: cmd_rank,
	},
	Command {
		name: "setrank",
		aliases: &[],
		min_rank: Rank::MEMBER,
		run: cmd_setrank,
	},
];

/// Dispatch a `^`-prefixed chat body for a caller of the given rank.
pub fn dispatch(caller_rank: Rank, body: &str) -> CommandOutcome {
	let stripped = body.strip_prefix(COMMAND_PREFIX).unwrap_or(body).trim_start();
	let name = stripped.split_whitespace().next().unwrap_or("");
	let input = stripped[name.len()..].trim();

	let Some(command) = COMMANDS.iter().find(|c| c.name == name || c.aliases.contains(&name)) else {
		return CommandOutcome::Reply("This command doesn't exist.".to_string());
	};

	if caller_rank < command.min_rank {
		return CommandOutcome::Reply("You don't have permission to use that command.".to_string());
	}

	(command.run)(caller_rank, input)
}

fn cmd_rank(caller_rank: Rank, _input: &str) -> CommandOutcome {
	CommandOutcome::Reply(format!("Your current rank is: `{caller_rank}`."))
}

fn cmd_setrank(caller_rank: Rank, input: &str) -> CommandOutcome {
	let Ok(requested) = input.parse::<i64>() else {
		return CommandOutcome::Reply(format!("```{input}``` is not a valid number."));
	};
	let Some(rank) = Rank::parse(requested) else {
		return CommandOutcome::Reply(format!("`{input}` is not a valid rank."));
	};
	if rank > caller_rank {
		return CommandOutcome::Reply("You cannot set yourself to a higher rank.".to_string());
	}

	CommandOutcome::SetRank {
		rank,
		reply: format!("Your rank has been set to `{rank}`."),
	}
}
