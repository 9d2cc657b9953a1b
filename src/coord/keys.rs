// Coordination-store key namespace.
//
// Key names and TTLs are part of the external contract and must stay
// byte-stable across versions.

pub const QUEUE_ELO: &str = "queue:elo";
pub const MATCHES_ACTIVE: &str = "matches:active";
pub const BOTS_ACTIVE: &str = "bots:active";
pub const BOTS_DEPLOYED: &str = "bots:deployed";
pub const NEEDS_BOT: &str = "needs_bot";
pub const QUEUED_PLAYERS: &str = "queued_players";
pub const HUMAN_PLAYERS: &str = "human_players";
pub const EVENTS_MATCH: &str = "events:match";
pub const BOTS_COMMANDS: &str = "bots:commands";

pub fn joined_at(player_id: &str) -> String {
    format!("queue:joined_at:{player_id}")
}

pub fn reservation(player_id: &str) -> String {
    format!("queue:reservation:{player_id}")
}

pub fn match_blob(match_id: &str) -> String {
    format!("match:{match_id}")
}

pub fn match_ratings(match_id: &str) -> String {
    format!("match:{match_id}:ratings")
}

pub fn bot_current_match(bot_id: &str) -> String {
    format!("bot:current_match:{bot_id}")
}

pub fn bot_state(bot_id: &str) -> String {
    format!("bots:state:{bot_id}")
}

pub fn match_lock(player_id: &str) -> String {
    format!("lock:match:{player_id}")
}

pub fn submission_cache(match_id: &str, user_id: &str, code_hash: &str) -> String {
    format!("match:{match_id}:{user_id}:submission_cache:{code_hash}")
}

pub fn guest_result(guest_id: &str) -> String {
    format!("guest:match_result:{guest_id}")
}
