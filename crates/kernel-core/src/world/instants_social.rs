//! Chat, boards, signs, switches, projections and agent memory.

use super::*;
use super::work::summarize;
use crate::config::{RATE_POST_BOARD, RATE_SAY, RATE_SAY_MARKET, RATE_WHISPER};

const CHAT_MAX_CHARS: usize = 500;
const SIGN_MAX_CHARS: usize = 200;
const POST_TITLE_MAX_CHARS: usize = 80;
const POST_BODY_MAX_CHARS: usize = 2000;
const SEARCH_DEFAULT_LIMIT: usize = 20;
const SEARCH_MAX_LIMIT: usize = 50;
const MEMORY_BUDGET_BYTES: usize = 64 * 1024;
const MEMORY_DEFAULT_LIMIT: usize = 64;
const MEMORY_MAX_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Local,
    City,
    Market,
}

impl Channel {
    fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            None | Some("") | Some("LOCAL") => Some(Channel::Local),
            Some("CITY") => Some(Channel::City),
            Some("MARKET") => Some(Channel::Market),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Channel::Local => "LOCAL",
            Channel::City => "CITY",
            Channel::Market => "MARKET",
        }
    }
}

/// Clamps a client limit into `1..=max`, using `default` when absent or non-positive.
fn clamp_limit(raw: Option<i64>, default: usize, max: usize) -> usize {
    match raw {
        Some(n) if n > 0 => usize::try_from(n).unwrap_or(max).min(max),
        _ => default,
    }
}

/// Case-insensitive substring match over title and body, in board order (newest first).
pub(super) fn match_posts<'a>(posts: &'a [BoardPost], query: &str, limit: usize) -> Vec<&'a BoardPost> {
    let needle = query.to_lowercase();
    posts
        .iter()
        .filter(|post| {
            post.title.to_lowercase().contains(&needle) || post.body.to_lowercase().contains(&needle)
        })
        .take(limit)
        .collect()
}

pub(super) fn post_view(post: &BoardPost) -> contracts::BoardPostView {
    contracts::BoardPostView {
        post_id: post.post_id.clone(),
        author: post.author.clone(),
        title: post.title.clone(),
        summary: summarize(&post.body),
        tick: post.tick,
    }
}

impl VoxelWorld {
    pub(super) fn instant_say(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let text = required(&req.text, "text")?;
        if text.chars().count() > CHAT_MAX_CHARS {
            return Err(Reject::bad_request("text too long"));
        }
        let channel = Channel::parse(req.channel.as_deref())
            .ok_or_else(|| Reject::bad_request("invalid channel"))?;
        let from_pos = self
            .agent_pos(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        let org_id = match channel {
            Channel::City => Some(self.member_org(agent_id)?),
            Channel::Market => {
                if !self.config.capabilities.allow_trade {
                    return Err(Reject::new(ErrorCode::NoPermission, "market disabled in this world"));
                }
                if !self.local_rules(agent_id, from_pos).can_trade {
                    return Err(Reject::new(ErrorCode::NoPermission, "market chat not allowed here"));
                }
                None
            }
            Channel::Local => None,
        };
        let rate_kind = if channel == Channel::Market { RATE_SAY_MARKET } else { RATE_SAY };
        self.check_rate(agent_id, rate_kind)?;

        let listeners: Vec<String> = self
            .agents
            .values()
            .filter(|agent| match channel {
                Channel::Local => agent.pos.manhattan(from_pos) <= CHAT_RANGE,
                Channel::City => org_id
                    .as_ref()
                    .and_then(|org_id| self.orgs.get(org_id))
                    .map(|org| org.members.contains_key(&agent.id))
                    .unwrap_or(false),
                Channel::Market => true,
            })
            .map(|agent| agent.id.clone())
            .collect();
        let event = Event::Chat {
            t: self.tick,
            from: agent_id.to_string(),
            channel: channel.as_str().to_string(),
            text: text.to_string(),
        };
        for listener in listeners {
            self.emit(&listener, event.clone());
        }
        Ok(ActionResultEvent::ok(self.tick, &req.id))
    }

    pub(super) fn instant_whisper(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        self.check_rate(agent_id, RATE_WHISPER)?;
        let to = required(&req.to, "to")?;
        let text = required(&req.text, "text")?;
        if text.chars().count() > CHAT_MAX_CHARS {
            return Err(Reject::bad_request("text too long"));
        }
        let (Some(from_pos), Some(to_pos)) = (self.agent_pos(agent_id), self.agent_pos(to)) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "target not found"));
        };
        if from_pos.manhattan(to_pos) > CHAT_RANGE {
            return Err(Reject::new(ErrorCode::Blocked, "target out of range"));
        }
        self.emit(
            to,
            Event::Whisper {
                t: self.tick,
                from: agent_id.to_string(),
                text: text.to_string(),
            },
        );
        Ok(ActionResultEvent::ok(self.tick, &req.id))
    }

    /// Resolves a physical board id the agent can reach.
    fn reachable_board(&self, agent_id: &str, raw_id: &str) -> Result<Vec3, Reject> {
        let (kind, pos) =
            parse_positional_id(raw_id).ok_or_else(|| Reject::bad_request("invalid board target"))?;
        if kind != "BULLETIN_BOARD" {
            return Err(Reject::bad_request("invalid board target"));
        }
        if self.block_name_at(pos) != "BULLETIN_BOARD" {
            return Err(Reject::new(ErrorCode::InvalidTarget, "bulletin board not found"));
        }
        if !self.within_interact(agent_id, pos) {
            return Err(Reject::new(ErrorCode::Blocked, "too far"));
        }
        Ok(pos)
    }

    pub(super) fn instant_post_board(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        self.check_rate(agent_id, RATE_POST_BOARD)?;
        let board_id = match required(&req.board_id, "board_id") {
            Ok(id) => id,
            Err(_) => required(&req.target_id, "board_id")?,
        };
        let title = required(&req.title, "title")?;
        let body = required(&req.body, "body")?;
        if title.chars().count() > POST_TITLE_MAX_CHARS {
            return Err(Reject::bad_request("title too long"));
        }
        if body.chars().count() > POST_BODY_MAX_CHARS {
            return Err(Reject::bad_request("body too long"));
        }
        let pos = self.reachable_board(agent_id, board_id)?;
        if !self.local_rules(agent_id, pos).can_trade {
            self.record_denied();
            return Err(Reject::new(ErrorCode::NoPermission, "posting not allowed here"));
        }
        self.ensure_block_entity(pos, "BULLETIN_BOARD", 0);
        let post_id = Self::next_id(&mut self.counters.next_post, "P");
        let now = self.tick;
        let Some(board) = self.boards.get_mut(&pos) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "bulletin board not found"));
        };
        board.posts.insert(
            0,
            BoardPost {
                post_id: post_id.clone(),
                author: agent_id.to_string(),
                title: title.to_string(),
                body: body.to_string(),
                tick: now,
            },
        );
        let board_id = board.id.clone();
        self.audit(
            "BOARD_POST",
            agent_id,
            Some(pos),
            "POST_BOARD",
            json!({"board_id": board_id, "post_id": post_id, "title": title}),
        );
        let mut result = ActionResultEvent::ok(now, &req.id);
        result.post_id = Some(post_id);
        Ok(result)
    }

    pub(super) fn instant_search_board(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let board_id = match required(&req.board_id, "board_id") {
            Ok(id) => id,
            Err(_) => required(&req.target_id, "board_id")?,
        };
        let query = match required(&req.query, "query") {
            Ok(query) => query,
            Err(_) => required(&req.text, "query")?,
        };
        let limit = clamp_limit(req.limit, SEARCH_DEFAULT_LIMIT, SEARCH_MAX_LIMIT);
        let pos = self.reachable_board(agent_id, board_id)?;
        self.ensure_block_entity(pos, "BULLETIN_BOARD", 0);
        let Some(board) = self.boards.get(&pos) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "board not found"));
        };
        let event = Event::BoardSearch {
            t: self.tick,
            board_id: board.id.clone(),
            query: query.to_string(),
            total_posts: board.posts.len(),
            results: match_posts(&board.posts, query, limit)
                .into_iter()
                .map(post_view)
                .collect(),
        };
        self.emit(agent_id, event);
        Ok(ActionResultEvent::ok(self.tick, &req.id))
    }

    pub(super) fn instant_set_sign(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let target = required(&req.target_id, "target_id")?;
        let (kind, pos) =
            parse_positional_id(target).ok_or_else(|| Reject::bad_request("invalid sign target"))?;
        if kind != "SIGN" {
            return Err(Reject::bad_request("invalid sign target"));
        }
        if self.block_name_at(pos) != "SIGN" {
            return Err(Reject::new(ErrorCode::InvalidTarget, "sign not found"));
        }
        if !self.within_interact(agent_id, pos) {
            return Err(Reject::new(ErrorCode::Blocked, "too far"));
        }
        let text = req.text.clone().unwrap_or_default();
        if text.chars().count() > SIGN_MAX_CHARS {
            return Err(Reject::bad_request("text too large"));
        }
        if let Err(reject) = self.require_build(agent_id, pos) {
            self.adjust_rep(agent_id, RepField::Law, -1);
            return Err(reject);
        }
        self.ensure_block_entity(pos, "SIGN", 0);
        let now = self.tick;
        let Some(sign) = self.signs.get_mut(&pos) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "sign not found"));
        };
        sign.text = text.clone();
        sign.updated_by = Some(agent_id.to_string());
        sign.updated_tick = now;
        let sign_id = sign.id.clone();
        self.audit(
            "SIGN_SET",
            agent_id,
            Some(pos),
            "SET_SIGN",
            json!({"sign_id": sign_id, "text": text, "text_length": text.len()}),
        );
        self.emit(
            agent_id,
            Event::Sign {
                t: now,
                sign_id,
                pos: pos.to_array(),
                text,
                updated_by: Some(agent_id.to_string()),
            },
        );
        Ok(ActionResultEvent::ok(now, &req.id))
    }

    pub(super) fn instant_toggle_switch(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let target = required(&req.target_id, "target_id")?;
        let (kind, pos) = self
            .resolve_block_entity(target)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "switch not found"))?;
        if kind != "SWITCH" {
            return Err(Reject::bad_request("invalid switch target"));
        }
        if !self.within_interact(agent_id, pos) {
            return Err(Reject::new(ErrorCode::Blocked, "too far"));
        }
        self.require_build(agent_id, pos)?;
        let Some(switch) = self.switches.get_mut(&pos) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "switch not found"));
        };
        switch.on = !switch.on;
        let (switch_id, on) = (switch.id.clone(), switch.on);
        self.audit(
            "SWITCH_TOGGLE",
            agent_id,
            Some(pos),
            "TOGGLE_SWITCH",
            json!({"switch_id": switch_id, "on": on}),
        );
        self.emit(
            agent_id,
            Event::Switch {
                t: self.tick,
                switch_id,
                pos: pos.to_array(),
                on,
            },
        );
        Ok(ActionResultEvent::ok(self.tick, &req.id))
    }

    pub(super) fn instant_open(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let target = required(&req.target_id, "target_id")?;
        self.project_open(agent_id, target)?;
        Ok(ActionResultEvent::ok(self.tick, &req.id))
    }

    pub(super) fn instant_save_memory(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let key = required(&req.key, "key")?;
        let value = req.value.clone().unwrap_or_default();
        let now = self.tick;
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        let replaced = agent
            .memory
            .get(key)
            .map(|entry| key.len() + entry.value.len())
            .unwrap_or(0);
        if agent.memory_bytes() - replaced + key.len() + value.len() > MEMORY_BUDGET_BYTES {
            return Err(Reject::new(ErrorCode::NoResource, "memory budget exceeded"));
        }
        let expiry_tick = match req.ttl_ticks {
            Some(ttl) if ttl > 0 => now + ttl,
            _ => 0,
        };
        agent
            .memory
            .insert(key.to_string(), MemoryEntry { value, expiry_tick });
        Ok(ActionResultEvent::ok(now, &req.id))
    }

    /// Loads matching keys into the next observation, dropping expired entries on the way.
    pub(super) fn instant_list_memory(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let prefix = req.prefix.clone().unwrap_or_default();
        let limit = clamp_limit(req.limit, MEMORY_DEFAULT_LIMIT, MEMORY_MAX_LIMIT);
        let now = self.tick;
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        agent
            .memory
            .retain(|_, entry| entry.expiry_tick == 0 || now < entry.expiry_tick);
        let entries: Vec<contracts::MemoryKv> = agent
            .memory
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .take(limit)
            .map(|(key, entry)| contracts::MemoryKv {
                key: key.clone(),
                value: entry.value.clone(),
                expiry_tick: (entry.expiry_tick != 0).then_some(entry.expiry_tick),
            })
            .collect();
        let loaded = entries.len();
        self.sessions
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentSession::new(false))
            .pending_memory = entries;
        let mut result = ActionResultEvent::ok(now, &req.id);
        result.message = Some(format!("loaded {loaded} keys"));
        Ok(result)
    }
}

#[cfg(test)]
mod social_tests {
    use super::*;

    fn post(id: &str, title: &str, body: &str) -> BoardPost {
        BoardPost {
            post_id: id.to_string(),
            author: "A000001".to_string(),
            title: title.to_string(),
            body: body.to_string(),
            tick: 1,
        }
    }

    #[test]
    fn search_is_case_insensitive_and_limited() {
        let posts = vec![
            post("P000003", "Iron wanted", "paying copper"),
            post("P000002", "Selling bread", "fresh IRON tools too"),
            post("P000001", "Hello", "nothing here"),
        ];
        let hits = match_posts(&posts, "iron", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].post_id, "P000003");
        assert_eq!(match_posts(&posts, "IRON", 1).len(), 1);
        assert!(match_posts(&posts, "diamond", 10).is_empty());
    }

    #[test]
    fn limits_fall_back_and_cap() {
        assert_eq!(clamp_limit(None, 20, 50), 20);
        assert_eq!(clamp_limit(Some(0), 20, 50), 20);
        assert_eq!(clamp_limit(Some(500), 20, 50), 50);
        assert_eq!(clamp_limit(Some(7), 64, 256), 7);
    }

    #[test]
    fn channels_default_to_local() {
        assert_eq!(Channel::parse(None), Some(Channel::Local));
        assert_eq!(Channel::parse(Some(" market ")), Some(Channel::Market));
        assert_eq!(Channel::parse(Some("SHOUT")), None);
    }
}
