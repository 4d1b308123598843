// regexp.rs — Anchored incremental token matching
//
// Tailored for grammar look-ahead tokens: matching is anchored at the start
// of the fed data, supports pattern sets with caller-assigned IDs, and works
// chunk by chunk so a parser can suspend mid-token. Built on a dense DFA
// stepped one byte at a time; capture groups are not supported.
//
// `advance` reports one of three outcomes, mirroring the classic token
// matcher contract: a positive pattern ID once the longest match is decided,
// zero when no match can ever occur, and a negative value when the decision
// needs more input.

use regex_automata::dfa::{dense, Automaton, StartKind};
use regex_automata::util::primitives::StateID;
use regex_automata::util::start;
use regex_automata::{Anchored, MatchKind};

use crate::error::{RuntimeError, UsageError};

// ── Compiled pattern set ─────────────────────────────────────────────────

/// A compiled, anchored pattern set. Single patterns get ID 1.
#[derive(Debug, Clone)]
pub struct RegExp {
    dfa: dense::DFA<Vec<u32>>,
    ids: Vec<i32>,
    patterns: Vec<String>,
}

impl RegExp {
    pub fn new(pattern: &str) -> Result<Self, RuntimeError> {
        Self::new_set(&[(pattern, 1)])
    }

    /// Compile a set of `(pattern, id)` pairs. IDs must be positive; on a
    /// match the winning pattern's ID is reported.
    pub fn new_set(patterns: &[(&str, i32)]) -> Result<Self, RuntimeError> {
        let exprs: Vec<&str> = patterns.iter().map(|(p, _)| *p).collect();
        let dfa = dense::Builder::new()
            .configure(
                dense::Config::new()
                    .start_kind(StartKind::Anchored)
                    .match_kind(MatchKind::All),
            )
            .build_many(&exprs)
            .map_err(|e| RuntimeError::PatternError(e.to_string()))?;
        Ok(Self {
            dfa,
            ids: patterns.iter().map(|(_, id)| *id).collect(),
            patterns: exprs.iter().map(|p| p.to_string()).collect(),
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn state(&self) -> Result<MatchState, RuntimeError> {
        MatchState::new(self)
    }
}

// ── Incremental match state ──────────────────────────────────────────────

/// Result of one `advance` call: the match verdict plus how many bytes of
/// the fed chunk were consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    /// `> 0`: pattern ID of the decided match. `0`: no match, definitive.
    /// `< 0`: undecided, feed more data.
    pub rc: i32,
    /// Bytes of this chunk consumed by the token (the rest stays in the
    /// input for the next grammar element).
    pub consumed: usize,
}

#[derive(Debug, Clone)]
pub struct MatchState {
    re: RegExp,
    state: StateID,
    /// Absolute position across all chunks fed so far.
    position: u64,
    /// Longest match found so far: (pattern id, absolute end offset).
    last_match: Option<(i32, u64)>,
    done: bool,
}

impl MatchState {
    pub fn new(re: &RegExp) -> Result<Self, RuntimeError> {
        let cfg = start::Config::new().anchored(Anchored::Yes);
        let state = re
            .dfa
            .start_state(&cfg)
            .map_err(|e| RuntimeError::PatternError(e.to_string()))?;
        Ok(Self {
            re: re.clone(),
            state,
            position: 0,
            last_match: None,
            done: false,
        })
    }

    /// Feed the next chunk. `last` marks the final chunk (frozen stream);
    /// after a decision has been returned, further calls are a usage error.
    pub fn advance(&mut self, data: &[u8], last: bool) -> Result<Advance, UsageError> {
        if self.done {
            return Err(UsageError::MatchStateReuse);
        }

        let entry = self.position;
        let dfa = &self.re.dfa;

        for &byte in data {
            self.state = dfa.next_state(self.state, byte);
            self.position += 1;
            if dfa.is_match_state(self.state) {
                // Dense DFA matches are delayed by one byte: the match ended
                // just before the byte we fed.
                let id = self.match_id();
                self.last_match = Some((id, self.position - 1));
            } else if dfa.is_dead_state(self.state) {
                return Ok(self.decide(entry, data.len()));
            } else if dfa.is_quit_state(self.state) {
                return Ok(self.decide(entry, data.len()));
            }
        }

        // A recorded match is final once no byte can extend it.
        if self.last_match.is_some() && self.no_extension_possible() {
            return Ok(self.decide(entry, data.len()));
        }

        if last {
            let eoi = dfa.next_eoi_state(self.state);
            if dfa.is_match_state(eoi) {
                let id = self.re.ids[dfa.match_pattern(eoi, 0).as_usize()];
                self.last_match = Some((id, self.position));
            }
            return Ok(self.decide(entry, data.len()));
        }

        Ok(Advance {
            rc: -1,
            consumed: data.len(),
        })
    }

    fn match_id(&self) -> i32 {
        self.re.ids[self.re.dfa.match_pattern(self.state, 0).as_usize()]
    }

    /// True when every byte transition from the current state is dead, so
    /// no longer match can ever be found.
    fn no_extension_possible(&self) -> bool {
        let dfa = &self.re.dfa;
        (0..=255u8).all(|b| dfa.is_dead_state(dfa.next_state(self.state, b)))
    }

    fn decide(&mut self, entry: u64, chunk_len: usize) -> Advance {
        self.done = true;
        match self.last_match {
            Some((id, end)) => Advance {
                rc: id,
                consumed: (end.saturating_sub(entry) as usize).min(chunk_len),
            },
            None => Advance {
                rc: 0,
                consumed: 0,
            },
        }
    }
}
