use serde::Serialize;
use std::collections::HashMap;

use crate::api::types::EmailId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Open,
    Generate,
    Send,
}

impl OpKind {
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Open => "open",
            OpKind::Generate => "generate",
            OpKind::Send => "send",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(OpKind::Open),
            "generate" | "generate_draft" => Some(OpKind::Generate),
            "send" => Some(OpKind::Send),
            _ => None,
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Generation counter for one (email, kind) pair. Only the most recently
/// issued token may change state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct OpToken(u64);

impl OpToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpPhase {
    Idle,
    Pending,
    Applied,
    Discarded,
    Failed(String),
}

/// What happened to one response when it reached the apply step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Applied,
    Discarded,
    Failed,
}

#[derive(Debug)]
struct OpSlot {
    latest: OpToken,
    phase: OpPhase,
}

/// Per-(email, kind) state machines: `Idle -> Pending -> {Applied, Discarded, Failed}`.
///
/// A response whose token is not the latest issued for its pair is stale; it
/// never moves the machine, whatever phase the machine is in.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    slots: HashMap<(EmailId, OpKind), OpSlot>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new request for `(id, kind)`, superseding any outstanding one.
    pub fn issue(&mut self, id: &EmailId, kind: OpKind) -> OpToken {
        let slot = self
            .slots
            .entry((id.clone(), kind))
            .or_insert(OpSlot {
                latest: OpToken(0),
                phase: OpPhase::Idle,
            });
        slot.latest = OpToken(slot.latest.0 + 1);
        slot.phase = OpPhase::Pending;
        log::debug!("[Sequencer] issued {} #{} for email {}", kind, slot.latest.0, id);
        slot.latest
    }

    /// Whether a response carrying `token` may be applied.
    pub fn admit(&self, id: &EmailId, kind: OpKind, token: OpToken) -> bool {
        match self.slots.get(&(id.clone(), kind)) {
            Some(slot) => slot.latest == token && slot.phase == OpPhase::Pending,
            None => false,
        }
    }

    /// Move the machine out of Pending. Ignored for stale tokens.
    pub fn resolve(&mut self, id: &EmailId, kind: OpKind, token: OpToken, phase: OpPhase) {
        if let Some(slot) = self.slots.get_mut(&(id.clone(), kind)) {
            if slot.latest == token && slot.phase == OpPhase::Pending {
                slot.phase = phase;
            }
        }
    }

    pub fn phase(&self, id: &EmailId, kind: OpKind) -> OpPhase {
        self.slots
            .get(&(id.clone(), kind))
            .map(|slot| slot.phase.clone())
            .unwrap_or(OpPhase::Idle)
    }

    pub fn is_pending(&self, id: &EmailId, kind: OpKind) -> bool {
        self.phase(id, kind) == OpPhase::Pending
    }

    pub fn any_pending(&self) -> bool {
        self.slots.values().any(|slot| slot.phase == OpPhase::Pending)
    }

    /// Failed machines, ordered by email then kind.
    pub fn failures(&self) -> Vec<(EmailId, OpKind, String)> {
        let mut out: Vec<_> = self
            .slots
            .iter()
            .filter_map(|((id, kind), slot)| match &slot.phase {
                OpPhase::Failed(msg) => Some((id.clone(), *kind, msg.clone())),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EmailId {
        EmailId::from(s)
    }

    #[test]
    fn test_unknown_pair_is_idle() {
        let seq = RequestSequencer::new();
        assert_eq!(seq.phase(&id("1"), OpKind::Open), OpPhase::Idle);
        assert!(!seq.admit(&id("1"), OpKind::Open, OpToken(1)));
        assert!(!seq.any_pending());
    }

    #[test]
    fn test_tokens_increase_per_pair() {
        let mut seq = RequestSequencer::new();
        let a1 = seq.issue(&id("1"), OpKind::Open);
        let a2 = seq.issue(&id("1"), OpKind::Open);
        let g1 = seq.issue(&id("1"), OpKind::Generate);
        let b1 = seq.issue(&id("2"), OpKind::Open);

        assert!(a2 > a1);
        assert_eq!(g1.value(), 1);
        assert_eq!(b1.value(), 1);
        assert!(seq.admit(&id("1"), OpKind::Open, a2));
        assert!(!seq.admit(&id("1"), OpKind::Open, a1));
    }

    #[test]
    fn test_stale_token_is_not_admitted_and_cannot_resolve() {
        let mut seq = RequestSequencer::new();
        let t1 = seq.issue(&id("1"), OpKind::Generate);
        let t2 = seq.issue(&id("1"), OpKind::Generate);

        assert!(!seq.admit(&id("1"), OpKind::Generate, t1));
        assert!(seq.admit(&id("1"), OpKind::Generate, t2));

        seq.resolve(&id("1"), OpKind::Generate, t1, OpPhase::Failed("late".into()));
        assert_eq!(seq.phase(&id("1"), OpKind::Generate), OpPhase::Pending);

        seq.resolve(&id("1"), OpKind::Generate, t2, OpPhase::Applied);
        assert_eq!(seq.phase(&id("1"), OpKind::Generate), OpPhase::Applied);

        // Once settled, even the latest token is not admitted again.
        assert!(!seq.admit(&id("1"), OpKind::Generate, t2));
    }

    #[test]
    fn test_kinds_are_independent() {
        let mut seq = RequestSequencer::new();
        let open = seq.issue(&id("1"), OpKind::Open);
        seq.issue(&id("1"), OpKind::Send);
        seq.resolve(&id("1"), OpKind::Open, open, OpPhase::Applied);

        assert!(seq.is_pending(&id("1"), OpKind::Send));
        assert!(!seq.is_pending(&id("1"), OpKind::Open));
        assert!(seq.any_pending());
    }

    #[test]
    fn test_failures_listed_until_reissued() {
        let mut seq = RequestSequencer::new();
        let t = seq.issue(&id("2"), OpKind::Send);
        seq.resolve(&id("2"), OpKind::Send, t, OpPhase::Failed("HTTP 500".into()));
        let t = seq.issue(&id("1"), OpKind::Generate);
        seq.resolve(&id("1"), OpKind::Generate, t, OpPhase::Failed("timeout".into()));

        let failures = seq.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, id("1"));
        assert_eq!(failures[1].1, OpKind::Send);

        seq.issue(&id("2"), OpKind::Send);
        assert_eq!(seq.failures().len(), 1);
    }

    #[test]
    fn test_kind_labels_round_trip() {
        for kind in [OpKind::Open, OpKind::Generate, OpKind::Send] {
            assert_eq!(OpKind::parse(kind.label()), Some(kind));
        }
        assert_eq!(OpKind::parse("generate_draft"), Some(OpKind::Generate));
        assert_eq!(OpKind::parse("delete"), None);
    }
}
