//! Local engagement state of one view instance.
//!
//! The displayed counters are the last authoritative values plus every
//! pending optimistic delta. Authoritative values arrive from mutation
//! responses and from re-reads; each is stamped with the ticket taken when
//! its request was issued, and a value older than the one already applied
//! to the same slot is discarded. Nothing here performs I/O: the
//! [`EngagementView`](super::engagement::EngagementView) drives it.

use std::collections::{HashMap, HashSet};

use crate::model::{ActionKind, Comment, CounterKind, CounterSet, EdgeKind, MemberRole, Target};

/// Monotonic per-view request stamp.
pub type Ticket = u64;

/// Identity of an in-flight mutation for the busy guard. Both directions of
/// one edge share a key so follow and unfollow cannot overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKey {
    Edge(EdgeKind),
    Action(ActionKind),
}

impl GuardKey {
    pub fn for_action(kind: ActionKind) -> Self {
        match kind.edge() {
            Some(edge) => GuardKey::Edge(edge),
            None => GuardKey::Action(kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Counter(CounterKind),
    Edge(EdgeKind),
    Comments,
}

#[derive(Debug, Clone)]
struct Pending {
    id: u64,
    kind: ActionKind,
    comment_id: Option<String>,
}

/// Why an action was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The edge is already in the state the action would produce.
    AlreadyApplied,
    /// A mutation with the same guard key is still outstanding.
    Busy,
}

/// A started action: settle it with exactly one of
/// [`ViewState::settle_success`] or [`ViewState::settle_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    pub pending_id: u64,
    pub ticket: Ticket,
    pub kind: ActionKind,
}

/// What one authoritative read (or mutation response) reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub counters: Vec<(CounterKind, u64)>,
    pub edges: Vec<(EdgeKind, bool)>,
    pub comments: Option<Vec<Comment>>,
    /// Membership role. Only applied together with a membership edge.
    pub role: Option<MemberRole>,
}

impl Observation {
    pub fn counter(mut self, kind: CounterKind, value: u64) -> Self {
        self.counters.push((kind, value));
        self
    }

    pub fn edge(mut self, kind: EdgeKind, present: bool) -> Self {
        self.edges.push((kind, present));
        self
    }

    pub fn comments(mut self, comments: Vec<Comment>) -> Self {
        self.comments = Some(comments);
        self
    }

    pub fn role(mut self, role: Option<MemberRole>) -> Self {
        self.role = role;
        self
    }
}

/// Immutable copy of what a view should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngagementSnapshot {
    pub target: Target,
    pub counters: CounterSet,
    pub has_liked: bool,
    pub is_following: bool,
    pub is_member: bool,
    pub role: Option<MemberRole>,
    pub comments: Vec<Comment>,
    pub in_flight: Vec<ActionKind>,
    pub animating: bool,
    pub error: Option<String>,
    /// At least one authoritative read has been applied.
    pub loaded: bool,
}

impl EngagementSnapshot {
    pub fn is_busy(&self, kind: ActionKind) -> bool {
        let key = GuardKey::for_action(kind);
        self.in_flight.iter().any(|k| GuardKey::for_action(*k) == key)
    }
}

#[derive(Debug)]
pub struct ViewState {
    target: Target,
    counters: CounterSet,
    edges: HashMap<EdgeKind, bool>,
    role: Option<MemberRole>,
    comments: Vec<Comment>,
    pending: Vec<Pending>,
    guards: HashSet<GuardKey>,
    applied: HashMap<Slot, Ticket>,
    next_ticket: Ticket,
    next_pending: u64,
    animating: bool,
    error: Option<String>,
    loaded: bool,
}

impl ViewState {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            counters: CounterSet::default(),
            edges: HashMap::new(),
            role: None,
            comments: Vec::new(),
            pending: Vec::new(),
            guards: HashSet::new(),
            applied: HashMap::new(),
            next_ticket: 0,
            next_pending: 0,
            animating: false,
            error: None,
            loaded: false,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn ticket(&mut self) -> Ticket {
        self.next_ticket += 1;
        self.next_ticket
    }

    /// Stamp a read about to be issued.
    pub fn begin_read(&mut self) -> Ticket {
        self.ticket()
    }

    /// Edge flag as displayed: the authoritative value unless a pending
    /// action on that edge overrides it.
    fn edge_shown(&self, edge: EdgeKind) -> bool {
        let mut shown = self.edges.get(&edge).copied().unwrap_or(false);
        for p in &self.pending {
            if p.kind.edge() == Some(edge) {
                shown = p.kind.delta() > 0;
            }
        }
        shown
    }

    /// Start an action: check its precondition and the busy guard, then
    /// apply the optimistic delta. A like also starts the animation.
    pub fn begin_action(
        &mut self,
        kind: ActionKind,
        comment_id: Option<&str>,
    ) -> Result<Started, Rejection> {
        let key = GuardKey::for_action(kind);
        if self.guards.contains(&key) {
            return Err(Rejection::Busy);
        }
        if let Some(edge) = kind.edge() {
            if self.edge_shown(edge) == (kind.delta() > 0) {
                return Err(Rejection::AlreadyApplied);
            }
        }

        self.guards.insert(key);
        self.next_pending += 1;
        let pending_id = self.next_pending;
        self.pending.push(Pending {
            id: pending_id,
            kind,
            comment_id: comment_id.map(str::to_string),
        });
        if kind == ActionKind::Like {
            self.animating = true;
        }
        self.error = None;
        let ticket = self.ticket();
        Ok(Started {
            pending_id,
            ticket,
            kind,
        })
    }

    fn release(&mut self, started: &Started) {
        self.pending.retain(|p| p.id != started.pending_id);
        self.guards.remove(&GuardKey::for_action(started.kind));
    }

    /// Settle a successful mutation. `observed` is what the response
    /// reported, if anything. Returns false when the response was older than
    /// a value already applied, in which case the caller should re-read.
    pub fn settle_success(&mut self, started: Started, observed: Option<Observation>) -> bool {
        self.release(&started);
        let Some(obs) = observed else {
            // Nothing authoritative came back; assume the edge took effect.
            if let Some(edge) = started.kind.edge() {
                self.edges.insert(edge, started.kind.delta() > 0);
            }
            return false;
        };
        self.apply(started.ticket, obs)
    }

    /// Settle a failed mutation: the optimistic delta is dropped and the
    /// error message kept for display.
    pub fn settle_failure(&mut self, started: Started, message: String) {
        self.release(&started);
        self.error = Some(message);
    }

    /// Withdraw an action that will never be settled, without reporting an
    /// error. The authoritative values are left to the next read.
    pub fn abandon(&mut self, started: Started) {
        self.release(&started);
    }

    /// Apply an authoritative observation taken at `ticket`. Returns true if
    /// every slot it touched accepted the value.
    pub fn apply(&mut self, ticket: Ticket, obs: Observation) -> bool {
        let mut fresh = true;

        for (kind, value) in obs.counters {
            if self.accept(Slot::Counter(kind), ticket) {
                self.counters.set(kind, value);
            } else {
                fresh = false;
            }
        }

        for (edge, present) in obs.edges {
            if !self.accept(Slot::Edge(edge), ticket) {
                fresh = false;
                continue;
            }
            self.edges.insert(edge, present);
            if edge == EdgeKind::Membership {
                self.role = if present { obs.role } else { None };
            }
            // The server already shows the effect of a pending action on
            // this edge, so its delta is counted in the value just applied.
            self.pending
                .retain(|p| p.kind.edge() != Some(edge) || (p.kind.delta() > 0) != present);
        }

        if let Some(comments) = obs.comments {
            if self.accept(Slot::Comments, ticket) {
                self.pending.retain(|p| match (&p.kind, &p.comment_id) {
                    (ActionKind::DeleteComment, Some(id)) => comments.iter().any(|c| &c.id == id),
                    _ => true,
                });
                self.comments = comments;
            } else {
                fresh = false;
            }
        }

        self.loaded = true;
        fresh
    }

    fn accept(&mut self, slot: Slot, ticket: Ticket) -> bool {
        let last = self.applied.entry(slot).or_insert(0);
        if ticket < *last {
            return false;
        }
        *last = ticket;
        true
    }

    pub fn stop_animation(&mut self) {
        self.animating = false;
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn snapshot(&self) -> EngagementSnapshot {
        let mut counters = self.counters;
        for p in &self.pending {
            counters.offset(p.kind.counter(), p.kind.delta());
        }
        let hidden: HashSet<&str> = self
            .pending
            .iter()
            .filter(|p| p.kind == ActionKind::DeleteComment)
            .filter_map(|p| p.comment_id.as_deref())
            .collect();
        let is_member = self.edge_shown(EdgeKind::Membership);

        EngagementSnapshot {
            target: self.target.clone(),
            counters,
            has_liked: self.edge_shown(EdgeKind::Like),
            is_following: self.edge_shown(EdgeKind::Follow),
            is_member,
            role: if is_member { self.role } else { None },
            comments: self
                .comments
                .iter()
                .filter(|c| !hidden.contains(c.id.as_str()))
                .cloned()
                .collect(),
            in_flight: self.pending.iter().map(|p| p.kind).collect(),
            animating: self.animating,
            error: self.error.clone(),
            loaded: self.loaded,
        }
    }
}
