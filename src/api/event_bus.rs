use crate::replica::{MemberState, StateChangeListener, StateSnapshot};
use crate::types::Term;

/// An event that happened, as observed by the local node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeEvent {
    /// The member state, term or primary changed. Consuming this event type is subtle. It doesn't
    /// queue intermediate events. If several changes land between two awaits of the next event,
    /// only the most recent one is seen.
    StateChanged(MemberStateEvent),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MemberStateEvent {
    pub state: MemberState,
    pub term: Term,
    /// A primary that is still draining doesn't accept writes yet.
    pub accepts_writes: bool,
    pub primary_id: Option<i64>,
}

pub struct NodeEventListener {
    state_change_listener: StateChangeListener,
}

impl NodeEventListener {
    pub(crate) fn new(state_change_listener: StateChangeListener) -> Self {
        NodeEventListener { state_change_listener }
    }

    pub fn current(&self) -> MemberStateEvent {
        MemberStateEvent::from(self.state_change_listener.current())
    }

    /// `next_event()` returns the next event that this node observes. None once the node is gone.
    pub async fn next_event(&mut self) -> Option<NodeEvent> {
        self.state_change_listener
            .next()
            .await
            .map(|snapshot| NodeEvent::StateChanged(MemberStateEvent::from(snapshot)))
    }
}

// ------- Conversions --------

impl From<StateSnapshot> for MemberStateEvent {
    fn from(snapshot: StateSnapshot) -> Self {
        MemberStateEvent {
            accepts_writes: snapshot.state == MemberState::Primary && !snapshot.is_draining,
            state: snapshot.state,
            term: snapshot.term,
            primary_id: snapshot.primary_id,
        }
    }
}
