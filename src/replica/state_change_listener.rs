use crate::replica::MemberState;
use crate::types::Term;
use tokio::sync::watch;

/// What observers of the coordinator see after each event.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    pub state: MemberState,
    pub term: Term,
    pub is_draining: bool,
    pub primary_id: Option<i64>,
}

pub(super) fn new(initial_state: StateSnapshot) -> (StateChangeNotifier, StateChangeListener) {
    let (snd, rcv) = watch::channel(initial_state);

    (StateChangeNotifier { snd }, StateChangeListener { rcv })
}

pub(super) struct StateChangeNotifier {
    snd: watch::Sender<StateSnapshot>,
}

impl StateChangeNotifier {
    /// Observers are only woken when something they can see actually changed.
    pub(super) fn notify_new_state(&self, new_state: StateSnapshot) {
        if *self.snd.borrow() != new_state {
            let _ = self.snd.send(new_state);
        }
    }
}

#[derive(Clone)]
pub struct StateChangeListener {
    rcv: watch::Receiver<StateSnapshot>,
}

impl std::fmt::Debug for StateChangeListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateChangeListener").field(&*self.rcv.borrow()).finish()
    }
}

impl StateChangeListener {
    pub fn current(&self) -> StateSnapshot {
        self.rcv.borrow().clone()
    }

    /// Waits for the next change. None once the coordinator has gone away.
    pub async fn next(&mut self) -> Option<StateSnapshot> {
        match self.rcv.changed().await {
            Ok(_) => Some(self.rcv.borrow().clone()),
            Err(_) => None,
        }
    }

    /// Returns the first snapshot, current or future, that satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<StateSnapshot>
    where
        F: Fn(&StateSnapshot) -> bool,
    {
        let current = self.current();
        if predicate(&current) {
            return Some(current);
        }
        while let Some(snapshot) = self.next().await {
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(state: MemberState, term: i64) -> StateSnapshot {
        StateSnapshot {
            state,
            term: Term::new(term),
            is_draining: false,
            primary_id: None,
        }
    }

    #[tokio::test]
    async fn listener_sees_changes_only() {
        let (notifier, mut listener) = new(snapshot(MemberState::Startup, 0));

        notifier.notify_new_state(snapshot(MemberState::Startup, 0));
        notifier.notify_new_state(snapshot(MemberState::Secondary, 0));

        assert_eq!(listener.next().await, Some(snapshot(MemberState::Secondary, 0)));

        let waiter = tokio::spawn(async move { listener.wait_for(|s| s.term == Term::new(2)).await });
        notifier.notify_new_state(snapshot(MemberState::Secondary, 1));
        notifier.notify_new_state(snapshot(MemberState::Secondary, 2));
        assert_eq!(waiter.await.unwrap(), Some(snapshot(MemberState::Secondary, 2)));

        drop(notifier);
    }
}
