use std::fmt;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemberState {
    Startup,
    Startup2,
    Primary,
    Secondary,
    Recovering,
    Rollback,
    Arbiter,
    Removed,
    Down,
    Unknown,
}

impl MemberState {
    /// Numeric form carried by heartbeat responses.
    pub fn as_i32(&self) -> i32 {
        match self {
            MemberState::Startup => 0,
            MemberState::Primary => 1,
            MemberState::Secondary => 2,
            MemberState::Recovering => 3,
            MemberState::Startup2 => 5,
            MemberState::Unknown => 6,
            MemberState::Arbiter => 7,
            MemberState::Down => 8,
            MemberState::Rollback => 9,
            MemberState::Removed => 10,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => MemberState::Startup,
            1 => MemberState::Primary,
            2 => MemberState::Secondary,
            3 => MemberState::Recovering,
            5 => MemberState::Startup2,
            7 => MemberState::Arbiter,
            8 => MemberState::Down,
            9 => MemberState::Rollback,
            10 => MemberState::Removed,
            _ => MemberState::Unknown,
        }
    }

    pub fn is_primary(&self) -> bool {
        *self == MemberState::Primary
    }

    pub fn is_secondary(&self) -> bool {
        *self == MemberState::Secondary
    }

    /// Nodes in these states hold data that can be read by a rollback or sync source.
    pub fn is_readable(&self) -> bool {
        matches!(self, MemberState::Primary | MemberState::Secondary)
    }

    /// ROLLBACK and STARTUP2 must neither grant votes nor count toward majority write concern.
    pub fn can_vote_affirmatively(&self) -> bool {
        !matches!(self, MemberState::Rollback | MemberState::Startup2)
    }
}

impl fmt::Display for MemberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberState::Startup => "STARTUP",
            MemberState::Startup2 => "STARTUP2",
            MemberState::Primary => "PRIMARY",
            MemberState::Secondary => "SECONDARY",
            MemberState::Recovering => "RECOVERING",
            MemberState::Rollback => "ROLLBACK",
            MemberState::Arbiter => "ARBITER",
            MemberState::Removed => "REMOVED",
            MemberState::Down => "DOWN",
            MemberState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StateEvent {
    ConfigSelfPresent,
    ConfigSelfArbiter,
    ConfigSelfAbsent,
    ConfigSetNameMismatch,
    InitialSyncComplete,
    FollowerSecondary,
    FollowerRecovering,
    ElectionWon,
    StepDown,
    MaintenanceOn,
    MaintenanceOff,
    DivergenceDetected,
    RollbackComplete,
    RollbackFailed,
    MinValidReached,
}

/// Facts the guards of the transition table are evaluated against. `maintenance_count` is the
/// count the node will have after the event is applied.
#[derive(Debug, Copy, Clone, Default)]
pub struct TransitionContext {
    pub maintenance_count: u32,
    pub electing: bool,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("no transition from {from} on {event:?}")]
pub struct IllegalTransition {
    pub from: MemberState,
    pub event: StateEvent,
}

type Guard = fn(&TransitionContext) -> bool;

struct Transition {
    from: MemberState,
    event: StateEvent,
    to: MemberState,
    guard: Guard,
}

fn always(_: &TransitionContext) -> bool {
    true
}

fn not_electing(ctx: &TransitionContext) -> bool {
    !ctx.electing
}

fn not_in_maintenance(ctx: &TransitionContext) -> bool {
    ctx.maintenance_count == 0
}

fn in_maintenance(ctx: &TransitionContext) -> bool {
    ctx.maintenance_count > 0
}

fn not_electing_and_not_in_maintenance(ctx: &TransitionContext) -> bool {
    not_electing(ctx) && not_in_maintenance(ctx)
}

fn not_electing_and_in_maintenance(ctx: &TransitionContext) -> bool {
    not_electing(ctx) && in_maintenance(ctx)
}

macro_rules! t {
    ($from:ident, $event:ident, $to:ident, $guard:ident) => {
        Transition {
            from: MemberState::$from,
            event: StateEvent::$event,
            to: MemberState::$to,
            guard: $guard,
        }
    };
}

#[rustfmt::skip]
const TRANSITIONS: &[Transition] = &[
    t!(Startup,    ConfigSelfPresent,     Startup2,   always),
    t!(Startup,    ConfigSelfArbiter,     Arbiter,    always),
    t!(Startup,    ConfigSelfAbsent,      Removed,    always),
    t!(Startup,    ConfigSetNameMismatch, Removed,    always),
    t!(Removed,    ConfigSelfPresent,     Startup2,   always),
    t!(Removed,    ConfigSelfArbiter,     Arbiter,    always),
    t!(Startup2,   ConfigSelfAbsent,      Removed,    always),
    t!(Secondary,  ConfigSelfAbsent,      Removed,    always),
    t!(Recovering, ConfigSelfAbsent,      Removed,    always),
    t!(Arbiter,    ConfigSelfAbsent,      Removed,    always),
    t!(Primary,    ConfigSelfAbsent,      Removed,    always),

    t!(Startup2,   InitialSyncComplete,   Secondary,  not_in_maintenance),
    t!(Startup2,   InitialSyncComplete,   Recovering, in_maintenance),

    t!(Startup2,   FollowerSecondary,     Secondary,  not_electing_and_not_in_maintenance),
    t!(Recovering, FollowerSecondary,     Secondary,  not_electing_and_not_in_maintenance),
    t!(Secondary,  FollowerSecondary,     Secondary,  not_electing),
    t!(Rollback,   FollowerSecondary,     Secondary,  not_electing_and_not_in_maintenance),
    t!(Startup2,   FollowerSecondary,     Recovering, not_electing_and_in_maintenance),
    t!(Recovering, FollowerSecondary,     Recovering, not_electing_and_in_maintenance),
    t!(Rollback,   FollowerSecondary,     Recovering, not_electing_and_in_maintenance),
    t!(Startup2,   FollowerRecovering,    Recovering, not_electing),
    t!(Secondary,  FollowerRecovering,    Recovering, not_electing),
    t!(Recovering, FollowerRecovering,    Recovering, not_electing),
    t!(Rollback,   FollowerRecovering,    Recovering, not_electing),

    t!(Secondary,  ElectionWon,           Primary,    always),
    t!(Primary,    StepDown,              Secondary,  not_in_maintenance),
    t!(Primary,    StepDown,              Recovering, in_maintenance),

    t!(Secondary,  MaintenanceOn,         Recovering, not_electing),
    t!(Recovering, MaintenanceOn,         Recovering, not_electing),
    t!(Rollback,   MaintenanceOn,         Rollback,   always),
    t!(Recovering, MaintenanceOff,        Secondary,  not_in_maintenance),
    t!(Recovering, MaintenanceOff,        Recovering, in_maintenance),
    t!(Rollback,   MaintenanceOff,        Rollback,   always),

    t!(Secondary,  DivergenceDetected,    Rollback,   not_electing),
    t!(Recovering, DivergenceDetected,    Rollback,   not_electing),
    t!(Rollback,   RollbackComplete,      Recovering, always),
    t!(Rollback,   RollbackFailed,        Recovering, always),
    t!(Recovering, MinValidReached,       Secondary,  not_in_maintenance),
];

/// Looks up the state `event` moves `from` into. The first row whose guard holds wins.
pub fn next_state(
    from: MemberState,
    event: StateEvent,
    ctx: &TransitionContext,
) -> Result<MemberState, IllegalTransition> {
    TRANSITIONS
        .iter()
        .find(|t| t.from == from && t.event == event && (t.guard)(ctx))
        .map(|t| t.to)
        .ok_or(IllegalTransition { from, event })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(maintenance_count: u32, electing: bool) -> TransitionContext {
        TransitionContext {
            maintenance_count,
            electing,
        }
    }

    #[test]
    fn startup_paths() {
        let none = ctx(0, false);
        assert_eq!(next_state(MemberState::Startup, StateEvent::ConfigSelfPresent, &none), Ok(MemberState::Startup2));
        assert_eq!(next_state(MemberState::Startup, StateEvent::ConfigSelfAbsent, &none), Ok(MemberState::Removed));
        assert_eq!(
            next_state(MemberState::Startup, StateEvent::ConfigSetNameMismatch, &none),
            Ok(MemberState::Removed)
        );
        assert_eq!(
            next_state(MemberState::Startup2, StateEvent::InitialSyncComplete, &none),
            Ok(MemberState::Secondary)
        );
    }

    #[test]
    fn maintenance_round_trip() {
        let on = next_state(MemberState::Secondary, StateEvent::MaintenanceOn, &ctx(1, false));
        assert_eq!(on, Ok(MemberState::Recovering));

        let still = next_state(MemberState::Recovering, StateEvent::MaintenanceOff, &ctx(1, false));
        assert_eq!(still, Ok(MemberState::Recovering));

        let off = next_state(MemberState::Recovering, StateEvent::MaintenanceOff, &ctx(0, false));
        assert_eq!(off, Ok(MemberState::Secondary));
    }

    #[test]
    fn maintenance_not_allowed_on_primary_or_while_electing() {
        assert!(next_state(MemberState::Primary, StateEvent::MaintenanceOn, &ctx(1, false)).is_err());
        assert!(next_state(MemberState::Secondary, StateEvent::MaintenanceOn, &ctx(1, true)).is_err());
    }

    #[test]
    fn rollback_is_sticky_under_maintenance() {
        let rollback = next_state(MemberState::Recovering, StateEvent::DivergenceDetected, &ctx(1, false)).unwrap();
        assert_eq!(rollback, MemberState::Rollback);

        // Maintenance may change but the state stays ROLLBACK.
        assert_eq!(
            next_state(rollback, StateEvent::MaintenanceOff, &ctx(0, false)),
            Ok(MemberState::Rollback)
        );
        assert_eq!(
            next_state(rollback, StateEvent::MaintenanceOn, &ctx(1, false)),
            Ok(MemberState::Rollback)
        );

        // Leaving rollback while still in maintenance re-exposes RECOVERING.
        let after = next_state(rollback, StateEvent::RollbackComplete, &ctx(1, false)).unwrap();
        assert_eq!(after, MemberState::Recovering);
        assert!(next_state(after, StateEvent::MinValidReached, &ctx(1, false)).is_err());
        assert_eq!(
            next_state(after, StateEvent::MinValidReached, &ctx(0, false)),
            Ok(MemberState::Secondary)
        );
    }

    #[test]
    fn only_secondaries_win_elections() {
        for state in &[
            MemberState::Startup2,
            MemberState::Recovering,
            MemberState::Rollback,
            MemberState::Arbiter,
            MemberState::Removed,
        ] {
            assert_eq!(
                next_state(*state, StateEvent::ElectionWon, &ctx(0, false)),
                Err(IllegalTransition {
                    from: *state,
                    event: StateEvent::ElectionWon
                })
            );
        }
    }

    #[test]
    fn wire_numbers_read_back() {
        for state in &[
            MemberState::Startup,
            MemberState::Startup2,
            MemberState::Primary,
            MemberState::Secondary,
            MemberState::Recovering,
            MemberState::Rollback,
            MemberState::Arbiter,
            MemberState::Removed,
            MemberState::Down,
        ] {
            assert_eq!(MemberState::from_i32(state.as_i32()), *state);
        }
    }
}
