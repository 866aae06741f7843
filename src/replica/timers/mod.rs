mod heartbeat_timer;
mod timeout_timer;

pub(crate) use heartbeat_timer::HeartbeatTimerHandle;
pub(crate) use timeout_timer::TimeoutKind;
pub(crate) use timeout_timer::TimeoutTimerHandle;
