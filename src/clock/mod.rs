mod shared_option;
mod stop;
mod time;

pub use time::Clock;
pub use time::RealClock;
pub(crate) use shared_option::SharedOption;
pub(crate) use stop::stop_pair;
pub(crate) use stop::StopGuard;
pub(crate) use stop::StopToken;
pub(crate) use time::mocked_clock;
pub(crate) use time::MockClock;
pub(crate) use time::MockClockController;
