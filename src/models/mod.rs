pub mod alarm;
pub mod heating;
pub mod user;

pub use alarm::{Alarm, AlarmSeverity};
pub use heating::{HeatingData, OperatingMode};
pub use user::{Role, User};
