pub mod file;
pub mod time;

pub use file::read_symbol_file;
pub use time::{format_countdown, Clock, ManualClock, SystemClock};
