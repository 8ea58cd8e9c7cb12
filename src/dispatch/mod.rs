pub mod classifier;
pub mod events;
pub mod queue;
pub mod throttle;
pub mod timer;
pub mod worker;

pub use classifier::{ClassifiedResult, ResponseClassifier};
pub use events::{DispatchEvent, EventReceiver, EventSink};
pub use queue::{QueueEntry, RequestQueue};
pub use throttle::{Acquisition, Countdown, HistoricalThrottle, QuoteThrottle};
pub use worker::{Collaborators, Dispatcher, DispatcherHandle, QueueStatus};
