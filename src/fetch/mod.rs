pub mod decode;
pub mod request;
pub mod transport;

pub use decode::{HistoricalBar, HistoricalSeries, Quote};
pub use request::{DownloadId, OutboundRequest, RequestKind, Symbol};
pub use transport::{
    Completion, ReplyHandle, ReplyNotifier, ReqwestTransport, Transport, TransportEvent,
};
