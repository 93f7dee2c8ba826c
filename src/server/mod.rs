pub mod memory;
pub mod response;
pub mod transport;

pub use memory::{MemoryAsyncContext, MemoryChannel, MemoryExchange};
pub use response::{commit, write_headers, Charset, SKIP_RESPONSE_HEADER};
pub use transport::{AsyncContext, AsyncListener, Exchange, OutputChannel, WriteListener};
