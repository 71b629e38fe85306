//! Streaming query client.
//!
//! A [`QueryClient`] keeps one WebSocket connection per collection, submits
//! natural-language queries and rebuilds the structured answer (thinking
//! steps, cited sources, final text, error state) from the frames that
//! stream back, applying at most one update per redraw tick.

pub mod coalescer;
pub mod collaborators;
pub mod connection;
pub mod controller;
pub mod router;
pub mod session;
pub mod stream;

pub use coalescer::{Coalesce, Coalescer, ResponseChunk};
pub use collaborators::{BasenameResolver, FileResolver, IdentityProvider, NoopObserver, SessionObserver};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use controller::{ClientConfig, QueryClient, QueryOutcome, QueryRequest};
pub use router::{FrameSubscription, HandlerId, HandlerRegistry};
pub use session::{ActivatedSource, Exchange, QueryState, SessionContext};
pub use stream::AnswerStream;
