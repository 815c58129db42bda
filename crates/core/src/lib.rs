pub mod audit;
pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod retrieval;

pub use cache::{CachedReply, Fingerprint, MetricsSnapshot, SupportCache, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::session::{Role, Session, SessionChannel, SessionKey, SessionState, TranscriptEntry};
pub use domain::ticket::{Intent, NewTicket, Ticket, TicketId, TicketPatch, TicketSource, TicketStatus};
pub use errors::{ApplicationError, CapabilityError, DomainError, InterfaceError};
pub use flows::{CallAction, CallCategory, CallEvent, CallState, FlowEngine, IvrFlow};
pub use retrieval::{cosine_similarity, Embedder, Retriever, VectorRecord};
