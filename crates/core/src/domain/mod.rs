pub mod session;
pub mod ticket;

pub use session::{Role, Session, SessionChannel, SessionKey, SessionState, TranscriptEntry};
pub use ticket::{Intent, NewTicket, Ticket, TicketId, TicketPatch, TicketSource, TicketStatus};
