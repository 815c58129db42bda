pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod vector;

pub use connection::{connect, connect_primary, connect_with_settings, DbPool};
pub use repositories::{
    FallbackTicketStore, InMemorySessionStore, InMemoryTicketRepository, JsonFileTicketRepository,
    RepositoryError, SessionStore, SqlSessionStore, SqlTicketRepository, TicketRepository,
};
pub use vector::{HttpVectorIndex, LocalVectorStore, RemoteIndex, VectorIndex, VectorQuery};
