use std::sync::Arc;
use std::time::Duration;

use crate::commands::{load_config, runtime, CommandResult};
use helpline_core::clock::{Clock, SystemClock};
use helpline_core::config::LoadOptions;
use helpline_core::domain::ticket::TicketId;
use helpline_db::repositories::{
    FallbackTicketStore, JsonFileTicketRepository, SqlTicketRepository, TicketRepository,
};
use helpline_db::connect_primary;

/// Reads one ticket through the same primary-then-file path the server uses.
pub fn show(options: LoadOptions, id: &str) -> CommandResult {
    let config = match load_config("ticket_show", options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("ticket_show") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let id = TicketId(id.trim().to_string());
    if id.as_str().is_empty() {
        return CommandResult::failure("ticket_show", "invalid_input", "ticket id is required", 2);
    }

    let result = runtime.block_on(async {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pool = connect_primary(&config.database).await;
        let primary = pool.clone().map(|pool| {
            Arc::new(SqlTicketRepository::with_clock(pool, clock.clone()))
                as Arc<dyn TicketRepository>
        });
        let store = FallbackTicketStore::new(
            primary,
            Arc::new(JsonFileTicketRepository::with_clock(config.storage.ticket_path(), clock)),
            Duration::from_millis(config.database.operation_timeout_ms),
        );
        let found = store.find_by_id(&id).await;
        if let Some(pool) = pool {
            pool.close().await;
        }
        found
    });

    match result {
        Ok(Some(ticket)) => match serde_json::to_value(&ticket) {
            Ok(data) => CommandResult::success_with_data(
                "ticket_show",
                format!("ticket {} is {}", ticket.id, ticket.status.as_str()),
                Some(data),
            ),
            Err(error) => CommandResult::failure("ticket_show", "serialization", error.to_string(), 3),
        },
        Ok(None) => CommandResult::failure(
            "ticket_show",
            "not_found",
            format!("no ticket with id `{id}`"),
            6,
        ),
        Err(error) => CommandResult::failure("ticket_show", "ticket_store", error.to_string(), 4),
    }
}
