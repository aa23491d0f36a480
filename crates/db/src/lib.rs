pub mod connection;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, ensure_data_dir, DbPool};
pub use repositories::{
    CalendarRepository, EventRepository, KanbanRepository, RepositoryError, SqlCalendarRepository,
    SqlEventRepository, SqlKanbanRepository, SqlUserRepository, UserRepository,
};
