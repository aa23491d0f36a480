pub mod config;
pub mod domain;
pub mod errors;
pub mod time;
pub mod token;
pub mod totp;

pub use domain::calendar::{Calendar, ExternalCalendar, ExternalCalendarId};
pub use domain::event::{Event, EventChanges, EventDraft, EventId};
pub use domain::kanban::{KanbanBoard, KanbanColumn, KanbanGroup, KanbanItem};
pub use domain::user::{SessionToken, User};
pub use errors::{DomainError, ErrorKind, HandlerError};
pub use time::{DateParser, Timezone};
pub use token::{LoginClaims, LoginTokenSigner, TokenError};
