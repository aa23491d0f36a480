use std::sync::Arc;

use teamdesk_agent::calendar_source::CalendarSource;
use teamdesk_agent::natural::NaturalLanguageClient;
use teamdesk_chat::FlowCoordinator;
use teamdesk_core::time::DateParser;
use teamdesk_core::token::LoginTokenSigner;
use teamdesk_db::{
    CalendarRepository, DbPool, EventRepository, KanbanRepository, SqlCalendarRepository,
    SqlEventRepository, SqlKanbanRepository, SqlUserRepository, UserRepository,
};

pub const DEFAULT_TOTP_ISSUER: &str = "Teamdesk";

/// Everything a command handler may touch. Built once at startup and shared by every
/// persistent handler.
pub struct HandlerContext {
    pub events: Arc<dyn EventRepository>,
    pub calendars: Arc<dyn CalendarRepository>,
    pub kanban: Arc<dyn KanbanRepository>,
    pub users: Arc<dyn UserRepository>,
    pub flows: FlowCoordinator,
    pub dates: DateParser,
    pub signer: LoginTokenSigner,
    /// `None` when natural language commands are disabled.
    pub natural: Option<Arc<dyn NaturalLanguageClient>>,
    pub calendar_source: Arc<dyn CalendarSource>,
    pub dashboard_url: String,
    pub totp_issuer: String,
}

impl HandlerContext {
    pub fn new(pool: DbPool, flows: FlowCoordinator, calendar_source: Arc<dyn CalendarSource>) -> Self {
        Self {
            events: Arc::new(SqlEventRepository::new(pool.clone())),
            calendars: Arc::new(SqlCalendarRepository::new(pool.clone())),
            kanban: Arc::new(SqlKanbanRepository::new(pool.clone())),
            users: Arc::new(SqlUserRepository::new(pool)),
            flows,
            dates: DateParser::default(),
            signer: LoginTokenSigner::new(None),
            natural: None,
            calendar_source,
            dashboard_url: String::new(),
            totp_issuer: DEFAULT_TOTP_ISSUER.to_owned(),
        }
    }

    pub fn with_dates(mut self, dates: DateParser) -> Self {
        self.dates = dates;
        self
    }

    pub fn with_signer(mut self, signer: LoginTokenSigner) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_natural(mut self, natural: Arc<dyn NaturalLanguageClient>) -> Self {
        self.natural = Some(natural);
        self
    }

    pub fn with_dashboard_url(mut self, url: impl Into<String>) -> Self {
        self.dashboard_url = url.into();
        self
    }

    pub fn with_totp_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.totp_issuer = issuer.into();
        self
    }
}
