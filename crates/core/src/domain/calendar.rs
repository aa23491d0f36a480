use serde::{Deserialize, Serialize};

/// Per-channel calendar; its id is the channel id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub channel_id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalCalendarId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCalendar {
    pub id: ExternalCalendarId,
    pub prod_id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub hash: String,
    pub channel_id: String,
}
