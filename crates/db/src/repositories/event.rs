use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use teamdesk_core::domain::calendar::Calendar;
use teamdesk_core::domain::event::{Event, EventId};

use super::{decode_timestamp, encode_timestamp, EventRepository, RepositoryError};
use crate::DbPool;

const EVENT_COLUMNS: &str = "id, summary, description, location, url, organizer, start_date,
    end_date, is_whole_day, created_at, updated_at, calendar_id, channel_id, notification_sent";

pub struct SqlEventRepository {
    pool: DbPool,
}

impl SqlEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn with_attendees(&self, mut event: Event) -> Result<Event, RepositoryError> {
        event.attendees = sqlx::query_scalar("SELECT data FROM attendees WHERE event_id = ? ORDER BY rowid")
            .bind(&event.id.0)
            .fetch_all(&self.pool)
            .await?;
        Ok(event)
    }
}

/// Writes the event row and its attendees on an open connection so callers can share a
/// transaction.
pub(crate) async fn insert_event(
    conn: &mut SqliteConnection,
    event: &Event,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO events (id, summary, description, location, url, organizer, start_date,
                             end_date, is_whole_day, created_at, updated_at, calendar_id,
                             channel_id, notification_sent)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event.id.0)
    .bind(&event.summary)
    .bind(&event.description)
    .bind(&event.location)
    .bind(&event.url)
    .bind(&event.organizer)
    .bind(encode_timestamp(event.start))
    .bind(encode_timestamp(event.end))
    .bind(event.is_whole_day)
    .bind(encode_timestamp(event.created_at))
    .bind(encode_timestamp(event.updated_at))
    .bind(&event.calendar_id)
    .bind(&event.channel_id)
    .bind(event.notification_sent)
    .execute(&mut *conn)
    .await?;

    insert_attendees(conn, event).await
}

async fn insert_attendees(
    conn: &mut SqliteConnection,
    event: &Event,
) -> Result<(), RepositoryError> {
    for attendee in &event.attendees {
        sqlx::query("INSERT INTO attendees (event_id, data) VALUES (?, ?)")
            .bind(&event.id.0)
            .bind(attendee)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

fn event_from_row(row: &SqliteRow) -> Result<Event, RepositoryError> {
    let start: String = row.try_get("start_date")?;
    let end: String = row.try_get("end_date")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Event {
        id: EventId(row.try_get("id")?),
        summary: row.try_get("summary")?,
        description: row.try_get("description")?,
        location: row.try_get("location")?,
        url: row.try_get("url")?,
        organizer: row.try_get("organizer")?,
        start: decode_timestamp("start_date", &start)?,
        end: decode_timestamp("end_date", &end)?,
        is_whole_day: row.try_get("is_whole_day")?,
        calendar_id: row.try_get("calendar_id")?,
        channel_id: row.try_get("channel_id")?,
        attendees: Vec::new(),
        notification_sent: row.try_get("notification_sent")?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait::async_trait]
impl EventRepository for SqlEventRepository {
    async fn insert(&self, event: &Event) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_with_calendar(&self, calendar: &Calendar, event: &Event) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO calendars (channel_id, name) VALUES (?, ?) ON CONFLICT(channel_id) DO NOTHING")
            .bind(&calendar.channel_id)
            .bind(&calendar.name)
            .execute(&mut *tx)
            .await?;
        insert_event(&mut tx, event).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &EventId) -> Result<Option<Event>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(self.with_attendees(event_from_row(row)?).await?)),
            None => Ok(None),
        }
    }

    async fn list_in_range(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE channel_id = ? AND start_date < ? AND end_date > ?
             ORDER BY start_date ASC, summary ASC"
        ))
        .bind(channel_id)
        .bind(encode_timestamp(end))
        .bind(encode_timestamp(start))
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(self.with_attendees(event_from_row(row)?).await?);
        }
        Ok(events)
    }

    async fn update(&self, event: &Event) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE events
             SET summary = ?, description = ?, location = ?, url = ?, start_date = ?,
                 end_date = ?, is_whole_day = ?, updated_at = ?, notification_sent = ?
             WHERE id = ?",
        )
        .bind(&event.summary)
        .bind(&event.description)
        .bind(&event.location)
        .bind(&event.url)
        .bind(encode_timestamp(event.start))
        .bind(encode_timestamp(event.end))
        .bind(event.is_whole_day)
        .bind(encode_timestamp(event.updated_at))
        .bind(event.notification_sent)
        .bind(&event.id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM attendees WHERE event_id = ?")
            .bind(&event.id.0)
            .execute(&mut *tx)
            .await?;
        insert_attendees(&mut tx, event).await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete(&self, id: &EventId) -> Result<bool, RepositoryError> {
        let deleted = sqlx::query("DELETE FROM events WHERE id = ?")
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn list_for_calendar(&self, calendar_id: &str) -> Result<Vec<Event>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE calendar_id = ? ORDER BY start_date ASC, summary ASC"
        ))
        .bind(calendar_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(self.with_attendees(event_from_row(row)?).await?);
        }
        Ok(events)
    }
}
