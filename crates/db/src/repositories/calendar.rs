use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use teamdesk_core::domain::calendar::{Calendar, ExternalCalendar, ExternalCalendarId};
use teamdesk_core::domain::event::Event;

use super::event::insert_event;
use super::{CalendarRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCalendarRepository {
    pool: DbPool,
}

impl SqlCalendarRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn external_from_row(row: &SqliteRow) -> Result<ExternalCalendar, RepositoryError> {
    Ok(ExternalCalendar {
        id: ExternalCalendarId(row.try_get("id")?),
        prod_id: row.try_get("prod_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        url: row.try_get("url")?,
        hash: row.try_get("hash")?,
        channel_id: row.try_get("channel_id")?,
    })
}

#[async_trait::async_trait]
impl CalendarRepository for SqlCalendarRepository {
    async fn ensure_channel_calendar(&self, calendar: &Calendar) -> Result<(), RepositoryError> {
        sqlx::query("INSERT INTO calendars (channel_id, name) VALUES (?, ?) ON CONFLICT(channel_id) DO NOTHING")
            .bind(&calendar.channel_id)
            .bind(&calendar.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_channel_calendar(&self, channel_id: &str) -> Result<Option<Calendar>, RepositoryError> {
        let row = sqlx::query("SELECT channel_id, name FROM calendars WHERE channel_id = ?")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Calendar { channel_id: row.try_get("channel_id")?, name: row.try_get("name")? })),
            None => Ok(None),
        }
    }

    async fn find_external(
        &self,
        id: &ExternalCalendarId,
    ) -> Result<Option<ExternalCalendar>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, prod_id, name, description, url, hash, channel_id
             FROM external_calendars WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(external_from_row).transpose()
    }

    async fn find_external_by_url(
        &self,
        url: &str,
    ) -> Result<Option<ExternalCalendar>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, prod_id, name, description, url, hash, channel_id
             FROM external_calendars WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(external_from_row).transpose()
    }

    async fn list_external(
        &self,
        channel_id: &str,
    ) -> Result<Vec<ExternalCalendar>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, prod_id, name, description, url, hash, channel_id
             FROM external_calendars WHERE channel_id = ? ORDER BY name ASC",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(external_from_row).collect()
    }

    async fn import_external(
        &self,
        calendar: &ExternalCalendar,
        events: &[Event],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO external_calendars (id, prod_id, name, description, url, hash, channel_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&calendar.id.0)
        .bind(&calendar.prod_id)
        .bind(&calendar.name)
        .bind(&calendar.description)
        .bind(&calendar.url)
        .bind(&calendar.hash)
        .bind(&calendar.channel_id)
        .execute(&mut *tx)
        .await?;

        for event in events {
            insert_event(&mut tx, event).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_external(&self, id: &ExternalCalendarId) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM external_calendars WHERE id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM events WHERE calendar_id = ?")
            .bind(&id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use teamdesk_core::domain::calendar::{Calendar, ExternalCalendar, ExternalCalendarId};
    use teamdesk_core::domain::event::{Event, EventId};

    use super::SqlCalendarRepository;
    use crate::repositories::test_support::setup;
    use crate::repositories::{CalendarRepository, EventRepository, SqlEventRepository};

    fn external(id: &str, url: &str) -> ExternalCalendar {
        ExternalCalendar {
            id: ExternalCalendarId(id.to_string()),
            prod_id: "-//Example//EN".to_string(),
            name: "Holidays".to_string(),
            description: String::new(),
            url: url.to_string(),
            hash: "abc".to_string(),
            channel_id: "C1".to_string(),
        }
    }

    fn imported_event(id: &str, calendar_id: &str) -> Event {
        let start = Utc.with_ymd_and_hms(2025, 12, 25, 0, 0, 0).single().expect("valid");
        Event {
            id: EventId(id.to_string()),
            summary: "Christmas".to_string(),
            description: String::new(),
            location: String::new(),
            url: String::new(),
            organizer: String::new(),
            start,
            end: start + chrono::Duration::days(1),
            is_whole_day: true,
            calendar_id: calendar_id.to_string(),
            channel_id: "C1".to_string(),
            attendees: Vec::new(),
            notification_sent: false,
            created_at: start,
            updated_at: start,
        }
    }

    #[tokio::test]
    async fn ensure_channel_calendar_is_idempotent() {
        let pool = setup().await;
        let repo = SqlCalendarRepository::new(pool.clone());
        let calendar = Calendar { channel_id: "C1".to_string(), name: "general".to_string() };

        repo.ensure_channel_calendar(&calendar).await.expect("first");
        repo.ensure_channel_calendar(&calendar).await.expect("second");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM calendars")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn import_then_delete_removes_calendar_and_events() {
        let pool = setup().await;
        let calendars = SqlCalendarRepository::new(pool.clone());
        let events = SqlEventRepository::new(pool);
        let calendar = external("ext-1", "https://example.com/holidays.ics");

        calendars
            .import_external(&calendar, &[imported_event("e1", "ext-1"), imported_event("e2", "ext-1")])
            .await
            .expect("import");

        let found = calendars
            .find_external_by_url("https://example.com/holidays.ics")
            .await
            .expect("find by url")
            .expect("should exist");
        assert_eq!(found, calendar);
        assert!(events.find_by_id(&EventId("e1".to_string())).await.expect("find").is_some());

        assert!(calendars.delete_external(&calendar.id).await.expect("delete"));
        assert!(calendars.find_external(&calendar.id).await.expect("find").is_none());
        assert!(events.find_by_id(&EventId("e2".to_string())).await.expect("find").is_none());
        assert!(!calendars.delete_external(&calendar.id).await.expect("delete again"));
    }

    #[tokio::test]
    async fn failed_import_leaves_nothing_behind() {
        let pool = setup().await;
        let calendars = SqlCalendarRepository::new(pool.clone());

        let duplicate_ids = [imported_event("dup", "ext-1"), imported_event("dup", "ext-1")];
        let result =
            calendars.import_external(&external("ext-1", "https://example.com/a.ics"), &duplicate_ids).await;
        assert!(result.is_err());

        assert!(calendars.list_external("C1").await.expect("list").is_empty());
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&pool)
            .await
            .expect("count");
        assert_eq!(count, 0);
    }
}
