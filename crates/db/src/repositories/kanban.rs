use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use teamdesk_core::domain::kanban::{KanbanBoard, KanbanGroup, KanbanItem};

use super::{KanbanRepository, RepositoryError};
use crate::DbPool;

pub struct SqlKanbanRepository {
    pool: DbPool,
}

impl SqlKanbanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn item_from_row(row: &SqliteRow) -> Result<KanbanItem, RepositoryError> {
    Ok(KanbanItem {
        channel_id: row.try_get("channel_id")?,
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        group_name: row.try_get("group_name")?,
    })
}

#[async_trait::async_trait]
impl KanbanRepository for SqlKanbanRepository {
    async fn board(&self, channel_id: &str) -> Result<KanbanBoard, RepositoryError> {
        let groups = sqlx::query("SELECT channel_id, name FROM kanban_groups WHERE channel_id = ? ORDER BY rowid")
            .bind(channel_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| {
                Ok(KanbanGroup { channel_id: row.try_get("channel_id")?, name: row.try_get("name")? })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;

        let items = sqlx::query(
            "SELECT channel_id, id, content, group_name FROM kanban_items
             WHERE channel_id = ? ORDER BY id ASC",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(item_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(KanbanBoard::assemble(channel_id, groups, items))
    }

    async fn find_group(
        &self,
        channel_id: &str,
        name: &str,
    ) -> Result<Option<KanbanGroup>, RepositoryError> {
        let row = sqlx::query("SELECT channel_id, name FROM kanban_groups WHERE channel_id = ? AND name = ?")
            .bind(channel_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(KanbanGroup {
                channel_id: row.try_get("channel_id")?,
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn create_group(&self, group: &KanbanGroup) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO kanban_groups (channel_id, name) VALUES (?, ?)
             ON CONFLICT(channel_id, name) DO NOTHING",
        )
        .bind(&group.channel_id)
        .bind(&group.name)
        .execute(&self.pool)
        .await?;
        Ok(inserted.rows_affected() > 0)
    }

    async fn create_item(
        &self,
        channel_id: &str,
        content: &str,
        group_name: &str,
    ) -> Result<KanbanItem, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let next_id: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) + 1 FROM kanban_items WHERE channel_id = ?")
                .bind(channel_id)
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query("INSERT INTO kanban_items (channel_id, id, content, group_name) VALUES (?, ?, ?, ?)")
            .bind(channel_id)
            .bind(next_id)
            .bind(content)
            .bind(group_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(KanbanItem {
            channel_id: channel_id.to_string(),
            id: next_id,
            content: content.to_string(),
            group_name: group_name.to_string(),
        })
    }

    async fn find_item(
        &self,
        channel_id: &str,
        id: i64,
    ) -> Result<Option<KanbanItem>, RepositoryError> {
        let row = sqlx::query(
            "SELECT channel_id, id, content, group_name FROM kanban_items
             WHERE channel_id = ? AND id = ?",
        )
        .bind(channel_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn move_item(
        &self,
        channel_id: &str,
        id: i64,
        group_name: &str,
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let group_exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM kanban_groups WHERE channel_id = ? AND name = ?",
        )
        .bind(channel_id)
        .bind(group_name)
        .fetch_one(&mut *tx)
        .await?;
        if group_exists == 0 {
            return Ok(false);
        }

        let moved = sqlx::query("UPDATE kanban_items SET group_name = ? WHERE channel_id = ? AND id = ?")
            .bind(group_name)
            .bind(channel_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if moved.rows_affected() == 0 {
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_item(&self, channel_id: &str, id: i64) -> Result<bool, RepositoryError> {
        let deleted = sqlx::query("DELETE FROM kanban_items WHERE channel_id = ? AND id = ?")
            .bind(channel_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn replace_board(&self, board: &KanbanBoard) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM kanban_items WHERE channel_id = ?")
            .bind(&board.channel_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM kanban_groups WHERE channel_id = ?")
            .bind(&board.channel_id)
            .execute(&mut *tx)
            .await?;

        // Insertion order is the column order `board` reads back.
        for column in &board.groups {
            sqlx::query("INSERT INTO kanban_groups (channel_id, name) VALUES (?, ?)")
                .bind(&board.channel_id)
                .bind(&column.name)
                .execute(&mut *tx)
                .await?;
            for item in &column.items {
                sqlx::query("INSERT INTO kanban_items (channel_id, id, content, group_name) VALUES (?, ?, ?, ?)")
                    .bind(&board.channel_id)
                    .bind(item.id)
                    .bind(&item.content)
                    .bind(&column.name)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
