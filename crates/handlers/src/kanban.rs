use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use teamdesk_chat::{
    CommandSchema, Embed, Interaction, OptionKind, OptionSchema, ReplyPayload, Session, SubcommandDispatcher,
};
use teamdesk_core::domain::kanban::{parse_item_id, KanbanColumn, KanbanGroup};
use teamdesk_core::errors::HandlerError;

use crate::context::HandlerContext;
use crate::support::{not_found, persistence, precondition, validation, Reply, MAX_EMBEDS};
use crate::{bind, CommandHandler};

const ITEM_ID_PARSE_ERROR: &str = "Can't parse item ID";

pub fn schema() -> CommandSchema {
    CommandSchema::new("kanban", "Manage the channel kanban board")
        .subcommand("list", "Show the board", Vec::new())
        .subcommand(
            "create-group",
            "Add a column to the board",
            vec![OptionSchema::required("name", "Group name", OptionKind::String)],
        )
        .subcommand(
            "create-item",
            "Add an item to a group",
            vec![
                OptionSchema::required("content", "Item content", OptionKind::String),
                OptionSchema::required("group-name", "Group to add the item to", OptionKind::String),
            ],
        )
        .subcommand(
            "move-item",
            "Move an item to another group",
            vec![
                OptionSchema::required("group-name", "Destination group", OptionKind::String),
                OptionSchema::required("item-id", "Item ID", OptionKind::String),
            ],
        )
        .subcommand(
            "delete-item",
            "Delete an item",
            vec![OptionSchema::required("item-id", "Item ID", OptionKind::String)],
        )
}

pub fn dispatcher(ctx: &Arc<HandlerContext>) -> SubcommandDispatcher {
    SubcommandDispatcher::new("kanban")
        .with("list", bind(ctx, ListBoard))
        .with("create-group", bind(ctx, CreateGroup))
        .with("create-item", bind(ctx, CreateItem))
        .with("move-item", bind(ctx, MoveItem))
        .with("delete-item", bind(ctx, DeleteItem))
}

pub struct ListBoard;

#[async_trait]
impl CommandHandler for ListBoard {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let board = reply
            .check(
                ctx.kanban
                    .board(&interaction.channel_id)
                    .await
                    .map_err(|error| persistence("Can't get groups", error)),
            )
            .await?;

        if board.groups.is_empty() {
            return reply.text("This channel doesn't have any kanban group yet.").await;
        }
        let embeds = board.groups.iter().take(MAX_EMBEDS).map(column_embed).collect();
        reply.send(ReplyPayload::embeds(embeds)).await
    }
}

fn column_embed(column: &KanbanColumn) -> Embed {
    let description = if column.items.is_empty() {
        "_No items_".to_owned()
    } else {
        column
            .items
            .iter()
            .map(|item| format!("`[{}]` {}", item.id, item.content))
            .collect::<Vec<_>>()
            .join("\n")
    };
    Embed::new().title(column.name.clone()).description(description)
}

pub struct CreateGroup;

#[async_trait]
impl CommandHandler for CreateGroup {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let Some(name) = interaction.string_option("name") else {
            return reply.fail(validation("Group content is empty.")).await;
        };

        let group = KanbanGroup { channel_id: interaction.channel_id.clone(), name };
        let created = reply
            .check(
                ctx.kanban.create_group(&group).await.map_err(|error| persistence("Can't create group", error)),
            )
            .await?;
        if !created {
            return reply.fail(precondition("Group already exists.")).await;
        }

        info!(
            event_name = "handlers.kanban.group_created",
            channel_id = %group.channel_id,
            group = %group.name,
            "kanban group created"
        );
        reply.text(format!("Group `{}` created.", group.name)).await
    }
}

pub struct CreateItem;

#[async_trait]
impl CommandHandler for CreateItem {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let channel_id = interaction.channel_id.as_str();
        let (Some(content), Some(group_name)) =
            (interaction.string_option("content"), interaction.string_option("group-name"))
        else {
            return reply.fail(validation("Content and group cannot be empty.")).await;
        };

        reply.check(require_group(ctx, channel_id, &group_name).await).await?;
        let item = reply
            .check(
                ctx.kanban
                    .create_item(channel_id, &content, &group_name)
                    .await
                    .map_err(|error| persistence("Can't create item", error)),
            )
            .await?;

        info!(
            event_name = "handlers.kanban.item_created",
            channel_id = %channel_id,
            item_id = item.id,
            group = %item.group_name,
            "kanban item created"
        );
        reply.text("Item created.").await
    }
}

pub struct MoveItem;

#[async_trait]
impl CommandHandler for MoveItem {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let channel_id = interaction.channel_id.as_str();
        let (Some(group_name), Some(raw_id)) =
            (interaction.string_option("group-name"), interaction.string_option("item-id"))
        else {
            return reply.fail(validation("Group name and item ID are required.")).await;
        };
        let item_id = reply.check(parse_item_id(&raw_id).map_err(|_| validation(ITEM_ID_PARSE_ERROR))).await?;

        reply.check(require_group(ctx, channel_id, &group_name).await).await?;
        reply.check(require_item(ctx, channel_id, item_id).await).await?;

        let moved = reply
            .check(
                ctx.kanban
                    .move_item(channel_id, item_id, &group_name)
                    .await
                    .map_err(|error| persistence("Can't move item", error)),
            )
            .await?;
        if !moved {
            return reply.fail(not_found(format!("Item `{item_id}` not found."))).await;
        }

        info!(
            event_name = "handlers.kanban.item_moved",
            channel_id = %channel_id,
            item_id,
            group = %group_name,
            "kanban item moved"
        );
        reply.text(format!("Item moved. `{item_id}` is now in `{group_name}`.")).await
    }
}

pub struct DeleteItem;

#[async_trait]
impl CommandHandler for DeleteItem {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, false).await?;
        let channel_id = interaction.channel_id.as_str();
        let Some(raw_id) = interaction.string_option("item-id") else {
            return reply.fail(validation("Item ID is required.")).await;
        };
        let item_id = reply.check(parse_item_id(&raw_id).map_err(|_| validation(ITEM_ID_PARSE_ERROR))).await?;

        let deleted = reply
            .check(
                ctx.kanban
                    .delete_item(channel_id, item_id)
                    .await
                    .map_err(|error| persistence("Can't delete item", error)),
            )
            .await?;
        if !deleted {
            return reply.fail(not_found(format!("Item `{item_id}` not found."))).await;
        }

        info!(event_name = "handlers.kanban.item_deleted", channel_id = %channel_id, item_id, "kanban item deleted");
        reply.text(format!("Item `{item_id}` deleted.")).await
    }
}

async fn require_group(ctx: &HandlerContext, channel_id: &str, name: &str) -> Result<(), HandlerError> {
    let group = ctx
        .kanban
        .find_group(channel_id, name)
        .await
        .map_err(|error| persistence("Can't get group", error))?;
    group.map(|_| ()).ok_or_else(|| not_found(format!("Group `{name}` not found.")))
}

async fn require_item(ctx: &HandlerContext, channel_id: &str, id: i64) -> Result<(), HandlerError> {
    let item = ctx
        .kanban
        .find_item(channel_id, id)
        .await
        .map_err(|error| persistence("Can't get item", error))?;
    item.map(|_| ()).ok_or_else(|| not_found(format!("Item `{id}` not found.")))
}
