use async_trait::async_trait;

use teamdesk_chat::{CommandSchema, Interaction, ReplyPayload, Session};
use teamdesk_core::errors::HandlerError;

use crate::context::HandlerContext;
use crate::CommandHandler;

pub fn schema() -> CommandSchema {
    CommandSchema::new("ping", "Check that the bot is listening")
}

/// Answers right away, so no deferred reply.
pub struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn run(
        &self,
        _ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        session.reply_initial(&interaction.reply_token, ReplyPayload::text("Pong!").ephemeral()).await?;
        Ok(())
    }
}
