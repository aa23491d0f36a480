use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use teamdesk_chat::{
    CommandSchema, ConfirmLabels, Embed, FlowOutcome, Interaction, OptionKind, OptionSchema, ReplyPayload,
    Session, SubcommandDispatcher,
};
use teamdesk_core::domain::user::SessionToken;
use teamdesk_core::errors::HandlerError;
use teamdesk_core::time::DateParser;
use teamdesk_core::token::LoginClaims;
use teamdesk_core::totp::{self, TotpError};

use crate::context::HandlerContext;
use crate::support::{
    await_confirmation, not_found, persistence, precondition, timed_out, unexpected, validation, Answer, Reply,
    MAX_EMBEDS,
};
use crate::{bind, CommandHandler};

pub const REVOKE_SESSION_PREFIX: &str = "revoke-session";
const TOTP_VALID: &str = "✅  TOTP code is valid.";
const TOTP_INVALID: &str = "❌  TOTP code is invalid.";

pub fn schema() -> CommandSchema {
    CommandSchema::new("auth", "Dashboard access")
        .subcommand("login", "Get a login link for the dashboard", Vec::new())
        .subcommand("totp-create", "Create a TOTP secret for your authenticator app", Vec::new())
        .subcommand(
            "totp-check",
            "Check a code from your authenticator app",
            vec![OptionSchema::required("code", "Six digit code", OptionKind::String)],
        )
        .subcommand("revoke-session", "Sign out one of your dashboard sessions", Vec::new())
}

pub fn dispatcher(ctx: &Arc<HandlerContext>) -> SubcommandDispatcher {
    SubcommandDispatcher::new("auth")
        .with("login", bind(ctx, Login))
        .with("totp-create", bind(ctx, TotpCreate))
        .with("totp-check", bind(ctx, TotpCheck))
        .with("revoke-session", bind(ctx, RevokeSession))
}

pub struct Login;

#[async_trait]
impl CommandHandler for Login {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, true).await?;
        let invoker = &interaction.invoker;
        reply
            .check(
                ctx.users
                    .ensure_user(&invoker.id, &invoker.username)
                    .await
                    .map_err(|error| persistence("Can't save user", error)),
            )
            .await?;

        let claims = LoginClaims {
            user_id: invoker.id.clone(),
            username: invoker.username.clone(),
            issued_at: Utc::now().timestamp(),
        };
        let token = match ctx.signer.sign(&claims) {
            Ok(token) => token,
            Err(error) => {
                warn!(event_name = "handlers.auth.sign_failed", error = %error, "could not sign login token");
                return reply.fail(precondition("Failed to generate login token")).await;
            }
        };

        let embed = Embed::new()
            .title("Login into Dashboard")
            .url(login_link(&ctx.dashboard_url, &token))
            .description("This link expires in 5 minutes.");
        reply.send(ReplyPayload::embeds(vec![embed]).ephemeral()).await
    }
}

pub fn login_link(dashboard_url: &str, token: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    let separator = if dashboard_url.contains('?') { '&' } else { '?' };
    format!("{dashboard_url}{separator}token={encoded}")
}

pub struct TotpCreate;

#[async_trait]
impl CommandHandler for TotpCreate {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, true).await?;
        let invoker = &interaction.invoker;
        let user = reply
            .check(ctx.users.find(&invoker.id).await.map_err(|error| persistence("Can't get user", error)))
            .await?;

        let has_secret = user.and_then(|user| user.totp_secret).is_some();
        let answer = if has_secret {
            let mut flow = ctx.flows.open(reply.session().clone(), reply.token().clone(), &interaction.channel_id);
            let prompt = ReplyPayload::text("This will overwrite your current TOTP secret. Are you sure?").ephemeral();
            let confirmed = await_confirmation(
                &mut flow,
                reply.session(),
                prompt,
                ConfirmLabels::new("Yes", "No"),
                ReplyPayload::text("Canceled.").ephemeral(),
            )
            .await?;
            match confirmed {
                Some(click) => Answer::Click(click.reply_token),
                None => return Ok(()),
            }
        } else {
            Answer::Deferred(reply.token().clone())
        };

        let secret = totp::generate_secret();
        let result = ctx
            .users
            .set_totp_secret(&invoker.id, &invoker.username, &secret)
            .await
            .map_err(|error| persistence("Can't save TOTP secret", error));
        let uri = totp::provisioning_uri(&secret, &invoker.username, &ctx.totp_issuer);
        let success = ReplyPayload::text(format!(
            "Add this secret to your authenticator app:\n`{secret}`\nOr open this link on your phone:\n{uri}"
        ))
        .ephemeral();
        answer.settle(reply.session(), result, success).await?;
        info!(event_name = "handlers.auth.totp_created", user_id = %invoker.id, "totp secret stored");
        Ok(())
    }
}

pub struct TotpCheck;

#[async_trait]
impl CommandHandler for TotpCheck {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, true).await?;
        let Some(code) = interaction.string_option("code") else {
            return reply.fail(validation("TOTP code is empty.")).await;
        };
        let user = reply
            .check(
                ctx.users
                    .find(&interaction.invoker.id)
                    .await
                    .map_err(|error| persistence("Can't get user", error)),
            )
            .await?;
        let Some(secret) = user.and_then(|user| user.totp_secret) else {
            return reply.fail(precondition("You haven't created a TOTP secret yet.")).await;
        };

        let valid = match totp::verify(&secret, &code, Utc::now()) {
            Ok(valid) => valid,
            Err(TotpError::InvalidCode) => false,
            Err(error @ TotpError::InvalidSecret) => {
                warn!(
                    event_name = "handlers.auth.totp_secret_corrupt",
                    user_id = %interaction.invoker.id,
                    error = %error,
                    "stored totp secret cannot be decoded"
                );
                false
            }
        };
        reply.text(if valid { TOTP_VALID } else { TOTP_INVALID }).await
    }
}

pub struct RevokeSession;

#[async_trait]
impl CommandHandler for RevokeSession {
    async fn run(
        &self,
        ctx: &HandlerContext,
        session: Session,
        interaction: Interaction,
    ) -> Result<(), HandlerError> {
        let reply = Reply::defer(session, &interaction, true).await?;
        let user_id = interaction.invoker.id.as_str();
        let mut sessions = reply
            .check(ctx.users.list_sessions(user_id).await.map_err(|error| persistence("Can't get sessions", error)))
            .await?;
        if sessions.is_empty() {
            return reply.text("No sessions to revoke.").await;
        }
        let mut heading = format!("Available sessions: {}", sessions.len());
        if sessions.len() > MAX_EMBEDS {
            heading.push_str(&format!("\nShowing the first {MAX_EMBEDS}. Revoke one to see the rest."));
            sessions.truncate(MAX_EMBEDS);
        }

        let prompt = sessions
            .iter()
            .enumerate()
            .fold(ReplyPayload::text(heading), |prompt, (index, token)| {
                prompt.with_embed(session_embed(index, token, &ctx.dates))
            })
            .ephemeral();
        let labels: Vec<String> = (1..=sessions.len()).map(|number| number.to_string()).collect();

        let mut flow = ctx.flows.open(reply.session().clone(), reply.token().clone(), &interaction.channel_id);
        let (index, click) = match flow.select(prompt, &labels, REVOKE_SESSION_PREFIX).await {
            FlowOutcome::Selected { index, interaction } => (index, interaction),
            FlowOutcome::TimedOut => return timed_out(&flow).await,
            FlowOutcome::Failed(error) => return Err(error.into()),
            other => return Err(unexpected(&other)),
        };
        let Some(chosen) = sessions.get(index) else {
            return Err(HandlerError::Programmer(format!("session choice {index} is out of range")));
        };

        let result = match ctx.users.revoke_session(user_id, &chosen.secret).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(not_found("Session not found.")),
            Err(error) => Err(persistence("Can't revoke session", error)),
        };
        Answer::Click(click.reply_token)
            .settle(reply.session(), result, ReplyPayload::text("Session revoked.").ephemeral())
            .await?;
        info!(event_name = "handlers.auth.session_revoked", user_id = %user_id, "dashboard session revoked");
        Ok(())
    }
}

fn session_embed(index: usize, token: &SessionToken, dates: &DateParser) -> Embed {
    let or_unknown = |value: &str| if value.trim().is_empty() { "unknown".to_owned() } else { value.to_owned() };
    Embed::new()
        .title(format!("Session {}", index + 1))
        .field("Created", dates.format_display(token.created_at), true)
        .field("IP address", or_unknown(&token.ip_address), true)
        .field("User agent", or_unknown(&token.user_agent), false)
}

#[cfg(test)]
mod tests {
    use super::login_link;

    #[test]
    fn login_link_escapes_the_token() {
        let link = login_link("https://desk.example.com/login", "a+b/c=");
        assert_eq!(link, "https://desk.example.com/login?token=a%2Bb%2Fc%3D");
    }

    #[test]
    fn login_link_appends_to_existing_query() {
        let link = login_link("https://desk.example.com/?lang=en", "abc");
        assert_eq!(link, "https://desk.example.com/?lang=en&token=abc");
    }
}
