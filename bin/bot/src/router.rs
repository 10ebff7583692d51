//! Inbound update routing.
//!
//! Button presses are parsed into an [`EventTag`] and dispatched to one
//! typed handler per route. A text reply to a prompt message is fed to that
//! message's conversation as untagged input for its current step.

use crate::context::AppContext;
use crate::error::RouteError;
use crate::render::{self, NO_LONGER_ACTIVE};
use crate::tag::EventTag;
use crate::telegram::{CallbackQuery, Message, Update};
use chrono::Utc;
use pitchside_conversation::{
    AdvanceOutcome, AttributeEdit, ConversationKind, ConversationState, Input, Prompt, Rejection,
};
use pitchside_core::{ChatId, MessageId, UserId};
use pitchside_scheduler::{Member, OutboundMessage, Role};
use rootcause::prelude::{Report, ResultExt};
use tracing::{debug, info, instrument};

fn lookup_failed(e: sqlx::Error) -> RouteError {
    RouteError::Lookup {
        details: e.to_string(),
    }
}

/// Dispatches updates to handlers.
#[derive(Clone)]
pub struct Router {
    ctx: AppContext,
}

impl Router {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Handles one update.
    pub async fn handle(&self, update: Update) -> Result<(), Report<RouteError>> {
        if let Some(query) = update.callback_query {
            return self.on_callback(query).await;
        }
        if let Some(message) = update.message {
            return self.on_message(message).await;
        }
        debug!(update = update.update_id, "ignoring update");
        Ok(())
    }

    #[instrument(skip_all, fields(user = %query.from.id))]
    async fn on_callback(&self, query: CallbackQuery) -> Result<(), Report<RouteError>> {
        let Some(message) = query.message.as_ref() else {
            return self.toast(&query, Some(NO_LONGER_ACTIVE)).await;
        };
        let (chat, message_id) = (message.chat.id, message.message_id);

        let tag = match query.data.as_deref().map(str::parse::<EventTag>) {
            Some(Ok(tag)) => tag,
            Some(Err(e)) => {
                debug!(error = %e, "unroutable callback");
                return self.toast(&query, Some(NO_LONGER_ACTIVE)).await;
            }
            None => return self.toast(&query, None).await,
        };

        match tag {
            EventTag::Answer { kind, step, value } => {
                let outcome = self
                    .ctx
                    .engine
                    .advance(chat, message_id, kind, Input::tagged(step, value))
                    .await
                    .context(RouteError::Conversation)?;
                let toast = self.show_outcome(chat, message_id, &outcome).await?;
                self.toast(&query, toast.as_deref()).await
            }
            EventTag::EditAttributes { player } => {
                self.on_edit_attributes(&query, chat, player).await
            }
            EventTag::BackToMenu => {
                let menu = render::menu(&self.menu_players(query.from.id).await?);
                self.ctx
                    .telegram
                    .edit_message(chat, message_id, &menu)
                    .await
                    .context(RouteError::Reply { chat })?;
                self.toast(&query, None).await
            }
        }
    }

    #[instrument(skip_all, fields(chat = %message.chat.id))]
    async fn on_message(&self, message: Message) -> Result<(), Report<RouteError>> {
        let chat = message.chat.id;
        let Some(text) = message.text.as_deref().map(str::trim) else {
            return Ok(());
        };

        if matches!(text, "/start" | "/menu") {
            let Some(user) = message.from.as_ref() else {
                return Ok(());
            };
            let menu = render::menu(&self.menu_players(user.id).await?);
            self.ctx
                .telegram
                .send_message(chat, &menu)
                .await
                .context(RouteError::Reply { chat })?;
            return Ok(());
        }

        let Some(prompt_message) = message.reply_to_message.as_deref() else {
            debug!("ignoring free text outside a conversation");
            return Ok(());
        };
        let message_id = prompt_message.message_id;

        let Some(kind) = self.live_kind(chat, message_id).await? else {
            self.say(chat, NO_LONGER_ACTIVE).await?;
            return Ok(());
        };
        let outcome = self
            .ctx
            .engine
            .advance(chat, message_id, kind, Input::text(text))
            .await
            .context(RouteError::Conversation)?;
        if let Some(notice) = self.show_outcome(chat, message_id, &outcome).await? {
            self.say(chat, &notice).await?;
        }
        Ok(())
    }

    /// Starts an attribute edit for a player, if the presser coaches them.
    #[instrument(skip(self, query))]
    async fn on_edit_attributes(
        &self,
        query: &CallbackQuery,
        chat: ChatId,
        player: UserId,
    ) -> Result<(), Report<RouteError>> {
        let editor = query.from.id;
        let Some(subject) = self.may_edit(editor, player).await? else {
            return self
                .toast(query, Some("Only the player's coach can edit attributes."))
                .await;
        };

        let sheet = self
            .ctx
            .roster
            .load_attributes(player)
            .await
            .map_err(lookup_failed)?;
        let state = ConversationState::AttributeEdit(AttributeEdit::new(player, editor, sheet));
        let prompt = render::prompt(&state.prompt(), Some(&subject.display_name()));
        let sent = self
            .ctx
            .telegram
            .send_message(chat, &prompt)
            .await
            .context(RouteError::Reply { chat })?;

        let expires_at = Some(Utc::now() + self.ctx.conversation_ttl);
        self.ctx
            .engine
            .start(editor, chat, sent, state, expires_at)
            .await
            .context(RouteError::Conversation)?;
        info!(%player, %editor, "attribute edit started");
        self.toast(query, None).await
    }

    /// Renders an advance outcome into the prompt message. Returns a short
    /// notice for the user, if any.
    async fn show_outcome(
        &self,
        chat: ChatId,
        message_id: MessageId,
        outcome: &AdvanceOutcome,
    ) -> Result<Option<String>, Report<RouteError>> {
        let next = match outcome {
            AdvanceOutcome::Continued { prompt, .. } => self.render_prompt(prompt).await?,
            AdvanceOutcome::Completed { commit } => render::completed(commit),
            AdvanceOutcome::Rejected { rejection, prompt } => {
                // A stale press means the keyboard on screen is outdated.
                if matches!(rejection, Rejection::StaleStep { .. } | Rejection::Superseded) {
                    let current = self.render_prompt(prompt).await?;
                    if let Err(e) = self.ctx.telegram.edit_message(chat, message_id, &current).await {
                        debug!(error = %e, "prompt already current");
                    }
                }
                return Ok(Some(render::rejection(rejection)));
            }
            AdvanceOutcome::NotFound => return Ok(Some(NO_LONGER_ACTIVE.to_string())),
        };

        self.ctx
            .telegram
            .edit_message(chat, message_id, &next)
            .await
            .context(RouteError::Reply { chat })?;
        Ok(None)
    }

    async fn render_prompt(
        &self,
        prompt: &Prompt,
    ) -> Result<OutboundMessage, Report<RouteError>> {
        let subject = match prompt.subject {
            Some(id) => Some(self.display_name(id).await?),
            None => None,
        };
        Ok(render::prompt(prompt, subject.as_deref()))
    }

    async fn display_name(&self, user: UserId) -> Result<String, Report<RouteError>> {
        let member = self
            .ctx
            .roster
            .find_member(user)
            .await
            .map_err(lookup_failed)?;
        Ok(member
            .map(|(m, _)| m.display_name())
            .unwrap_or_else(|| format!("Player {user}")))
    }

    /// Returns the player if `editor` may edit their attributes: admins may
    /// edit anyone, coaches only players of teams they coach.
    async fn may_edit(&self, editor: UserId, player: UserId) -> Result<Option<Member>, Report<RouteError>> {
        let roster = &self.ctx.roster;
        let Some((editor_member, _)) = roster.find_member(editor).await.map_err(lookup_failed)? else {
            return Ok(None);
        };
        let Some((player_member, player_team)) =
            roster.find_member(player).await.map_err(lookup_failed)?
        else {
            return Ok(None);
        };

        let allowed = match editor_member.role {
            Role::Admin => true,
            Role::Coach => match player_team {
                Some(team) => roster
                    .coached_teams(editor)
                    .await
                    .map_err(lookup_failed)?
                    .contains(&team),
                None => false,
            },
            Role::Player => false,
        };
        Ok(allowed.then_some(player_member))
    }

    /// Players listed in a user's menu: the squads of the teams they coach.
    async fn menu_players(&self, user: UserId) -> Result<Vec<Member>, Report<RouteError>> {
        let roster = &self.ctx.roster;
        let mut players = Vec::new();
        for team in roster.coached_teams(user).await.map_err(lookup_failed)? {
            players.extend(roster.list_players(team).await.map_err(lookup_failed)?);
        }
        Ok(players)
    }

    /// The kind of the conversation bound to a message, if one is live.
    /// Kinds are tried in declaration order.
    async fn live_kind(
        &self,
        chat: ChatId,
        message_id: MessageId,
    ) -> Result<Option<ConversationKind>, Report<RouteError>> {
        for kind in ConversationKind::ALL {
            let found = self
                .ctx
                .engine
                .find(chat, message_id, kind)
                .await
                .context(RouteError::Conversation)?;
            if found.is_some() {
                return Ok(Some(kind));
            }
        }
        Ok(None)
    }

    async fn toast(&self, query: &CallbackQuery, text: Option<&str>) -> Result<(), Report<RouteError>> {
        let chat = query
            .message
            .as_ref()
            .map(|m| m.chat.id)
            .unwrap_or_else(|| ChatId::new(query.from.id.get()));
        self.ctx
            .telegram
            .answer_callback(&query.id, text)
            .await
            .context(RouteError::Reply { chat })?;
        Ok(())
    }

    async fn say(&self, chat: ChatId, text: &str) -> Result<(), Report<RouteError>> {
        self.ctx
            .telegram
            .send_message(chat, &OutboundMessage::text(text))
            .await
            .context(RouteError::Reply { chat })?;
        Ok(())
    }
}
