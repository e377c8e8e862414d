//! Discord front end.
//!
//! Roles are groups, categories are containers, text and voice channels
//! are channels. [`DiscordDirectory`] implements the directory over the
//! serenity HTTP client; [`DiscordHandler`] turns gateway events for the
//! configured guild into notifications and chat messages into commands.
//!
//! Discord has no change counter of its own, so notifications are stamped
//! with a local revision. Serenity hands each gateway event to its own
//! task, so two events for one entity may reach us swapped; an event is
//! therefore only a hint to re-read that entity over HTTP, and what gets
//! published is the state read back, under one lock. Later stamps always
//! carry later reads.
//!
//! Every `guild_create` (first connect and each reconnect) re-lists the
//! guild under the same lock and reloads the cache, covering whatever
//! happened while the gateway was away.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serenity::all::{
    ChannelId, ChannelType, Client, Context, CreateChannel, CreateMessage, EditRole,
    EventHandler, GatewayIntents, Guild, GuildChannel, GuildId, GuildMemberUpdateEvent, Http, Member,
    Message, MessageReference, PermissionOverwrite as DiscordOverwrite, PermissionOverwriteType,
    Permissions, Ready, Role, RoleId, User, UserId,
};
use serenity::http::HttpError;
use tokio::sync::mpsc;

use ekip_core::directory::{
    Access, ChangeKind, ChannelKind, ChannelRecord, ContainerRecord, DirectoryEntity,
    EntityType, GroupRecord, GroupSpec, MemberRecord, NOTIFICATION_QUEUE, Notification,
    OverwriteTarget, PermissionOverwrite, Snapshot,
};
use ekip_core::{DirectoryClient, DirectoryError, EntityCache, EntityId, Engine};

use crate::command::Token;
use crate::config::BotConfig;
use crate::handlers::{CommandHandlers, Invocation};

const ATTEMPTS: u32 = 3;
const MEMBER_PAGE: u64 = 1000;

// ─── Mapping ─────────────────────────────────────────────────────────────────

fn group_record(role: &Role) -> GroupRecord {
    GroupRecord {
        id: EntityId(role.id.get()),
        name: role.name.clone(),
    }
}

fn member_record(member: &Member) -> MemberRecord {
    MemberRecord {
        id: EntityId(member.user.id.get()),
        display_name: member.display_name().to_string(),
        group_ids: member.roles.iter().map(|r| EntityId(r.get())).collect(),
    }
}

/// `None` for channel kinds teams never use (threads, forums, ...).
fn channel_entity(channel: &GuildChannel) -> Option<DirectoryEntity> {
    let id = EntityId(channel.id.get());
    let kind = match channel.kind {
        ChannelType::Category => {
            return Some(DirectoryEntity::Container(ContainerRecord {
                id,
                name: channel.name.clone(),
            }));
        }
        ChannelType::Text | ChannelType::News => ChannelKind::Text,
        ChannelType::Voice | ChannelType::Stage => ChannelKind::Voice,
        _ => return None,
    };
    Some(DirectoryEntity::Channel(ChannelRecord {
        id,
        name: channel.name.clone(),
        container_id: channel.parent_id.map(|p| EntityId(p.get())),
        kind,
    }))
}

fn classify(err: serenity::Error) -> DirectoryError {
    fn from_http(err: &HttpError, text: String) -> DirectoryError {
        match err {
            HttpError::UnsuccessfulRequest(resp) => match resp.status_code.as_u16() {
                404 => DirectoryError::Rejected(format!("not found: {text}")),
                429 | 500..=599 => DirectoryError::Transient(text),
                _ => DirectoryError::Rejected(text),
            },
            _ => DirectoryError::Transient(text),
        }
    }
    let text = err.to_string();
    match &err {
        serenity::Error::Http(http) => from_http(http, text),
        serenity::Error::Gateway(_) => DirectoryError::Closed,
        _ => DirectoryError::Transient(text),
    }
}

fn is_not_found(err: &serenity::Error) -> bool {
    fn http_not_found(err: &HttpError) -> bool {
        matches!(err, HttpError::UnsuccessfulRequest(resp) if resp.status_code.as_u16() == 404)
    }
    matches!(err, serenity::Error::Http(http) if http_not_found(http))
}

/// Values of a map in key order.
fn by_id<K: Ord, V>(map: impl IntoIterator<Item = (K, V)>) -> Vec<V> {
    let mut entries: Vec<(K, V)> = map.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().map(|(_, v)| v).collect()
}

/// Everything a role can be allowed in a text or voice channel.
fn full_channel_access() -> Permissions {
    Permissions::VIEW_CHANNEL
        | Permissions::CREATE_INSTANT_INVITE
        | Permissions::MANAGE_CHANNELS
        | Permissions::MANAGE_ROLES
        | Permissions::MANAGE_WEBHOOKS
        | Permissions::SEND_MESSAGES
        | Permissions::SEND_TTS_MESSAGES
        | Permissions::SEND_MESSAGES_IN_THREADS
        | Permissions::CREATE_PUBLIC_THREADS
        | Permissions::CREATE_PRIVATE_THREADS
        | Permissions::MANAGE_THREADS
        | Permissions::MANAGE_MESSAGES
        | Permissions::EMBED_LINKS
        | Permissions::ATTACH_FILES
        | Permissions::READ_MESSAGE_HISTORY
        | Permissions::MENTION_EVERYONE
        | Permissions::ADD_REACTIONS
        | Permissions::USE_EXTERNAL_EMOJIS
        | Permissions::USE_EXTERNAL_STICKERS
        | Permissions::USE_APPLICATION_COMMANDS
        | Permissions::CONNECT
        | Permissions::SPEAK
        | Permissions::STREAM
        | Permissions::USE_VAD
        | Permissions::PRIORITY_SPEAKER
        | Permissions::MUTE_MEMBERS
        | Permissions::DEAFEN_MEMBERS
        | Permissions::MOVE_MEMBERS
        | Permissions::REQUEST_TO_SPEAK
        | Permissions::USE_EMBEDDED_ACTIVITIES
}

fn access_permissions(access: Access) -> (Permissions, Permissions) {
    match access {
        Access::Full => (full_channel_access(), Permissions::empty()),
        Access::Hidden => (
            Permissions::empty(),
            Permissions::VIEW_CHANNEL | Permissions::CONNECT,
        ),
    }
}

/// The entity an event was about.
#[derive(Debug, Clone, Copy)]
enum Target {
    Member(UserId),
    Role(RoleId),
    /// Carries whether it was a category, for the deletion notice.
    Channel(ChannelId, EntityType),
}

impl Target {
    fn entity(&self) -> (EntityType, EntityId) {
        match *self {
            Target::Member(id) => (EntityType::Member, EntityId(id.get())),
            Target::Role(id) => (EntityType::Group, EntityId(id.get())),
            Target::Channel(id, ty) => (ty, EntityId(id.get())),
        }
    }
}

/// What the guild holds for a target right now.
enum Current {
    Present(DirectoryEntity),
    Gone,
    /// Exists but is nothing we mirror (@everyone, threads, forums).
    Untracked,
}

/// Snowflakes are never zero; serenity's id constructors panic on it.
fn snowflake(id: EntityId) -> Result<u64, DirectoryError> {
    if id.0 == 0 {
        Err(DirectoryError::NotFound(id))
    } else {
        Ok(id.0)
    }
}

// ─── Directory ───────────────────────────────────────────────────────────────

pub struct DiscordDirectory {
    http: Arc<Http>,
    guild: GuildId,
    revision: AtomicU64,
    subscribers: parking_lot::Mutex<Vec<mpsc::Sender<Notification>>>,
    /// Keeps stamping and sending in one order.
    publish_lock: tokio::sync::Mutex<()>,
}

impl DiscordDirectory {
    pub fn new(http: Arc<Http>, guild: GuildId) -> Self {
        Self {
            http,
            guild,
            revision: AtomicU64::new(0),
            subscribers: parking_lot::Mutex::new(Vec::new()),
            publish_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    /// Re-read `target` and publish what the guild holds now. `seen` is
    /// the event's own view, used only if the read fails.
    async fn refresh(&self, target: Target, seen: Option<DirectoryEntity>) {
        let _order = self.publish_lock.lock().await;
        let (entity_type, id) = target.entity();
        let current = match self.fetch(target).await {
            Ok(current) => current,
            Err(e) => {
                tracing::warn!(%entity_type, %id, error = %e, "Re-read failed, publishing event data");
                match seen {
                    Some(entity) => Current::Present(entity),
                    None => Current::Gone,
                }
            }
        };
        let n = match current {
            Current::Present(entity) => {
                Notification::upsert(ChangeKind::Updated, &entity, self.next_revision())
            }
            Current::Gone => Notification::deleted(entity_type, id, self.next_revision()),
            Current::Untracked => return,
        };
        self.send(n).await;
    }

    async fn fetch(&self, target: Target) -> Result<Current, DirectoryError> {
        let found = |present: Option<Option<DirectoryEntity>>| match present {
            Some(Some(entity)) => Current::Present(entity),
            Some(None) => Current::Untracked,
            None => Current::Gone,
        };
        match target {
            Target::Member(user) => {
                let member = self
                    .retry("fetch member", || async move {
                        match self.guild.member(&self.http, user).await {
                            Err(e) if is_not_found(&e) => Ok(None),
                            other => other.map(Some),
                        }
                    })
                    .await?;
                Ok(found(member.map(|m| Some(DirectoryEntity::Member(member_record(&m))))))
            }
            Target::Role(role) => {
                if role.get() == self.guild.get() {
                    return Ok(Current::Untracked);
                }
                let mut roles = self.retry("list roles", || self.guild.roles(&self.http)).await?;
                Ok(found(
                    roles
                        .remove(&role)
                        .map(|r| Some(DirectoryEntity::Group(group_record(&r)))),
                ))
            }
            Target::Channel(channel, _) => {
                let fetched = self
                    .retry("fetch channel", || async move {
                        match channel.to_channel(&self.http).await {
                            Err(e) if is_not_found(&e) => Ok(None),
                            other => other.map(Some),
                        }
                    })
                    .await?;
                Ok(found(
                    fetched.map(|c| c.guild().as_ref().and_then(channel_entity)),
                ))
            }
        }
    }

    /// Re-list the guild and reload `cache`. Holding the publish lock keeps
    /// every queued notification at or below the new snapshot's revision.
    pub async fn resync(&self, cache: &EntityCache) -> Result<(), DirectoryError> {
        let _order = self.publish_lock.lock().await;
        let snapshot = self.list().await?;
        cache.snapshot_load(snapshot);
        Ok(())
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn send(&self, n: Notification) {
        let senders: Vec<_> = self.subscribers.lock().clone();
        let mut closed = false;
        for tx in &senders {
            if tx.send(n.clone()).await.is_err() {
                closed = true;
            }
        }
        if closed {
            self.subscribers.lock().retain(|tx| !tx.is_closed());
        }
    }

    /// Run `op` up to [`ATTEMPTS`] times while it fails transiently.
    async fn retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, DirectoryError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, serenity::Error>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match classify(e) {
                    DirectoryError::Transient(msg) if attempt < ATTEMPTS => {
                        tracing::warn!(what, attempt, error = %msg, "Discord call failed, retrying");
                        tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                        attempt += 1;
                    }
                    err => return Err(err),
                },
            }
        }
    }

    fn overwrite(&self, o: &PermissionOverwrite) -> Result<DiscordOverwrite, DirectoryError> {
        let role = match o.target {
            OverwriteTarget::Group(id) => RoleId::new(snowflake(id)?),
            // @everyone shares the guild's id
            OverwriteTarget::Everyone => RoleId::new(self.guild.get()),
        };
        let (allow, deny) = access_permissions(o.access);
        Ok(DiscordOverwrite {
            allow,
            deny,
            kind: PermissionOverwriteType::Role(role),
        })
    }

    async fn all_members(&self) -> Result<Vec<Member>, DirectoryError> {
        let mut out = Vec::new();
        let mut after: Option<UserId> = None;
        loop {
            let page = self
                .retry("list members", || self.guild.members(&self.http, Some(MEMBER_PAGE), after))
                .await?;
            let full = page.len() as u64 == MEMBER_PAGE;
            after = page.last().map(|m| m.user.id);
            out.extend(page);
            if !full {
                out.sort_by_key(|m| m.user.id);
                return Ok(out);
            }
        }
    }

    /// Caller holds the publish lock. Entities come out in id order, which
    /// is creation order, so a reload keeps the order teams are listed in.
    async fn list(&self) -> Result<Snapshot, DirectoryError> {
        let revision = self.revision.load(Ordering::SeqCst);
        let roles = by_id(self.retry("list roles", || self.guild.roles(&self.http)).await?);
        let channels = by_id(
            self.retry("list channels", || self.guild.channels(&self.http))
                .await?,
        );
        let members = self.all_members().await?;

        let everyone = self.guild.get();
        let mut entities: Vec<DirectoryEntity> = roles
            .iter()
            .filter(|r| r.id.get() != everyone)
            .map(|r| DirectoryEntity::Group(group_record(r)))
            .collect();
        entities.extend(channels.iter().filter_map(channel_entity));
        entities.extend(members.iter().map(|m| DirectoryEntity::Member(member_record(m))));
        tracing::info!(
            guild = %self.guild,
            roles = roles.len(),
            channels = channels.len(),
            members = members.len(),
            "Listed guild"
        );
        Ok(Snapshot { revision, entities })
    }
}

#[async_trait]
impl DirectoryClient for DiscordDirectory {
    async fn list_entities(&self) -> Result<Snapshot, DirectoryError> {
        let _order = self.publish_lock.lock().await;
        self.list().await
    }

    async fn create_group(&self, spec: &GroupSpec) -> Result<EntityId, DirectoryError> {
        let role = self
            .retry("create role", || {
                self.guild.create_role(
                    &self.http,
                    EditRole::new()
                        .name(spec.name.clone())
                        .colour(spec.color)
                        .hoist(spec.hoist)
                        .mentionable(spec.mentionable),
                )
            })
            .await?;
        Ok(EntityId(role.id.get()))
    }

    async fn create_container(
        &self,
        name: &str,
        overwrites: &[PermissionOverwrite],
    ) -> Result<EntityId, DirectoryError> {
        let overwrites = overwrites
            .iter()
            .map(|o| self.overwrite(o))
            .collect::<Result<Vec<_>, _>>()?;
        let channel = self
            .retry("create category", || {
                self.guild.create_channel(
                    &self.http,
                    CreateChannel::new(name)
                        .kind(ChannelType::Category)
                        .permissions(overwrites.clone()),
                )
            })
            .await?;
        Ok(EntityId(channel.id.get()))
    }

    async fn create_channel(
        &self,
        name: &str,
        container: EntityId,
        kind: ChannelKind,
    ) -> Result<EntityId, DirectoryError> {
        let parent = ChannelId::new(snowflake(container)?);
        let kind = match kind {
            ChannelKind::Text => ChannelType::Text,
            ChannelKind::Voice => ChannelType::Voice,
        };
        let channel = self
            .retry("create channel", || {
                self.guild.create_channel(
                    &self.http,
                    CreateChannel::new(name).kind(kind).category(parent),
                )
            })
            .await?;
        Ok(EntityId(channel.id.get()))
    }

    async fn delete_entity(&self, entity_type: EntityType, id: EntityId) -> Result<(), DirectoryError> {
        let raw = snowflake(id)?;
        let result = match entity_type {
            EntityType::Group => {
                let role = RoleId::new(raw);
                self.retry("delete role", || async move {
                    match self.guild.delete_role(&self.http, role).await {
                        Err(e) if is_not_found(&e) => Ok(false),
                        other => other.map(|_| true),
                    }
                })
                .await
            }
            EntityType::Container | EntityType::Channel => {
                let channel = ChannelId::new(raw);
                self.retry("delete channel", || async move {
                    match channel.delete(&self.http).await {
                        Err(e) if is_not_found(&e) => Ok(false),
                        other => other.map(|_| true),
                    }
                })
                .await
            }
            other => {
                return Err(DirectoryError::Rejected(format!("cannot delete a {other}")));
            }
        };
        match result? {
            true => Ok(()),
            false => Err(DirectoryError::NotFound(id)),
        }
    }

    async fn grant(&self, group: EntityId, member: EntityId) -> Result<(), DirectoryError> {
        let (role, user) = (RoleId::new(snowflake(group)?), UserId::new(snowflake(member)?));
        self.retry("add role", || {
            self.http
                .add_member_role(self.guild, user, role, Some("team membership"))
        })
        .await
    }

    async fn revoke(&self, group: EntityId, member: EntityId) -> Result<(), DirectoryError> {
        let (role, user) = (RoleId::new(snowflake(group)?), UserId::new(snowflake(member)?));
        self.retry("remove role", || {
            self.http
                .remove_member_role(self.guild, user, role, Some("team membership"))
        })
        .await
    }

    fn subscribe(&self) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE);
        self.subscribers.lock().push(tx);
        rx
    }
}

// ─── Gateway ─────────────────────────────────────────────────────────────────

/// Split message text into tokens, decoding `<@id>`, `<@!id>` and `<@&id>`.
pub fn tokenize(text: &str) -> Vec<Token> {
    text.split_whitespace()
        .map(|word| {
            let inner = word.strip_prefix("<@").and_then(|w| w.strip_suffix('>'));
            match inner {
                Some(rest) => {
                    if let Some(id) = rest.strip_prefix('&').and_then(|r| r.parse().ok()) {
                        Token::Group(EntityId(id))
                    } else if let Ok(id) = rest.trim_start_matches('!').parse() {
                        Token::Member(EntityId(id))
                    } else {
                        Token::Word(word.to_string())
                    }
                }
                None => Token::Word(word.to_string()),
            }
        })
        .collect()
}

pub struct DiscordHandler {
    directory: Arc<DiscordDirectory>,
    cache: Arc<EntityCache>,
    handlers: Arc<CommandHandlers>,
}

impl DiscordHandler {
    fn ours(&self, guild: GuildId) -> bool {
        guild == self.directory.guild()
    }
}

fn channel_target(channel: &GuildChannel) -> Target {
    let ty = match channel.kind {
        ChannelType::Category => EntityType::Container,
        _ => EntityType::Channel,
    };
    Target::Channel(channel.id, ty)
}

#[serenity::async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(user = %ready.user.name, guild = %self.directory.guild(), "Discord connected");
    }

    /// Sent on every (re)connect; anything missed while away is picked up here.
    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        if !self.ours(guild.id) {
            return;
        }
        match self.directory.resync(&self.cache).await {
            Ok(()) => tracing::info!(guild = %guild.id, "Guild resynced"),
            Err(e) => tracing::error!(guild = %guild.id, error = %e, "Guild resync failed"),
        }
    }

    async fn guild_role_create(&self, _ctx: Context, new: Role) {
        if self.ours(new.guild_id) {
            let seen = DirectoryEntity::Group(group_record(&new));
            self.directory.refresh(Target::Role(new.id), Some(seen)).await;
        }
    }

    async fn guild_role_update(&self, _ctx: Context, _old: Option<Role>, new: Role) {
        if self.ours(new.guild_id) {
            let seen = DirectoryEntity::Group(group_record(&new));
            self.directory.refresh(Target::Role(new.id), Some(seen)).await;
        }
    }

    async fn guild_role_delete(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        removed: RoleId,
        _data: Option<Role>,
    ) {
        if self.ours(guild_id) {
            self.directory.refresh(Target::Role(removed), None).await;
        }
    }

    async fn guild_member_addition(&self, _ctx: Context, new: Member) {
        if self.ours(new.guild_id) {
            let seen = DirectoryEntity::Member(member_record(&new));
            self.directory.refresh(Target::Member(new.user.id), Some(seen)).await;
        }
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        _old: Option<Member>,
        new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        if !self.ours(event.guild_id) {
            return;
        }
        let record = match new {
            Some(member) => member_record(&member),
            None => MemberRecord {
                id: EntityId(event.user.id.get()),
                display_name: event
                    .nick
                    .clone()
                    .or_else(|| event.user.global_name.clone())
                    .unwrap_or_else(|| event.user.name.clone()),
                group_ids: event.roles.iter().map(|r| EntityId(r.get())).collect::<BTreeSet<_>>(),
            },
        };
        self.directory
            .refresh(Target::Member(event.user.id), Some(DirectoryEntity::Member(record)))
            .await;
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        user: User,
        _data: Option<Member>,
    ) {
        if self.ours(guild_id) {
            self.directory.refresh(Target::Member(user.id), None).await;
        }
    }

    async fn channel_create(&self, _ctx: Context, channel: GuildChannel) {
        if self.ours(channel.guild_id) {
            self.directory
                .refresh(channel_target(&channel), channel_entity(&channel))
                .await;
        }
    }

    async fn channel_update(&self, _ctx: Context, _old: Option<GuildChannel>, new: GuildChannel) {
        if self.ours(new.guild_id) {
            self.directory
                .refresh(channel_target(&new), channel_entity(&new))
                .await;
        }
    }

    async fn channel_delete(
        &self,
        _ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        if self.ours(channel.guild_id) {
            self.directory.refresh(channel_target(&channel), None).await;
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        if msg.guild_id.is_some_and(|g| !self.ours(g)) {
            return;
        }
        let prefix = self.handlers.config().prefix.as_str();
        let Some(body) = msg.content.trim().strip_prefix(prefix) else {
            return;
        };
        let inv = Invocation {
            caller: EntityId(msg.author.id.get()),
            guild: msg.guild_id.map(|g| g.get()),
            channel: EntityId(msg.channel_id.get()),
        };
        for result in self.handlers.dispatch(&inv, &tokenize(body)).await {
            let reply = CreateMessage::new()
                .content(format!("<@{}> {}", msg.author.id, result.text()))
                .reference_message(MessageReference::from((msg.channel_id, msg.id)));
            if let Err(e) = msg.channel_id.send_message(&ctx.http, reply).await {
                tracing::error!(error = %e, "Failed to send Discord reply");
            }
        }
    }
}

/// Connect to Discord and serve commands until the gateway stops.
pub async fn run(config: BotConfig) -> anyhow::Result<()> {
    let token = config
        .discord
        .token
        .clone()
        .context("DISCORD_BOT_TOKEN is not set")?;
    let guild = config
        .discord
        .guild_id
        .filter(|g| *g != 0)
        .map(GuildId::new)
        .context("discord.guild_id is not configured")?;

    let http = Arc::new(Http::new(&token));
    let directory = Arc::new(DiscordDirectory::new(http, guild));
    let engine = Engine::start(directory.clone(), config.team.clone())
        .await
        .context("loading the guild")?;
    let _reconciler = engine.spawn_reconciler(config.reconcile_interval());
    let cache = engine.cache().clone();
    let handlers = Arc::new(CommandHandlers::new(engine.lifecycle().clone(), config));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&token, intents)
        .event_handler(DiscordHandler {
            directory,
            cache,
            handlers,
        })
        .await
        .context("creating the Discord client")?;
    tracing::info!(guild = %guild, "Starting Discord gateway");
    client.start().await.context("Discord gateway stopped")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_decode() {
        assert_eq!(
            tokenize("add <@12> <@!13> <@&14> 1"),
            vec![
                Token::Word("add".into()),
                Token::Member(EntityId(12)),
                Token::Member(EntityId(13)),
                Token::Group(EntityId(14)),
                Token::Word("1".into()),
            ]
        );
        assert_eq!(tokenize("<@x>"), vec![Token::Word("<@x>".into())]);
    }

    #[test]
    fn full_access_covers_text_and_voice() {
        let (allow, deny) = access_permissions(Access::Full);
        assert!(deny.is_empty());
        for p in [
            Permissions::VIEW_CHANNEL,
            Permissions::SEND_MESSAGES,
            Permissions::READ_MESSAGE_HISTORY,
            Permissions::MANAGE_MESSAGES,
            Permissions::ATTACH_FILES,
            Permissions::CONNECT,
            Permissions::SPEAK,
            Permissions::STREAM,
        ] {
            assert!(allow.contains(p), "{p:?} missing");
        }
        assert!(!allow.contains(Permissions::ADMINISTRATOR));
        assert!(!allow.contains(Permissions::MANAGE_GUILD));

        let (allow, deny) = access_permissions(Access::Hidden);
        assert!(allow.is_empty());
        assert_eq!(deny, Permissions::VIEW_CHANNEL | Permissions::CONNECT);
    }

    #[test]
    fn deletions_name_the_entity_that_went() {
        assert_eq!(
            Target::Member(UserId::new(5)).entity(),
            (EntityType::Member, EntityId(5))
        );
        assert_eq!(
            Target::Role(RoleId::new(6)).entity(),
            (EntityType::Group, EntityId(6))
        );
        assert_eq!(
            Target::Channel(ChannelId::new(7), EntityType::Container).entity(),
            (EntityType::Container, EntityId(7))
        );
    }

    #[test]
    fn listings_come_out_in_id_order() {
        let map: std::collections::HashMap<u64, &str> =
            [(30, "c"), (10, "a"), (50, "e"), (20, "b"), (40, "d")].into_iter().collect();
        assert_eq!(by_id(map), vec!["a", "b", "c", "d", "e"]);

        let roles: std::collections::HashMap<RoleId, u64> =
            [9u64, 3, 7, 1].into_iter().map(|r| (RoleId::new(r), r)).collect();
        assert_eq!(by_id(roles), vec![1, 3, 7, 9]);
    }
}
