use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::dispatch::EventHandler;
use super::error::CommandError;
use super::executor::{UniversalExecutor, respond_raw};
use super::mappings::{Mapping, MappingAdmin, MappingError, MappingSource};
use crate::metrics::RelayMetrics;
use crate::platform::{
    ChatClient, CommandInvocation, CommandOptionKind, CommandOptionSpec, CommandSpec, Platform,
    PlatformEvent,
};

pub const NOT_READY_MESSAGE: &str = "The bridge is not ready yet, please try again in a moment.";
pub const FAILURE_MESSAGE: &str = "Something went wrong while running that command.";
pub const DENIED_MESSAGE: &str = "You need permission to manage this channel to use that command.";
const READ_ONLY_MESSAGE: &str =
    "Mappings come from the configuration file and cannot be changed with commands.";

/// Everything a handler may touch while running one invocation.
pub struct CommandContext<'a> {
    pub invocation: &'a CommandInvocation,
    pub executor: &'a UniversalExecutor,
    pub admin: &'a MappingAdmin,
    pub registry: &'a CommandRegistry,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Returns the text answered to the invoker.
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<String, CommandError>;
}

#[derive(Clone)]
pub struct Command {
    pub spec: CommandSpec,
    pub handler: Arc<dyn CommandHandler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTrigger {
    Slash,
    Prefix(String),
}

/// Command lookup for one platform's invocation style.
pub struct CommandRegistry {
    trigger: CommandTrigger,
    commands: Vec<Command>,
}

impl CommandRegistry {
    /// Discord slash commands.
    pub fn slash() -> Self {
        Self {
            trigger: CommandTrigger::Slash,
            commands: builtin_commands(),
        }
    }

    /// Revolt text commands starting with `prefix`.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            trigger: CommandTrigger::Prefix(prefix.into()),
            commands: builtin_commands(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands
            .iter()
            .find(|command| command.spec.name.eq_ignore_ascii_case(name))
    }

    pub fn specs(&self) -> Vec<CommandSpec> {
        self.commands
            .iter()
            .map(|command| command.spec.clone())
            .collect()
    }

    pub fn usage(&self, name: &str) -> String {
        match &self.trigger {
            CommandTrigger::Slash => format!("/{name}"),
            CommandTrigger::Prefix(prefix) => format!("{prefix}{name}"),
        }
    }
}

pub fn builtin_commands() -> Vec<Command> {
    vec![
        Command {
            spec: CommandSpec {
                name: "help",
                description: "List the bridge commands",
                options: Vec::new(),
                privileged: false,
            },
            handler: Arc::new(Help),
        },
        Command {
            spec: CommandSpec {
                name: "ping",
                description: "Check that the bridge is alive",
                options: Vec::new(),
                privileged: false,
            },
            handler: Arc::new(Ping),
        },
        Command {
            spec: CommandSpec {
                name: "mappings",
                description: "List the bridged channels",
                options: Vec::new(),
                privileged: false,
            },
            handler: Arc::new(ListMappings),
        },
        Command {
            spec: CommandSpec {
                name: "connect",
                description: "Bridge this channel with a channel on the other platform",
                options: vec![CommandOptionSpec {
                    name: "channel",
                    description: "Id of the channel on the other platform",
                    kind: CommandOptionKind::String,
                    required: true,
                }],
                privileged: true,
            },
            handler: Arc::new(Connect),
        },
        Command {
            spec: CommandSpec {
                name: "disconnect",
                description: "Stop bridging this channel",
                options: Vec::new(),
                privileged: true,
            },
            handler: Arc::new(Disconnect),
        },
        Command {
            spec: CommandSpec {
                name: "bots",
                description: "Toggle relaying of messages sent by bots in this channel",
                options: Vec::new(),
                privileged: true,
            },
            handler: Arc::new(ToggleBots),
        },
    ]
}

struct Help;

#[async_trait]
impl CommandHandler for Help {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<String, CommandError> {
        let mut out = String::from("Bridge commands:");
        for command in &ctx.registry.commands {
            let _ = write!(
                out,
                "\n{} - {}",
                ctx.registry.usage(command.spec.name),
                command.spec.description
            );
        }
        Ok(out)
    }
}

struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    async fn run(&self, _ctx: &CommandContext<'_>) -> Result<String, CommandError> {
        Ok("Pong!".to_string())
    }
}

struct ListMappings;

fn channel_label(mapping: &Mapping, platform: Platform) -> String {
    let name = mapping.name_on(platform);
    let id = mapping.channel_on(platform);
    if name == id {
        id.to_string()
    } else {
        format!("#{name} ({id})")
    }
}

#[async_trait]
impl CommandHandler for ListMappings {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<String, CommandError> {
        let mappings = ctx.admin.registry().all();
        if mappings.is_empty() {
            return Ok("No channels are bridged.".to_string());
        }
        let mut out = format!("Bridged channels ({}):", mappings.len());
        for mapping in &mappings {
            let _ = write!(
                out,
                "\n{} <-> {} (bots: {})",
                channel_label(mapping, Platform::Discord),
                channel_label(mapping, Platform::Revolt),
                if mapping.allow_bot_authored_relay {
                    "on"
                } else {
                    "off"
                }
            );
        }
        Ok(out)
    }
}

fn read_only(ctx: &CommandContext<'_>) -> bool {
    ctx.admin.registry().source() == MappingSource::Declarative
}

struct Connect;

#[async_trait]
impl CommandHandler for Connect {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<String, CommandError> {
        if read_only(ctx) {
            return Ok(READ_ONLY_MESSAGE.to_string());
        }
        let invocation = ctx.invocation;
        let Some(target_id) = invocation.args.text("channel", 0) else {
            return Ok(format!("Usage: {} <channel id>", ctx.registry.usage("connect")));
        };
        let here = invocation.platform;
        let there = here.opposite();

        let target = match ctx.executor.fetch_channel(there, target_id.trim()).await {
            Ok(channel) => channel,
            Err(err) if err.is_not_found() => {
                return Ok(format!("I could not find that {there} channel."));
            }
            Err(err) => return Err(err.into()),
        };
        let current_name = ctx
            .executor
            .fetch_channel(here, &invocation.channel.channel_id)
            .await
            .map(|channel| channel.name)
            .unwrap_or_default();

        let (discord, revolt) = match here {
            Platform::Discord => (
                (invocation.channel.channel_id.clone(), current_name),
                (target.id, target.name),
            ),
            Platform::Revolt => (
                (target.id, target.name),
                (invocation.channel.channel_id.clone(), current_name),
            ),
        };
        let mapping = Mapping {
            discord_channel_id: discord.0,
            revolt_channel_id: revolt.0,
            discord_channel_name: discord.1,
            revolt_channel_name: revolt.1,
            allow_bot_authored_relay: true,
        };

        match ctx.admin.connect(mapping.clone()).await {
            Ok(()) => Ok(format!(
                "Bridged {} with {}.",
                channel_label(&mapping, here),
                channel_label(&mapping, there)
            )),
            Err(MappingError::AlreadyMapped {
                platform,
                channel_id,
            }) => Ok(format!(
                "The {platform} channel {channel_id} is already bridged."
            )),
            Err(MappingError::ReadOnly) => Ok(READ_ONLY_MESSAGE.to_string()),
            Err(err) => Err(err.into()),
        }
    }
}

struct Disconnect;

#[async_trait]
impl CommandHandler for Disconnect {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<String, CommandError> {
        if read_only(ctx) {
            return Ok(READ_ONLY_MESSAGE.to_string());
        }
        let invocation = ctx.invocation;
        match ctx
            .admin
            .disconnect(invocation.platform, &invocation.channel.channel_id)
            .await
        {
            Ok(mapping) => Ok(format!(
                "This channel is no longer bridged with {}.",
                channel_label(&mapping, invocation.platform.opposite())
            )),
            Err(MappingError::NotMapped { .. }) => Ok("This channel is not bridged.".to_string()),
            Err(err) => Err(err.into()),
        }
    }
}

struct ToggleBots;

#[async_trait]
impl CommandHandler for ToggleBots {
    async fn run(&self, ctx: &CommandContext<'_>) -> Result<String, CommandError> {
        if read_only(ctx) {
            return Ok(READ_ONLY_MESSAGE.to_string());
        }
        let invocation = ctx.invocation;
        match ctx
            .admin
            .toggle_bots(invocation.platform, &invocation.channel.channel_id)
            .await
        {
            Ok(mapping) if mapping.allow_bot_authored_relay => {
                Ok("Messages from bots will now be relayed.".to_string())
            }
            Ok(_) => Ok("Messages from bots will no longer be relayed.".to_string()),
            Err(MappingError::NotMapped { .. }) => Ok("This channel is not bridged.".to_string()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Ignored,
    NotReady,
    Denied,
    Completed,
    Failed,
}

/// Runs commands from both platforms against the shared handler set.
pub struct CommandRouter {
    slash: CommandRegistry,
    prefix: CommandRegistry,
    executor: Arc<OnceLock<UniversalExecutor>>,
    admin: Arc<MappingAdmin>,
    discord: Arc<dyn ChatClient>,
    revolt: Arc<dyn ChatClient>,
    metrics: Arc<RelayMetrics>,
}

impl CommandRouter {
    pub fn new(
        prefix: &str,
        executor: Arc<OnceLock<UniversalExecutor>>,
        admin: Arc<MappingAdmin>,
        discord: Arc<dyn ChatClient>,
        revolt: Arc<dyn ChatClient>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            slash: CommandRegistry::slash(),
            prefix: CommandRegistry::prefix(prefix),
            executor,
            admin,
            discord,
            revolt,
            metrics,
        }
    }

    pub fn registry(&self, platform: Platform) -> &CommandRegistry {
        match platform {
            Platform::Discord => &self.slash,
            Platform::Revolt => &self.prefix,
        }
    }

    fn client(&self, platform: Platform) -> &dyn ChatClient {
        match platform {
            Platform::Discord => self.discord.as_ref(),
            Platform::Revolt => self.revolt.as_ref(),
        }
    }

    async fn answer(&self, invocation: &CommandInvocation, content: &str) {
        if let Err(err) = respond_raw(self.client(invocation.platform), invocation, content).await {
            warn!(
                "{} failed to answer command name={} error={}",
                invocation.platform, invocation.name, err
            );
        }
    }

    pub async fn execute(&self, invocation: &CommandInvocation) -> CommandOutcome {
        let registry = self.registry(invocation.platform);
        let Some(command) = registry.find(&invocation.name) else {
            debug!(
                "{} unknown command ignored name={}",
                invocation.platform, invocation.name
            );
            return CommandOutcome::Ignored;
        };
        self.metrics.record_command();

        let Some(executor) = self.executor.get() else {
            self.answer(invocation, NOT_READY_MESSAGE).await;
            return CommandOutcome::NotReady;
        };

        if command.spec.privileged && !invocation.privileged {
            info!(
                "{} command denied name={} user_id={}",
                invocation.platform, invocation.name, invocation.author.id
            );
            self.answer(invocation, DENIED_MESSAGE).await;
            return CommandOutcome::Denied;
        }

        let ctx = CommandContext {
            invocation,
            executor,
            admin: &self.admin,
            registry,
        };
        match command.handler.run(&ctx).await {
            Ok(reply) => {
                if let Err(err) = executor.respond(invocation, &reply).await {
                    warn!(
                        "{} failed to answer command name={} error={}",
                        invocation.platform, invocation.name, err
                    );
                }
                CommandOutcome::Completed
            }
            Err(err) => {
                error!(
                    "{} command failed name={} channel_id={} error={}",
                    invocation.platform, invocation.name, invocation.channel.channel_id, err
                );
                self.answer(invocation, FAILURE_MESSAGE).await;
                CommandOutcome::Failed
            }
        }
    }
}

#[async_trait]
impl EventHandler for CommandRouter {
    async fn handle(&self, event: &PlatformEvent) -> anyhow::Result<()> {
        if let PlatformEvent::Command(invocation) = event {
            self.execute(invocation).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, OnceLock};

    use async_trait::async_trait;

    use super::{
        CommandOutcome, CommandRegistry, CommandRouter, DENIED_MESSAGE, FAILURE_MESSAGE,
        NOT_READY_MESSAGE,
    };
    use crate::bridge::executor::UniversalExecutor;
    use crate::bridge::mappings::{Mapping, MappingAdmin, MappingRegistry, MappingSource};
    use crate::db::{DatabaseError, MappingRecord, MappingStore};
    use crate::metrics::RelayMetrics;
    use crate::platform::testing::{FakeClient, MemoryMappingStore, author};
    use crate::platform::{
        ChannelRef, CommandArgs, CommandInvocation, MessageRef, Platform, ReplyTarget,
    };

    struct Harness {
        discord: Arc<FakeClient>,
        revolt: Arc<FakeClient>,
        registry: Arc<MappingRegistry>,
        router: CommandRouter,
    }

    fn harness(
        source: MappingSource,
        mappings: Vec<Mapping>,
        store: Option<Arc<dyn MappingStore>>,
        ready: bool,
    ) -> Harness {
        let discord = Arc::new(FakeClient::new(Platform::Discord).with_channel("D2", "random"));
        let revolt = Arc::new(FakeClient::new(Platform::Revolt).with_channel("R2", "lounge"));
        let registry = Arc::new(MappingRegistry::new(source, mappings));
        let slot = Arc::new(OnceLock::new());
        if ready {
            let _ = slot.set(UniversalExecutor::new(discord.clone(), revolt.clone()));
        }
        let router = CommandRouter::new(
            "rc!",
            slot,
            Arc::new(MappingAdmin::new(registry.clone(), store)),
            discord.clone(),
            revolt.clone(),
            Arc::new(RelayMetrics::default()),
        );
        Harness {
            discord,
            revolt,
            registry,
            router,
        }
    }

    fn mapping(discord: &str, revolt: &str) -> Mapping {
        Mapping {
            discord_channel_id: discord.to_string(),
            revolt_channel_id: revolt.to_string(),
            discord_channel_name: "general".to_string(),
            revolt_channel_name: "general".to_string(),
            allow_bot_authored_relay: true,
        }
    }

    fn revolt_command(name: &str, args: &[&str], privileged: bool) -> CommandInvocation {
        CommandInvocation {
            platform: Platform::Revolt,
            name: name.to_string(),
            args: CommandArgs::from_tokens(args.iter().map(|arg| arg.to_string()).collect()),
            channel: ChannelRef::new(Platform::Revolt, "R2"),
            author: author("01HUSER", "bob", false),
            privileged,
            reply: ReplyTarget::Message(MessageRef::new(Platform::Revolt, "R2", "rm-1")),
        }
    }

    fn discord_command(name: &str, privileged: bool) -> CommandInvocation {
        CommandInvocation {
            platform: Platform::Discord,
            name: name.to_string(),
            args: CommandArgs::default(),
            channel: ChannelRef::new(Platform::Discord, "D1"),
            author: author("u1", "alice", false),
            privileged,
            reply: ReplyTarget::Interaction {
                interaction_id: "i-1".to_string(),
            },
        }
    }

    fn last_revolt_reply(h: &Harness) -> String {
        h.revolt
            .sent_messages()
            .last()
            .map(|sent| sent.message.content.clone())
            .unwrap_or_default()
    }

    #[test]
    fn both_registries_share_the_handler_set() {
        let slash = CommandRegistry::slash();
        let prefix = CommandRegistry::prefix("rc!");
        let names: Vec<&str> = slash.specs().iter().map(|spec| spec.name).collect();
        assert_eq!(
            names,
            vec!["help", "ping", "mappings", "connect", "disconnect", "bots"]
        );
        assert_eq!(slash.specs(), prefix.specs());
        assert_eq!(prefix.usage("ping"), "rc!ping");
        assert_eq!(slash.usage("ping"), "/ping");
        assert!(prefix.find("PING").is_some());
    }

    #[tokio::test]
    async fn ping_answers_on_each_platform() {
        let h = harness(MappingSource::Persisted, Vec::new(), None, true);
        assert_eq!(
            h.router.execute(&revolt_command("ping", &[], false)).await,
            CommandOutcome::Completed
        );
        assert_eq!(last_revolt_reply(&h), "Pong!");
        assert_eq!(
            h.revolt.sent_messages()[0].message.reply_to.as_deref(),
            Some("rm-1")
        );

        h.router.execute(&discord_command("ping", false)).await;
        assert_eq!(
            h.discord.interaction_responses.lock().clone(),
            vec![("i-1".to_string(), "Pong!".to_string())]
        );
    }

    #[tokio::test]
    async fn unknown_commands_are_silently_ignored() {
        let h = harness(MappingSource::Persisted, Vec::new(), None, true);
        assert_eq!(
            h.router.execute(&revolt_command("frobnicate", &[], true)).await,
            CommandOutcome::Ignored
        );
        assert_eq!(h.revolt.sent_count(), 0);
    }

    #[tokio::test]
    async fn commands_before_ready_get_the_not_ready_reply() {
        let h = harness(MappingSource::Persisted, Vec::new(), None, false);
        assert_eq!(
            h.router.execute(&revolt_command("ping", &[], false)).await,
            CommandOutcome::NotReady
        );
        assert_eq!(last_revolt_reply(&h), NOT_READY_MESSAGE);
    }

    #[tokio::test]
    async fn mutating_commands_require_privilege() {
        let h = harness(MappingSource::Persisted, Vec::new(), None, true);
        assert_eq!(
            h.router
                .execute(&revolt_command("connect", &["D2"], false))
                .await,
            CommandOutcome::Denied
        );
        assert_eq!(last_revolt_reply(&h), DENIED_MESSAGE);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn connect_then_toggle_then_disconnect() {
        let store = Arc::new(MemoryMappingStore::default());
        let h = harness(
            MappingSource::Persisted,
            Vec::new(),
            Some(store.clone()),
            true,
        );

        h.router
            .execute(&revolt_command("connect", &["D2"], true))
            .await;
        assert_eq!(
            last_revolt_reply(&h),
            "Bridged #lounge (R2) with #random (D2)."
        );
        let created = h
            .registry
            .find_by_source_channel(Platform::Discord, "D2")
            .expect("mapping created");
        assert_eq!(created.revolt_channel_id, "R2");
        assert_eq!(store.load_mappings().await.expect("load").len(), 1);

        h.router.execute(&revolt_command("bots", &[], true)).await;
        assert_eq!(
            last_revolt_reply(&h),
            "Messages from bots will no longer be relayed."
        );
        assert!(!store.load_mappings().await.expect("load")[0].allow_bots);

        h.router
            .execute(&revolt_command("disconnect", &[], true))
            .await;
        assert!(h.registry.is_empty());
        assert!(store.load_mappings().await.expect("load").is_empty());

        h.router
            .execute(&revolt_command("disconnect", &[], true))
            .await;
        assert_eq!(last_revolt_reply(&h), "This channel is not bridged.");
    }

    #[tokio::test]
    async fn connect_reports_unknown_channels_and_duplicates() {
        let h = harness(
            MappingSource::Persisted,
            vec![mapping("D2", "R9")],
            None,
            true,
        );
        h.router
            .execute(&revolt_command("connect", &["D404"], true))
            .await;
        assert_eq!(last_revolt_reply(&h), "I could not find that discord channel.");

        h.router
            .execute(&revolt_command("connect", &["D2"], true))
            .await;
        assert_eq!(
            last_revolt_reply(&h),
            "The discord channel D2 is already bridged."
        );

        h.router.execute(&revolt_command("connect", &[], true)).await;
        assert_eq!(last_revolt_reply(&h), "Usage: rc!connect <channel id>");
    }

    #[tokio::test]
    async fn declarative_mappings_refuse_changes() {
        let h = harness(
            MappingSource::Declarative,
            vec![mapping("D1", "R2")],
            None,
            true,
        );
        h.router
            .execute(&revolt_command("disconnect", &[], true))
            .await;
        assert!(last_revolt_reply(&h).contains("configuration file"));
        assert_eq!(h.registry.len(), 1);

        h.router.execute(&revolt_command("mappings", &[], false)).await;
        assert_eq!(
            last_revolt_reply(&h),
            "Bridged channels (1):\n#general (D1) <-> #general (R2) (bots: on)"
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl MappingStore for BrokenStore {
        async fn load_mappings(&self) -> Result<Vec<MappingRecord>, DatabaseError> {
            Ok(Vec::new())
        }

        async fn create_mapping(&self, _record: &MappingRecord) -> Result<(), DatabaseError> {
            Err(DatabaseError::Connection("database is locked".to_string()))
        }

        async fn delete_mapping(&self, _discord_channel: &str) -> Result<(), DatabaseError> {
            Err(DatabaseError::Connection("database is locked".to_string()))
        }

        async fn set_allow_bots(
            &self,
            _discord_channel: &str,
            _allow_bots: bool,
        ) -> Result<(), DatabaseError> {
            Err(DatabaseError::Connection("database is locked".to_string()))
        }
    }

    #[tokio::test]
    async fn handler_failures_get_the_generic_notice() {
        let h = harness(
            MappingSource::Persisted,
            Vec::new(),
            Some(Arc::new(BrokenStore)),
            true,
        );
        assert_eq!(
            h.router
                .execute(&revolt_command("connect", &["D2"], true))
                .await,
            CommandOutcome::Failed
        );
        assert_eq!(last_revolt_reply(&h), FAILURE_MESSAGE);
        assert!(h.registry.is_empty());
    }
}
