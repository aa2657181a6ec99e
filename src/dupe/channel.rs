//! Command channel seam between the duplication state machine and the game server.
//!
//! The server exposes three console verbs (spawn, set int stat, set float stat) over a
//! request/response link. Transport and authentication live behind [`CommandChannel`];
//! the orchestrator only sees accepted/rejected answers.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::errors::ChannelError;
use crate::snapshot::InventoryType;

/// Where a spawned item should land.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Destination {
    /// Index of the online player as listed by the server console.
    pub player_index: u32,
    /// Character id of that player in the snapshot.
    pub owner_id: i64,
}

/// A live item the server will accept stat commands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ItemHandle {
    pub player_index: u32,
    pub slot: i64,
    pub inventory: InventoryType,
}

/// Proof that a spawn was accepted; exchanged for an [`ItemHandle`] once the server
/// has materialized the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnTicket {
    pub template_id: u32,
    pub destination: Destination,
    /// Channel-specific correlation value.
    pub token: u64,
}

#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn spawn(
        &self,
        template_id: u32,
        destination: &Destination,
    ) -> Result<SpawnTicket, ChannelError>;

    /// `Ok(None)` while the spawned item is not visible yet.
    async fn resolve_handle(&self, ticket: &SpawnTicket)
        -> Result<Option<ItemHandle>, ChannelError>;

    async fn apply_int_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: i32,
    ) -> Result<(), ChannelError>;

    async fn apply_float_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: f32,
    ) -> Result<(), ChannelError>;
}

#[async_trait]
impl<C: CommandChannel + ?Sized> CommandChannel for Arc<C> {
    async fn spawn(
        &self,
        template_id: u32,
        destination: &Destination,
    ) -> Result<SpawnTicket, ChannelError> {
        (**self).spawn(template_id, destination).await
    }

    async fn resolve_handle(
        &self,
        ticket: &SpawnTicket,
    ) -> Result<Option<ItemHandle>, ChannelError> {
        (**self).resolve_handle(ticket).await
    }

    async fn apply_int_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: i32,
    ) -> Result<(), ChannelError> {
        (**self).apply_int_stat(handle, property_id, value).await
    }

    async fn apply_float_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: f32,
    ) -> Result<(), ChannelError> {
        (**self).apply_float_stat(handle, property_id, value).await
    }
}

/// Server console command lines for the three verbs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConsoleCommand {
    SpawnItem {
        player_index: u32,
        template_id: u32,
        count: u32,
    },
    SetIntStat {
        handle: ItemHandle,
        property_id: u32,
        value: i32,
    },
    SetFloatStat {
        handle: ItemHandle,
        property_id: u32,
        value: f32,
    },
}

impl fmt::Display for ConsoleCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleCommand::SpawnItem {
                player_index,
                template_id,
                count,
            } => write!(f, "con {player_index} SpawnItem {template_id} {count}"),
            ConsoleCommand::SetIntStat {
                handle,
                property_id,
                value,
            } => write!(
                f,
                "con {} SetInventoryItemIntStat {} {} {} {}",
                handle.player_index,
                handle.slot,
                property_id,
                value,
                handle.inventory.code()
            ),
            ConsoleCommand::SetFloatStat {
                handle,
                property_id,
                value,
            } => write!(
                f,
                "con {} SetInventoryItemFloatStat {} {} {} {}",
                handle.player_index,
                handle.slot,
                property_id,
                value,
                handle.inventory.code()
            ),
        }
    }
}

/// Allows one outstanding request at a time across every job sharing the wrapper.
pub struct SerializedChannel<C> {
    inner: C,
    gate: Mutex<()>,
}

impl<C: CommandChannel> SerializedChannel<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            gate: Mutex::new(()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CommandChannel> CommandChannel for SerializedChannel<C> {
    async fn spawn(
        &self,
        template_id: u32,
        destination: &Destination,
    ) -> Result<SpawnTicket, ChannelError> {
        let _turn = self.gate.lock().await;
        self.inner.spawn(template_id, destination).await
    }

    async fn resolve_handle(
        &self,
        ticket: &SpawnTicket,
    ) -> Result<Option<ItemHandle>, ChannelError> {
        let _turn = self.gate.lock().await;
        self.inner.resolve_handle(ticket).await
    }

    async fn apply_int_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: i32,
    ) -> Result<(), ChannelError> {
        let _turn = self.gate.lock().await;
        self.inner.apply_int_stat(handle, property_id, value).await
    }

    async fn apply_float_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: f32,
    ) -> Result<(), ChannelError> {
        let _turn = self.gate.lock().await;
        self.inner.apply_float_stat(handle, property_id, value).await
    }
}

/// Dry-run channel: accepts everything and records the console script it would send.
/// Spawned items are assumed to land in `target_slot` of the destination's backpack.
pub struct ScriptChannel {
    target_slot: i64,
    script: Mutex<Vec<ConsoleCommand>>,
}

impl ScriptChannel {
    pub fn new(target_slot: i64) -> Self {
        Self {
            target_slot,
            script: Mutex::new(Vec::new()),
        }
    }

    pub async fn commands(&self) -> Vec<ConsoleCommand> {
        self.script.lock().await.clone()
    }

    async fn record(&self, command: ConsoleCommand) {
        debug!("script: {}", command);
        self.script.lock().await.push(command);
    }
}

#[async_trait]
impl CommandChannel for ScriptChannel {
    async fn spawn(
        &self,
        template_id: u32,
        destination: &Destination,
    ) -> Result<SpawnTicket, ChannelError> {
        let mut script = self.script.lock().await;
        script.push(ConsoleCommand::SpawnItem {
            player_index: destination.player_index,
            template_id,
            count: 1,
        });
        Ok(SpawnTicket {
            template_id,
            destination: destination.clone(),
            token: script.len() as u64,
        })
    }

    async fn resolve_handle(
        &self,
        ticket: &SpawnTicket,
    ) -> Result<Option<ItemHandle>, ChannelError> {
        Ok(Some(ItemHandle {
            player_index: ticket.destination.player_index,
            slot: self.target_slot,
            inventory: InventoryType::Backpack,
        }))
    }

    async fn apply_int_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: i32,
    ) -> Result<(), ChannelError> {
        self.record(ConsoleCommand::SetIntStat {
            handle: *handle,
            property_id,
            value,
        })
        .await;
        Ok(())
    }

    async fn apply_float_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: f32,
    ) -> Result<(), ChannelError> {
        self.record(ConsoleCommand::SetFloatStat {
            handle: *handle,
            property_id,
            value,
        })
        .await;
        Ok(())
    }
}
