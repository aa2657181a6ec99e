//! Test utilities & fixtures.
//! Blob builders, a throwaway SQLite snapshot, and a command channel fake that records
//! every call and can be told to refuse or lag.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tempfile::TempDir;

use itemforge::blob::HEADER_MAGIC;
use itemforge::dupe::{
    AbortHandle, CommandChannel, Destination, DuplicationSettings, ItemHandle, SpawnTicket,
};
use itemforge::errors::ChannelError;
use itemforge::snapshot::{InventoryType, SnapshotDb};

/// Real weapon blob (template 10097) as stored by the game: header, section preamble,
/// two strings, one padding word, a 7-record block and a 4-record float block.
pub const MAUL_HEX: &str = "01000000EFBEADDE0FCAFEBACAFBCFABCDAB214300000000000000003F0000002F47616D652F4974656D732F576561706F6E732F4D61756C32682F42505F4974656D5F4D61756C426173652E42505F4974656D5F4D61756C426173655F43001600000042505F4974656D5F4D61756C426173655F435F3839000071270000070000000600000057000000070000006700000016000000610D6D693F0000000C000000410000000000000047000000110000004800000013000000040000000800000000D081450B00000014AE173F1D0000000000803F1E000000CDCCCC3D";

pub const MAUL_TEMPLATE: u32 = 10097;

pub fn maul_blob() -> Vec<u8> {
    hex::decode(MAUL_HEX).unwrap()
}

pub fn int(v: i32) -> [u8; 4] {
    v.to_le_bytes()
}

pub fn float(v: f32) -> [u8; 4] {
    v.to_le_bytes()
}

/// Builds blobs in the stored layout.
pub struct BlobBuilder {
    out: Vec<u8>,
}

impl BlobBuilder {
    pub fn new(class_path: &str, instance_name: &str) -> Self {
        let mut out = 1u32.to_le_bytes().to_vec();
        out.extend_from_slice(&HEADER_MAGIC);
        for s in [class_path, instance_name] {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Self { out }
    }

    /// First block, anchored on `template_id`.
    pub fn anchored(mut self, template_id: u32, pairs: &[(u32, [u8; 4])]) -> Self {
        self.out.extend_from_slice(&template_id.to_le_bytes());
        self.block(pairs)
    }

    pub fn block(mut self, pairs: &[(u32, [u8; 4])]) -> Self {
        self.out
            .extend_from_slice(&(pairs.len() as u32).to_le_bytes());
        for (id, raw) in pairs {
            self.out.extend_from_slice(&id.to_le_bytes());
            self.out.extend_from_slice(raw);
        }
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.out.extend_from_slice(bytes);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.out
    }
}

/// Scenario blob: a weapon carrying quantity 5 and durability 880.0.
pub fn sword_blob() -> Vec<u8> {
    BlobBuilder::new("Weapon", "Sword1")
        .anchored(10097, &[(1, int(5)), (8, float(880.0))])
        .build()
}

/// SQLite file shaped like the game's store, populated by the test.
pub struct SnapshotFixture {
    _dir: TempDir,
    pub path: PathBuf,
    conn: Connection,
}

impl SnapshotFixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("game.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE item_inventory (item_id INTEGER, owner_id INTEGER, inv_type INTEGER,
                 template_id INTEGER, data BLOB);
             CREATE TABLE characters (id INTEGER PRIMARY KEY, char_name TEXT, guild INTEGER);
             CREATE TABLE guilds (guildId INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE buildings (object_id INTEGER, owner_id INTEGER);
             CREATE TABLE actor_position (id INTEGER PRIMARY KEY, class TEXT);",
        )
        .unwrap();
        Self {
            _dir: dir,
            path,
            conn,
        }
    }

    pub fn character(self, id: i64, name: &str, guild: Option<i64>) -> Self {
        self.conn
            .execute(
                "INSERT INTO characters (id, char_name, guild) VALUES (?1, ?2, ?3)",
                params![id, name, guild],
            )
            .unwrap();
        self
    }

    pub fn guild(self, id: i64, name: &str) -> Self {
        self.conn
            .execute(
                "INSERT INTO guilds (guildId, name) VALUES (?1, ?2)",
                params![id, name],
            )
            .unwrap();
        self
    }

    pub fn building(self, object_id: i64, owner_id: i64, class: &str) -> Self {
        self.conn
            .execute(
                "INSERT INTO buildings (object_id, owner_id) VALUES (?1, ?2)",
                params![object_id, owner_id],
            )
            .unwrap();
        self.conn
            .execute(
                "INSERT INTO actor_position (id, class) VALUES (?1, ?2)",
                params![object_id, class],
            )
            .unwrap();
        self
    }

    pub fn item(
        self,
        owner_id: i64,
        slot: i64,
        inventory: InventoryType,
        template_id: u32,
        data: &[u8],
    ) -> Self {
        self.conn
            .execute(
                "INSERT INTO item_inventory (item_id, owner_id, inv_type, template_id, data)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![slot, owner_id, inventory.code(), template_id, data],
            )
            .unwrap();
        self
    }

    pub fn open(&self) -> SnapshotDb {
        SnapshotDb::open(&self.path).unwrap()
    }
}

/// Timings that keep async tests fast.
pub fn quick_settings() -> DuplicationSettings {
    DuplicationSettings {
        sync_delay: Duration::from_millis(2),
        sync_attempts: 3,
        sync_backoff: 1.0,
        ..DuplicationSettings::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Spawn { template_id: u32, player_index: u32 },
    Resolve { token: u64 },
    Int { slot: i64, id: u32, value: i32 },
    Float { slot: i64, id: u32, value: f32 },
}

/// Fake command channel. Spawned items land in a slot equal to their ticket token, so
/// concurrent jobs can be told apart.
#[derive(Default)]
pub struct RecordingChannel {
    calls: Mutex<Vec<Call>>,
    reject_spawn: bool,
    reject_ids: BTreeSet<u32>,
    /// Resolution attempts answered "not visible yet" before the handle shows up.
    hidden_for: u32,
    /// Lag added to every request.
    latency: Duration,
    tokens: AtomicU64,
    attempts: Mutex<HashMap<u64, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Fires the handle once this many applies have gone through.
    abort_after: Option<(usize, AbortHandle)>,
    applies: AtomicUsize,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_spawn(mut self) -> Self {
        self.reject_spawn = true;
        self
    }

    pub fn rejecting(mut self, ids: &[u32]) -> Self {
        self.reject_ids.extend(ids.iter().copied());
        self
    }

    pub fn hidden_for(mut self, attempts: u32) -> Self {
        self.hidden_for = attempts;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn aborting_after(mut self, applies: usize, handle: AbortHandle) -> Self {
        self.abort_after = Some((applies, handle));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Apply calls only, as (id, value bits).
    pub fn applied(&self) -> Vec<(u32, u32)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Int { id, value, .. } => Some((id, value as u32)),
                Call::Float { id, value, .. } => Some((id, value.to_bits())),
                _ => None,
            })
            .collect()
    }

    pub fn applied_to(&self, slot: i64) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Int { slot: s, id, .. } | Call::Float { slot: s, id, .. } if s == slot => {
                    Some(id)
                }
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self, call: Call) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn count_apply(&self) {
        let done = self.applies.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, handle)) = &self.abort_after {
            if done >= *limit {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl CommandChannel for RecordingChannel {
    async fn spawn(
        &self,
        template_id: u32,
        destination: &Destination,
    ) -> Result<SpawnTicket, ChannelError> {
        self.enter(Call::Spawn {
            template_id,
            player_index: destination.player_index,
        })
        .await;
        if self.reject_spawn {
            return Err(ChannelError::Rejected("inventory full".to_string()));
        }
        let token = self.tokens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SpawnTicket {
            template_id,
            destination: destination.clone(),
            token,
        })
    }

    async fn resolve_handle(
        &self,
        ticket: &SpawnTicket,
    ) -> Result<Option<ItemHandle>, ChannelError> {
        self.enter(Call::Resolve {
            token: ticket.token,
        })
        .await;
        let seen = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(ticket.token).or_insert(0);
            *n += 1;
            *n
        };
        if seen <= self.hidden_for {
            return Ok(None);
        }
        Ok(Some(ItemHandle {
            player_index: ticket.destination.player_index,
            slot: ticket.token as i64,
            inventory: InventoryType::Backpack,
        }))
    }

    async fn apply_int_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: i32,
    ) -> Result<(), ChannelError> {
        self.enter(Call::Int {
            slot: handle.slot,
            id: property_id,
            value,
        })
        .await;
        self.count_apply();
        if self.reject_ids.contains(&property_id) {
            return Err(ChannelError::Rejected(format!("stat {property_id}")));
        }
        Ok(())
    }

    async fn apply_float_stat(
        &self,
        handle: &ItemHandle,
        property_id: u32,
        value: f32,
    ) -> Result<(), ChannelError> {
        self.enter(Call::Float {
            slot: handle.slot,
            id: property_id,
            value,
        })
        .await;
        self.count_apply();
        if self.reject_ids.contains(&property_id) {
            return Err(ChannelError::Rejected(format!("stat {property_id}")));
        }
        Ok(())
    }
}
