//! rusqlite session store for the wa-rs client.
//!
//! Implements the four wa-rs-core storage traits over a compact schema: one
//! generic `signal_records` table keyed by record kind instead of a table per
//! kind (nothing ever queries across kinds), and a single linked-device row
//! with the three keypairs packed into one blob. The store also carries the
//! relay's chat directory — the (jid, display name) pairs that back fuzzy
//! contact resolution, refreshed from message traffic.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use prost::Message;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use wa_rs_binary::jid::Jid;
use wa_rs_core::appstate::hash::HashState;
use wa_rs_core::appstate::processor::AppStateMutationMAC;
use wa_rs_core::store::error::{Result as StoreResult, StoreError};
use wa_rs_core::store::traits::DeviceStore as DeviceStoreTrait;
use wa_rs_core::store::traits::*;
use wa_rs_core::store::Device as CoreDevice;

use super::ChatRecord;

/// Record kinds stored in `signal_records`. The address column holds a peer
/// address for the keyed kinds and a numeric id rendered as text for the
/// prekey kinds.
const KIND_IDENTITY: &str = "identity";
const KIND_SESSION: &str = "session";
const KIND_PREKEY: &str = "prekey";
const KIND_SIGNED_PREKEY: &str = "signed_prekey";
const KIND_SENDER_KEY: &str = "sender_key";

#[derive(Clone)]
pub struct SessionStore {
    db_path: String,
    conn: Arc<Mutex<Connection>>,
}

fn db_err(e: impl ToString) -> StoreError {
    StoreError::Database(e.to_string())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

impl SessionStore {
    /// Open (or create) the session database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = Path::new(&db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        let store = Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS linked_device (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                lid TEXT,
                pn TEXT,
                registration_id INTEGER NOT NULL,
                key_material BLOB NOT NULL,
                signed_pre_key_id INTEGER NOT NULL,
                signed_pre_key_signature BLOB NOT NULL,
                adv_secret_key BLOB NOT NULL,
                account BLOB,
                push_name TEXT NOT NULL,
                app_version_primary INTEGER NOT NULL,
                app_version_secondary INTEGER NOT NULL,
                app_version_tertiary INTEGER NOT NULL,
                app_version_last_fetched_ms INTEGER NOT NULL,
                edge_routing_info BLOB,
                props_hash TEXT
            );

            CREATE TABLE IF NOT EXISTS signal_records (
                kind TEXT NOT NULL,
                address TEXT NOT NULL,
                record BLOB NOT NULL,
                uploaded INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (kind, address)
            );

            CREATE TABLE IF NOT EXISTS app_sync_keys (
                key_id BLOB PRIMARY KEY,
                key_data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS app_state_versions (
                name TEXT PRIMARY KEY,
                state_data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS app_state_macs (
                name TEXT NOT NULL,
                version INTEGER NOT NULL,
                index_mac BLOB NOT NULL,
                value_mac BLOB NOT NULL,
                PRIMARY KEY (name, index_mac)
            );

            CREATE TABLE IF NOT EXISTS skdm_recipients (
                group_jid TEXT NOT NULL,
                device_jid TEXT NOT NULL,
                PRIMARY KEY (group_jid, device_jid)
            );

            CREATE TABLE IF NOT EXISTS lid_pn_map (
                lid TEXT PRIMARY KEY,
                phone_number TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                learning_source TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS base_keys (
                address TEXT NOT NULL,
                message_id TEXT NOT NULL,
                base_key BLOB NOT NULL,
                PRIMARY KEY (address, message_id)
            );

            CREATE TABLE IF NOT EXISTS device_lists (
                user_id TEXT PRIMARY KEY,
                devices_json TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                phash TEXT
            );

            CREATE TABLE IF NOT EXISTS forget_marks (
                group_jid TEXT NOT NULL,
                participant TEXT NOT NULL,
                PRIMARY KEY (group_jid, participant)
            );

            CREATE TABLE IF NOT EXISTS tc_tokens (
                jid TEXT PRIMARY KEY,
                token BLOB NOT NULL,
                token_timestamp INTEGER NOT NULL,
                sender_timestamp INTEGER
            );

            CREATE TABLE IF NOT EXISTS chat_directory (
                jid TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                last_activity INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    // ── Chat directory ────────────────────────────────────────

    /// Upsert a chat observed from message traffic.
    pub fn record_chat(&self, jid: &str, display_name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chat_directory (jid, display_name, last_activity)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(jid) DO UPDATE SET
                display_name = excluded.display_name,
                last_activity = excluded.last_activity",
            params![jid, display_name, unix_now()],
        )?;
        Ok(())
    }

    /// All known chats, most recently active first. Read fresh on every call
    /// so fuzzy resolution tracks live ordering.
    pub fn list_chats(&self) -> Result<Vec<ChatRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT jid, display_name FROM chat_directory
             ORDER BY last_activity DESC, jid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ChatRecord {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // ── signal_records helpers ────────────────────────────────

    fn put_record(&self, kind: &str, address: &str, record: &[u8]) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO signal_records (kind, address, record)
             VALUES (?1, ?2, ?3)",
            params![kind, address, record],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    fn get_record(&self, kind: &str, address: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT record FROM signal_records WHERE kind = ?1 AND address = ?2",
            params![kind, address],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    fn delete_record(&self, kind: &str, address: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM signal_records WHERE kind = ?1 AND address = ?2",
            params![kind, address],
        )
        .map(|_| ())
        .map_err(db_err)
    }
}

#[async_trait]
impl SignalStore for SessionStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> StoreResult<()> {
        self.put_record(KIND_IDENTITY, address, &key)
    }

    async fn load_identity(&self, address: &str) -> StoreResult<Option<Vec<u8>>> {
        self.get_record(KIND_IDENTITY, address)
    }

    async fn delete_identity(&self, address: &str) -> StoreResult<()> {
        self.delete_record(KIND_IDENTITY, address)
    }

    async fn get_session(&self, address: &str) -> StoreResult<Option<Vec<u8>>> {
        self.get_record(KIND_SESSION, address)
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> StoreResult<()> {
        self.put_record(KIND_SESSION, address, session)
    }

    async fn delete_session(&self, address: &str) -> StoreResult<()> {
        self.delete_record(KIND_SESSION, address)
    }

    async fn store_prekey(&self, id: u32, record: &[u8], uploaded: bool) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO signal_records (kind, address, record, uploaded)
             VALUES (?1, ?2, ?3, ?4)",
            params![KIND_PREKEY, id.to_string(), record, uploaded],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn load_prekey(&self, id: u32) -> StoreResult<Option<Vec<u8>>> {
        self.get_record(KIND_PREKEY, &id.to_string())
    }

    async fn remove_prekey(&self, id: u32) -> StoreResult<()> {
        self.delete_record(KIND_PREKEY, &id.to_string())
    }

    async fn store_signed_prekey(&self, id: u32, record: &[u8]) -> StoreResult<()> {
        self.put_record(KIND_SIGNED_PREKEY, &id.to_string(), record)
    }

    async fn load_signed_prekey(&self, id: u32) -> StoreResult<Option<Vec<u8>>> {
        self.get_record(KIND_SIGNED_PREKEY, &id.to_string())
    }

    async fn load_all_signed_prekeys(&self) -> StoreResult<Vec<(u32, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT address, record FROM signal_records WHERE kind = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![KIND_SIGNED_PREKEY], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .map_err(db_err)?;

        let mut result = Vec::new();
        for row in rows {
            let (address, record) = row.map_err(db_err)?;
            let id = address
                .parse::<u32>()
                .map_err(|e| db_err(format!("bad signed prekey id `{address}`: {e}")))?;
            result.push((id, record));
        }
        Ok(result)
    }

    async fn remove_signed_prekey(&self, id: u32) -> StoreResult<()> {
        self.delete_record(KIND_SIGNED_PREKEY, &id.to_string())
    }

    async fn put_sender_key(&self, address: &str, record: &[u8]) -> StoreResult<()> {
        self.put_record(KIND_SENDER_KEY, address, record)
    }

    async fn get_sender_key(&self, address: &str) -> StoreResult<Option<Vec<u8>>> {
        self.get_record(KIND_SENDER_KEY, address)
    }

    async fn delete_sender_key(&self, address: &str) -> StoreResult<()> {
        self.delete_record(KIND_SENDER_KEY, address)
    }
}

#[async_trait]
impl AppSyncStore for SessionStore {
    async fn get_sync_key(&self, key_id: &[u8]) -> StoreResult<Option<AppStateSyncKey>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT key_data FROM app_sync_keys WHERE key_id = ?1",
            params![key_id],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(data) => Ok(Some(serde_json::from_slice(&data).map_err(db_err)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn set_sync_key(&self, key_id: &[u8], key: AppStateSyncKey) -> StoreResult<()> {
        let data = serde_json::to_vec(&key).map_err(db_err)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO app_sync_keys (key_id, key_data) VALUES (?1, ?2)",
            params![key_id, data],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn get_version(&self, name: &str) -> StoreResult<HashState> {
        let conn = self.conn.lock();
        let data: Vec<u8> = conn
            .query_row(
                "SELECT state_data FROM app_state_versions WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        serde_json::from_slice(&data).map_err(db_err)
    }

    async fn set_version(&self, name: &str, state: HashState) -> StoreResult<()> {
        let data = serde_json::to_vec(&state).map_err(db_err)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO app_state_versions (name, state_data) VALUES (?1, ?2)",
            params![name, data],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn put_mutation_macs(
        &self,
        name: &str,
        version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        let version = i64::try_from(version).unwrap_or(i64::MAX);
        for mutation in mutations {
            conn.execute(
                "INSERT OR REPLACE INTO app_state_macs (name, version, index_mac, value_mac)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, version, mutation.index_mac, mutation.value_mac],
            )
            .map(|_| ())
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn get_mutation_mac(&self, name: &str, index_mac: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT value_mac FROM app_state_macs WHERE name = ?1 AND index_mac = ?2",
            params![name, index_mac],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(mac) => Ok(Some(mac)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn delete_mutation_macs(&self, name: &str, index_macs: &[Vec<u8>]) -> StoreResult<()> {
        let conn = self.conn.lock();
        for index_mac in index_macs {
            conn.execute(
                "DELETE FROM app_state_macs WHERE name = ?1 AND index_mac = ?2",
                params![name, index_mac],
            )
            .map(|_| ())
            .map_err(db_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ProtocolStore for SessionStore {
    async fn get_skdm_recipients(&self, group_jid: &str) -> StoreResult<Vec<Jid>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT device_jid FROM skdm_recipients WHERE group_jid = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![group_jid], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut result = Vec::new();
        for row in rows {
            let jid_str = row.map_err(db_err)?;
            if let Ok(jid) = jid_str.parse() {
                result.push(jid);
            }
        }
        Ok(result)
    }

    async fn add_skdm_recipients(&self, group_jid: &str, device_jids: &[Jid]) -> StoreResult<()> {
        let conn = self.conn.lock();
        for device_jid in device_jids {
            conn.execute(
                "INSERT OR IGNORE INTO skdm_recipients (group_jid, device_jid) VALUES (?1, ?2)",
                params![group_jid, device_jid.to_string()],
            )
            .map(|_| ())
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn clear_skdm_recipients(&self, group_jid: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM skdm_recipients WHERE group_jid = ?1",
            params![group_jid],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn get_lid_mapping(&self, lid: &str) -> StoreResult<Option<LidPnMappingEntry>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT lid, phone_number, created_at, learning_source, updated_at
             FROM lid_pn_map WHERE lid = ?1",
            params![lid],
            |row| {
                Ok(LidPnMappingEntry {
                    lid: row.get(0)?,
                    phone_number: row.get(1)?,
                    created_at: row.get(2)?,
                    learning_source: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_pn_mapping(&self, phone: &str) -> StoreResult<Option<LidPnMappingEntry>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT lid, phone_number, created_at, learning_source, updated_at
             FROM lid_pn_map WHERE phone_number = ?1
             ORDER BY updated_at DESC LIMIT 1",
            params![phone],
            |row| {
                Ok(LidPnMappingEntry {
                    lid: row.get(0)?,
                    phone_number: row.get(1)?,
                    created_at: row.get(2)?,
                    learning_source: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            },
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn put_lid_mapping(&self, entry: &LidPnMappingEntry) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO lid_pn_map
             (lid, phone_number, created_at, learning_source, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.lid,
                entry.phone_number,
                entry.created_at,
                entry.learning_source,
                entry.updated_at,
            ],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn get_all_lid_mappings(&self) -> StoreResult<Vec<LidPnMappingEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT lid, phone_number, created_at, learning_source, updated_at
                 FROM lid_pn_map",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LidPnMappingEntry {
                    lid: row.get(0)?,
                    phone_number: row.get(1)?,
                    created_at: row.get(2)?,
                    learning_source: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })
            .map_err(db_err)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(db_err)?);
        }
        Ok(result)
    }

    async fn save_base_key(
        &self,
        address: &str,
        message_id: &str,
        base_key: &[u8],
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO base_keys (address, message_id, base_key)
             VALUES (?1, ?2, ?3)",
            params![address, message_id, base_key],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn has_same_base_key(
        &self,
        address: &str,
        message_id: &str,
        current_base_key: &[u8],
    ) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT base_key FROM base_keys WHERE address = ?1 AND message_id = ?2",
            params![address, message_id],
            |row| {
                let saved: Vec<u8> = row.get(0)?;
                Ok(saved == current_base_key)
            },
        );
        match result {
            Ok(same) => Ok(same),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn delete_base_key(&self, address: &str, message_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM base_keys WHERE address = ?1 AND message_id = ?2",
            params![address, message_id],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn update_device_list(&self, record: DeviceListRecord) -> StoreResult<()> {
        let devices_json = serde_json::to_string(&record.devices).map_err(db_err)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO device_lists (user_id, devices_json, timestamp, phash)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.user, devices_json, record.timestamp, record.phash],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn get_devices(&self, user: &str) -> StoreResult<Option<DeviceListRecord>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT user_id, devices_json, timestamp, phash FROM device_lists WHERE user_id = ?1",
            params![user],
            |row| {
                let devices_json: String = row.get(1)?;
                let devices: Vec<DeviceInfo> = serde_json::from_str(&devices_json)
                    .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                Ok(DeviceListRecord {
                    user: row.get(0)?,
                    devices,
                    timestamp: row.get(2)?,
                    phash: row.get(3)?,
                })
            },
        );
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn mark_forget_sender_key(
        &self,
        group_jid: &str,
        participant: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO forget_marks (group_jid, participant) VALUES (?1, ?2)",
            params![group_jid, participant],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn consume_forget_marks(&self, group_jid: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT participant FROM forget_marks WHERE group_jid = ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![group_jid], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(db_err)?);
        }

        conn.execute(
            "DELETE FROM forget_marks WHERE group_jid = ?1",
            params![group_jid],
        )
        .map_err(db_err)?;

        Ok(result)
    }

    async fn get_tc_token(&self, jid: &str) -> StoreResult<Option<TcTokenEntry>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT token, token_timestamp, sender_timestamp FROM tc_tokens WHERE jid = ?1",
            params![jid],
            |row| {
                Ok(TcTokenEntry {
                    token: row.get(0)?,
                    token_timestamp: row.get(1)?,
                    sender_timestamp: row.get(2)?,
                })
            },
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn put_tc_token(&self, jid: &str, entry: &TcTokenEntry) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO tc_tokens (jid, token, token_timestamp, sender_timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                jid,
                entry.token,
                entry.token_timestamp,
                entry.sender_timestamp
            ],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn delete_tc_token(&self, jid: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM tc_tokens WHERE jid = ?1", params![jid])
            .map(|_| ())
            .map_err(db_err)
    }

    async fn get_all_tc_token_jids(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT jid FROM tc_tokens")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(db_err)?);
        }
        Ok(result)
    }

    async fn delete_expired_tc_tokens(&self, cutoff_timestamp: i64) -> StoreResult<u32> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM tc_tokens WHERE token_timestamp < ?1",
                params![cutoff_timestamp],
            )
            .map_err(db_err)?;
        u32::try_from(deleted).map_err(|_| db_err(format!("deleted row count overflow: {deleted}")))
    }
}

#[async_trait]
impl DeviceStoreTrait for SessionStore {
    async fn save(&self, device: &CoreDevice) -> StoreResult<()> {
        // The three keypairs are packed into one blob: 64 bytes each
        // (private || public), noise then identity then signed-pre.
        let mut key_material = Vec::with_capacity(192);
        for pair in [
            &device.noise_key,
            &device.identity_key,
            &device.signed_pre_key,
        ] {
            let private = pair.private_key.serialize();
            key_material.extend_from_slice(private.as_slice());
            key_material.extend_from_slice(pair.public_key.public_key_bytes());
        }

        let account = device.account.as_ref().map(|a| a.encode_to_vec());

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO linked_device (
                id, lid, pn, registration_id, key_material,
                signed_pre_key_id, signed_pre_key_signature, adv_secret_key,
                account, push_name, app_version_primary, app_version_secondary,
                app_version_tertiary, app_version_last_fetched_ms,
                edge_routing_info, props_hash
            ) VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                device.lid.as_ref().map(|j| j.to_string()),
                device.pn.as_ref().map(|j| j.to_string()),
                device.registration_id,
                key_material,
                device.signed_pre_key_id,
                device.signed_pre_key_signature.to_vec(),
                device.adv_secret_key.to_vec(),
                account,
                &device.push_name,
                device.app_version_primary,
                device.app_version_secondary,
                device.app_version_tertiary,
                device.app_version_last_fetched_ms,
                device.edge_routing_info.as_ref().cloned(),
                device.props_hash.as_ref().cloned(),
            ],
        )
        .map(|_| ())
        .map_err(db_err)
    }

    async fn load(&self) -> StoreResult<Option<CoreDevice>> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT * FROM linked_device WHERE id = 1",
            [],
            |row| {
                fn to_rusqlite_err<E: std::error::Error + Send + Sync + 'static>(
                    e: E,
                ) -> rusqlite::Error {
                    rusqlite::Error::ToSqlConversionFailure(Box::new(e))
                }

                let key_material: Vec<u8> = row.get("key_material")?;
                if key_material.len() != 192 {
                    return Err(rusqlite::Error::InvalidParameterName(
                        "key_material".into(),
                    ));
                }

                use wa_rs_core::libsignal::protocol::{KeyPair, PrivateKey, PublicKey};

                let unpack = |chunk: &[u8]| -> Result<KeyPair, rusqlite::Error> {
                    Ok(KeyPair::new(
                        PublicKey::from_djb_public_key_bytes(&chunk[32..64])
                            .map_err(to_rusqlite_err)?,
                        PrivateKey::deserialize(&chunk[0..32]).map_err(to_rusqlite_err)?,
                    ))
                };
                let noise_key = unpack(&key_material[0..64])?;
                let identity_key = unpack(&key_material[64..128])?;
                let signed_pre_key = unpack(&key_material[128..192])?;

                let lid_str: Option<String> = row.get("lid")?;
                let pn_str: Option<String> = row.get("pn")?;
                let signature_bytes: Vec<u8> = row.get("signed_pre_key_signature")?;
                let adv_secret_bytes: Vec<u8> = row.get("adv_secret_key")?;
                let account_bytes: Option<Vec<u8>> = row.get("account")?;

                if signature_bytes.len() != 64 || adv_secret_bytes.len() != 32 {
                    return Err(rusqlite::Error::InvalidParameterName(
                        "device key sizes".into(),
                    ));
                }
                let mut signature = [0u8; 64];
                let mut adv_secret = [0u8; 32];
                signature.copy_from_slice(&signature_bytes);
                adv_secret.copy_from_slice(&adv_secret_bytes);

                let account = match account_bytes {
                    Some(bytes) => Some(
                        wa_rs_proto::whatsapp::AdvSignedDeviceIdentity::decode(&*bytes)
                            .map_err(to_rusqlite_err)?,
                    ),
                    None => None,
                };

                Ok(CoreDevice {
                    lid: lid_str.and_then(|s| s.parse().ok()),
                    pn: pn_str.and_then(|s| s.parse().ok()),
                    registration_id: row.get("registration_id")?,
                    noise_key,
                    identity_key,
                    signed_pre_key,
                    signed_pre_key_id: row.get("signed_pre_key_id")?,
                    signed_pre_key_signature: signature,
                    adv_secret_key: adv_secret,
                    account,
                    push_name: row.get("push_name")?,
                    app_version_primary: row.get("app_version_primary")?,
                    app_version_secondary: row.get("app_version_secondary")?,
                    app_version_tertiary: row.get("app_version_tertiary")?,
                    app_version_last_fetched_ms: row.get("app_version_last_fetched_ms")?,
                    edge_routing_info: row.get("edge_routing_info")?,
                    props_hash: row.get("props_hash")?,
                    ..Default::default()
                })
            },
        );

        match result {
            Ok(device) => Ok(Some(device)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn exists(&self) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM linked_device", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count > 0)
    }

    async fn create(&self) -> StoreResult<i32> {
        // Single-device store; the row is written on first save.
        Ok(1)
    }

    async fn snapshot_db(&self, name: &str, extra_content: Option<&[u8]>) -> StoreResult<()> {
        let snapshot_path = format!("{}.snapshot.{}", self.db_path, name);
        std::fs::copy(&self.db_path, &snapshot_path).map_err(db_err)?;

        if let Some(content) = extra_content {
            let content_path = format!("{snapshot_path}.extra");
            std::fs::write(&content_path, content).map_err(db_err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::NamedTempFile, SessionStore) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let store = SessionStore::open(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn open_creates_schema() {
        let (_tmp, store) = open_temp();
        assert!(store.list_chats().unwrap().is_empty());
    }

    #[test]
    fn chat_directory_upserts_and_orders_by_recency() {
        let (_tmp, store) = open_temp();
        store.record_chat("111@g.us", "Johnny Appleseed").unwrap();
        store.record_chat("222@c.us", "John Smith").unwrap();
        // Second sighting renames and refreshes activity.
        store.record_chat("111@g.us", "Johnny A.").unwrap();

        let chats = store.list_chats().unwrap();
        assert_eq!(chats.len(), 2);
        let names: Vec<_> = chats.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Johnny A."));
        assert!(names.contains(&"John Smith"));
    }

    #[tokio::test]
    async fn signal_records_round_trip_per_kind() {
        let (_tmp, store) = open_temp();
        store.put_session("peer.1", b"session-record").await.unwrap();
        store.put_identity("peer.1", [7u8; 32]).await.unwrap();

        assert_eq!(
            store.get_session("peer.1").await.unwrap().as_deref(),
            Some(b"session-record".as_slice())
        );
        assert_eq!(
            store.load_identity("peer.1").await.unwrap().as_deref(),
            Some([7u8; 32].as_slice())
        );

        // Same address, different kind — must not collide.
        store.delete_session("peer.1").await.unwrap();
        assert!(store.get_session("peer.1").await.unwrap().is_none());
        assert!(store.load_identity("peer.1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn signed_prekeys_enumerate_with_ids() {
        let (_tmp, store) = open_temp();
        store.store_signed_prekey(1, b"one").await.unwrap();
        store.store_signed_prekey(2, b"two").await.unwrap();

        let mut all = store.load_all_signed_prekeys().await.unwrap();
        all.sort_by_key(|(id, _)| *id);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], (1, b"one".to_vec()));
        assert_eq!(all[1], (2, b"two".to_vec()));
    }

    #[tokio::test]
    async fn delete_expired_tc_tokens_returns_deleted_row_count() {
        let (_tmp, store) = open_temp();
        let expired = TcTokenEntry {
            token: vec![1, 2, 3],
            token_timestamp: 10,
            sender_timestamp: None,
        };
        let fresh = TcTokenEntry {
            token: vec![4, 5, 6],
            token_timestamp: 1000,
            sender_timestamp: Some(1000),
        };

        store.put_tc_token("15550000001", &expired).await.unwrap();
        store.put_tc_token("15550000002", &fresh).await.unwrap();

        let deleted = store.delete_expired_tc_tokens(100).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_tc_token("15550000001").await.unwrap().is_none());
        assert!(store.get_tc_token("15550000002").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn exists_is_false_until_device_saved() {
        let (_tmp, store) = open_temp();
        assert!(!DeviceStoreTrait::exists(&store).await.unwrap());
        assert!(DeviceStoreTrait::load(&store).await.unwrap().is_none());
    }
}
