use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;

use super::config_store::SettingsStore;
use super::profile::Profile;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS app_settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS follows (
        pubkey TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS profiles (
        pubkey TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        about TEXT,
        icon_url TEXT NOT NULL
    );
";

pub fn open_settings_db(data_dir: &str) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(data_dir)?;
    let path = Path::new(data_dir).join("garnet.sqlite3");
    let conn = Connection::open(&path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

pub fn load_setting(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT value FROM app_settings WHERE key = ?1",
        [key],
        |row| row.get::<_, String>(0),
    )
    .ok()
}

pub fn save_setting(conn: &Connection, key: &str, value: &str) {
    if let Err(e) = conn.execute(
        "INSERT INTO app_settings (key, value)
         VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    ) {
        tracing::warn!(%e, key, "failed to save setting");
    }
}

pub fn delete_setting(conn: &Connection, key: &str) {
    if let Err(e) = conn.execute("DELETE FROM app_settings WHERE key = ?1", [key]) {
        tracing::warn!(%e, key, "failed to delete setting");
    }
}

// ── Follow cache ─────────────────────────────────────────────────────

pub fn load_follows(conn: &Connection) -> Vec<String> {
    let mut stmt = match conn.prepare("SELECT pubkey FROM follows ORDER BY pubkey") {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%e, "failed to prepare follows load query");
            return vec![];
        }
    };
    let rows = match stmt.query_map([], |row| row.get::<_, String>(0)) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(%e, "failed to query follows");
            return vec![];
        }
    };
    rows.flatten().collect()
}

pub fn save_follows(conn: &Connection, pubkeys: &[String]) {
    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => {
            tracing::warn!(%e, "failed to begin follows transaction");
            return;
        }
    };
    if let Err(e) = tx.execute("DELETE FROM follows", []) {
        tracing::warn!(%e, "failed to clear follows cache");
        return;
    }
    for pk in pubkeys {
        if let Err(e) = tx.execute("INSERT OR IGNORE INTO follows (pubkey) VALUES (?1)", [pk]) {
            tracing::warn!(%e, pubkey = pk, "failed to save follow");
            return;
        }
    }
    if let Err(e) = tx.commit() {
        tracing::warn!(%e, "failed to commit follows transaction");
    }
}

// ── Profile cache ────────────────────────────────────────────────────

pub fn load_profiles(conn: &Connection) -> HashMap<String, Profile> {
    let mut map = HashMap::new();
    let mut stmt = match conn.prepare("SELECT pubkey, name, about, icon_url FROM profiles") {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%e, "failed to prepare profile load query");
            return map;
        }
    };
    let rows = match stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, String>(3)?,
        ))
    }) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(%e, "failed to query profiles");
            return map;
        }
    };
    for (pubkey, name, about, icon_url) in rows.flatten() {
        map.insert(
            pubkey.clone(),
            Profile {
                pubkey,
                name,
                about,
                icon_url,
                not_found: false,
            },
        );
    }
    map
}

/// The not-found sentinel is never written; it has no key to store it under.
pub fn save_profile(conn: &Connection, profile: &Profile) {
    if profile.not_found || profile.pubkey.is_empty() {
        return;
    }
    if let Err(e) = conn.execute(
        "INSERT OR REPLACE INTO profiles (pubkey, name, about, icon_url)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![profile.pubkey, profile.name, profile.about, profile.icon_url],
    ) {
        tracing::warn!(%e, pubkey = %profile.pubkey, "failed to save profile");
    }
}

pub fn clear_caches(conn: &Connection) {
    if let Err(e) = conn.execute_batch("DELETE FROM profiles; DELETE FROM follows;") {
        tracing::warn!(%e, "failed to clear profile and follow caches");
    }
}

/// [`SettingsStore`] over the on-disk database.
pub struct SettingsDb {
    conn: Connection,
}

impl SettingsDb {
    pub fn open(data_dir: &str) -> anyhow::Result<Self> {
        Ok(Self {
            conn: open_settings_db(data_dir)?,
        })
    }
}

impl SettingsStore for SettingsDb {
    fn get(&self, key: &str) -> Option<String> {
        load_setting(&self.conn, key)
    }

    fn set(&mut self, key: &str, value: &str) {
        save_setting(&self.conn, key, value);
    }

    fn remove(&mut self, key: &str) {
        delete_setting(&self.conn, key);
    }

    fn load_follows(&self) -> Vec<String> {
        load_follows(&self.conn)
    }

    fn save_follows(&mut self, pubkeys: &[String]) {
        save_follows(&self.conn, pubkeys);
    }

    fn load_profiles(&self) -> HashMap<String, Profile> {
        load_profiles(&self.conn)
    }

    fn save_profile(&mut self, profile: &Profile) {
        save_profile(&self.conn, profile);
    }

    fn clear_caches(&mut self) {
        clear_caches(&self.conn);
    }
}
