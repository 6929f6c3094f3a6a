//! SQLite-backed favorites store.
//!
//! Every mutation runs inside a transaction that is rolled back when any
//! statement fails, so callers never observe a partially applied change.

use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::StoreError;
use crate::track::TrackRecord;

const FAVORITES_TABLE: &str = "tb_collect_playlist";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Favorite row as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoriteEntry {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub picture_url: String,
    pub lyricist: String,
    pub composer: String,
    pub play_url: String,
    /// SQLite `CURRENT_TIMESTAMP` text (`YYYY-MM-DD HH:MM:SS`, UTC).
    pub created_at: String,
    /// Reserved for soft delete; always `true` for rows written by this crate.
    pub active: bool,
}

impl FavoriteEntry {
    pub fn to_track(&self) -> TrackRecord {
        TrackRecord::new(
            &self.title,
            &self.author,
            self.picture_url.clone(),
            self.lyricist.clone(),
            self.composer.clone(),
            self.play_url.clone(),
        )
    }
}

/// Column values for a favorite that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFavorite {
    pub title: String,
    pub author: String,
    pub picture_url: String,
    pub lyricist: String,
    pub composer: String,
    pub play_url: String,
}

impl From<&TrackRecord> for NewFavorite {
    fn from(track: &TrackRecord) -> Self {
        Self {
            title: track.title().to_string(),
            author: track.author().to_string(),
            picture_url: track.picture_url().to_string(),
            lyricist: track.lyricist().to_string(),
            composer: track.composer().to_string(),
            play_url: track.play_url().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FavoriteOrder {
    /// Insertion order.
    #[default]
    Id,
    NewestFirst,
    Title,
}

impl FavoriteOrder {
    fn order_by_clause(self) -> &'static str {
        match self {
            FavoriteOrder::Id => "id ASC",
            FavoriteOrder::NewestFirst => "create_time DESC, id DESC",
            FavoriteOrder::Title => "title ASC, id ASC",
        }
    }
}

pub struct DbManager {
    conn: Connection,
}

impl DbManager {
    /// Opens (creating if needed) the database file and its schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        debug!("Opened favorites store at {}", path.display());
        Ok(db_manager)
    }

    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db_manager = Self { conn };
        db_manager.initialize_schema()?;
        Ok(db_manager)
    }

    fn initialize_schema(&self) -> Result<(), StoreError> {
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {FAVORITES_TABLE} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title VARCHAR(255),
                    author VARCHAR(255),
                    pic VARCHAR(255),
                    wording VARCHAR(255),
                    musicing VARCHAR(255),
                    play_url VARCHAR(255),
                    create_time TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                    active BOOLEAN DEFAULT 1
                )"
            ),
            [],
        )?;
        Ok(())
    }

    fn insert_statement() -> String {
        format!(
            "INSERT INTO {FAVORITES_TABLE} (title, author, pic, wording, musicing, play_url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        )
    }

    /// Stores one favorite and returns its id. Duplicates are permitted.
    pub fn insert_favorite(&mut self, entry: &NewFavorite) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            &Self::insert_statement(),
            params![
                entry.title,
                entry.author,
                entry.picture_url,
                entry.lyricist,
                entry.composer,
                entry.play_url
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        info!("Favorite stored: {} - {} (id {})", entry.title, entry.author, id);
        Ok(id)
    }

    /// Stores all entries or none of them.
    pub fn insert_favorites(&mut self, entries: &[NewFavorite]) -> Result<usize, StoreError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx.prepare(&Self::insert_statement())?;
            for entry in entries {
                inserted += stmt.execute(params![
                    entry.title,
                    entry.author,
                    entry.picture_url,
                    entry.lyricist,
                    entry.composer,
                    entry.play_url
                ])?;
            }
        }
        tx.commit()?;
        info!("Batch stored {} favorites", inserted);
        Ok(inserted)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<FavoriteEntry> {
        Ok(FavoriteEntry {
            id: row.get(0)?,
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            author: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            picture_url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            lyricist: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            composer: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
            play_url: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
            created_at: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            active: row.get::<_, Option<bool>>(8)?.unwrap_or(true),
        })
    }

    fn select_columns() -> String {
        format!(
            "SELECT id, title, author, pic, wording, musicing, play_url, create_time, active
             FROM {FAVORITES_TABLE}"
        )
    }

    pub fn get_favorite(&self, id: i64) -> Result<Option<FavoriteEntry>, StoreError> {
        let entry = self
            .conn
            .query_row(
                &format!("{} WHERE id = ?1", Self::select_columns()),
                params![id],
                Self::map_row,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn list_favorites(&self, order: FavoriteOrder) -> Result<Vec<FavoriteEntry>, StoreError> {
        let mut stmt = self.conn.prepare(&format!(
            "{} ORDER BY {}",
            Self::select_columns(),
            order.order_by_clause()
        ))?;
        let entry_iter = stmt.query_map([], Self::map_row)?;

        let mut entries = Vec::new();
        for entry in entry_iter {
            entries.push(entry?);
        }
        debug!("Listed {} favorites", entries.len());
        Ok(entries)
    }

    /// Removes one row; returns the number of rows deleted (0 or 1).
    pub fn delete_favorite(&mut self, id: i64) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            &format!("DELETE FROM {FAVORITES_TABLE} WHERE id = ?1"),
            params![id],
        )?;
        tx.commit()?;
        info!("Deleted {} favorite rows for id {}", deleted, id);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::{DbManager, FavoriteOrder, NewFavorite};
    use crate::track::TrackRecord;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_db_path(name: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be valid")
            .as_nanos();
        std::env::temp_dir().join(format!("freetune_{name}_{nonce}.db"))
    }

    fn sample(title: &str) -> NewFavorite {
        NewFavorite {
            title: title.to_string(),
            author: "赵雷".to_string(),
            picture_url: "http://p/a==/1.jpg?param=300x300".to_string(),
            lyricist: "赵雷".to_string(),
            composer: "赵雷".to_string(),
            play_url: format!("http://m/{title}.mp3"),
        }
    }

    #[test]
    fn test_insert_then_list_round_trips_all_fields() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        let input = sample("成都");
        let id = db.insert_favorite(&input).expect("insert");

        let listed = db.list_favorites(FavoriteOrder::Id).expect("list");
        let entry = listed
            .iter()
            .find(|entry| entry.id == id)
            .expect("inserted entry is listed");
        assert_eq!(entry.title, input.title);
        assert_eq!(entry.author, input.author);
        assert_eq!(entry.picture_url, input.picture_url);
        assert_eq!(entry.lyricist, input.lyricist);
        assert_eq!(entry.composer, input.composer);
        assert_eq!(entry.play_url, input.play_url);
        assert!(entry.active);
        assert!(!entry.created_at.is_empty());
    }

    #[test]
    fn test_duplicates_are_permitted() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        let first = db.insert_favorite(&sample("成都")).expect("first insert");
        let second = db.insert_favorite(&sample("成都")).expect("second insert");
        assert_ne!(first, second);
        assert_eq!(db.list_favorites(FavoriteOrder::Id).expect("list").len(), 2);
    }

    #[test]
    fn test_list_orders() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        db.insert_favorites(&[sample("b"), sample("a"), sample("c")])
            .expect("batch insert");

        let by_id: Vec<String> = db
            .list_favorites(FavoriteOrder::Id)
            .expect("list")
            .into_iter()
            .map(|entry| entry.title)
            .collect();
        assert_eq!(by_id, vec!["b", "a", "c"]);

        let by_title: Vec<String> = db
            .list_favorites(FavoriteOrder::Title)
            .expect("list")
            .into_iter()
            .map(|entry| entry.title)
            .collect();
        assert_eq!(by_title, vec!["a", "b", "c"]);

        let newest: Vec<String> = db
            .list_favorites(FavoriteOrder::NewestFirst)
            .expect("list")
            .into_iter()
            .map(|entry| entry.title)
            .collect();
        assert_eq!(newest, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_get_and_delete_single_favorite() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        let id = db.insert_favorite(&sample("成都")).expect("insert");

        assert_eq!(
            db.get_favorite(id).expect("select").map(|entry| entry.title),
            Some("成都".to_string())
        );
        assert_eq!(db.delete_favorite(id).expect("delete"), 1);
        assert_eq!(db.delete_favorite(id).expect("delete again"), 0);
        assert!(db.get_favorite(id).expect("select").is_none());
    }

    #[test]
    fn test_failed_batch_is_rolled_back() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        db.conn
            .execute_batch(
                "CREATE TRIGGER reject_boom BEFORE INSERT ON tb_collect_playlist
                 WHEN NEW.title = 'boom'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .expect("trigger should be created");

        let result = db.insert_favorites(&[sample("ok"), sample("boom")]);

        assert!(result.is_err());
        assert!(db.list_favorites(FavoriteOrder::Id).expect("list").is_empty());
        assert!(db.insert_favorite(&sample("after")).is_ok());
    }

    #[test]
    fn test_two_handles_share_one_file() {
        let path = unique_db_path("store_handles");
        let mut writer = DbManager::open(&path).expect("first handle");
        let reader = DbManager::open(&path).expect("second handle reuses schema");

        let id = writer.insert_favorite(&sample("成都")).expect("insert");

        let listed = reader.list_favorites(FavoriteOrder::Id).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        drop(reader);
        drop(writer);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_entry_converts_back_to_track() {
        let mut db = DbManager::new_in_memory().expect("in-memory db");
        let track = TrackRecord::new("成都", "赵雷", "pic", "词", "曲", "http://m/1.mp3");
        let id = db
            .insert_favorite(&NewFavorite::from(&track))
            .expect("insert");
        let entry = db.get_favorite(id).expect("select").expect("present");
        assert_eq!(entry.to_track(), track);
    }
}
