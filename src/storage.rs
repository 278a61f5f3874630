//! SQLite storage layer for UniShare.
//!
//! Owns the authoritative rows behind every engagement counter. Aggregates
//! that the API exposes as counters are either counted live (`likes`) or
//! kept as denormalised columns that are recomputed from the edge table in
//! the same transaction as the edge mutation (`comment_count`,
//! `member_count`, `follower_count`, `following_count`), so a counter can
//! never drift from the rows it summarises.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::model::{Comment, Invitation, MemberRole, RedeemFailure};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StorageError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    NotFound(String),
    AlreadyExists(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Sqlite(e) => write!(f, "sqlite error: {e}"),
            StorageError::Io(e) => write!(f, "io error: {e}"),
            StorageError::NotFound(msg) => write!(f, "not found: {msg}"),
            StorageError::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Sqlite(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// Public profile of an authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub university_id: Option<String>,
    pub follower_count: u64,
    pub following_count: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRow {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub description: Option<String>,
    /// "notes", "solution", "link", ...
    pub resource_type: String,
    pub course_code: Option<String>,
    pub external_link: Option<String>,
    /// File name inside the storage file directory, once uploaded.
    pub file_name: Option<String>,
    pub file_content_type: Option<String>,
    pub is_public: bool,
    pub university_id: Option<String>,
    pub thumbnail_url: Option<String>,
    pub comment_count: u64,
    pub download_count: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Editable resource fields.
#[derive(Debug, Clone, Default)]
pub struct ResourceUpdate {
    pub title: String,
    pub description: Option<String>,
    pub resource_type: String,
    pub course_code: Option<String>,
    pub external_link: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyGroupRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub course_code: Option<String>,
    pub creator_id: String,
    pub is_private: bool,
    pub university_id: Option<String>,
    pub member_count: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRow {
    pub study_group_id: String,
    pub user_id: String,
    pub role: MemberRole,
    pub joined_at: u64,
}

/// In-app notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRow {
    pub id: i64,
    pub user_id: String,
    pub actor_id: Option<String>,
    /// "follow", "comment", "group_join"
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub is_read: bool,
    pub created_at: u64,
}

/// Result of an atomic invitation redemption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redemption {
    Joined { study_group_id: String },
    AlreadyMember { study_group_id: String },
    Rejected(RedeemFailure),
}

// ---------------------------------------------------------------------------
// Storage handle
// ---------------------------------------------------------------------------

pub struct Storage {
    conn: Connection,
    /// Directory holding uploaded resource files.
    pub files_dir: PathBuf,
}

const USER_COLUMNS: &str =
    "id, username, full_name, university_id, follower_count, following_count, created_at";

const RESOURCE_COLUMNS: &str = "id, author_id, title, description, resource_type, course_code,
     external_link, file_name, file_content_type, is_public, university_id, thumbnail_url,
     comment_count, download_count, created_at, updated_at";

const GROUP_COLUMNS: &str = "id, name, description, course_code, creator_id, is_private,
     university_id, member_count, created_at";

const INVITATION_COLUMNS: &str =
    "id, study_group_id, code, created_by, expires_at, max_uses, current_uses, created_at";

const NOTIFICATION_COLUMNS: &str =
    "id, user_id, actor_id, type, title, message, link, is_read, created_at";

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        full_name: row.get(2)?,
        university_id: row.get(3)?,
        follower_count: row.get::<_, i64>(4)? as u64,
        following_count: row.get::<_, i64>(5)? as u64,
        created_at: row.get::<_, i64>(6)? as u64,
    })
}

fn map_resource(row: &rusqlite::Row<'_>) -> rusqlite::Result<ResourceRow> {
    Ok(ResourceRow {
        id: row.get(0)?,
        author_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        resource_type: row.get(4)?,
        course_code: row.get(5)?,
        external_link: row.get(6)?,
        file_name: row.get(7)?,
        file_content_type: row.get(8)?,
        is_public: row.get::<_, i32>(9)? != 0,
        university_id: row.get(10)?,
        thumbnail_url: row.get(11)?,
        comment_count: row.get::<_, i64>(12)? as u64,
        download_count: row.get::<_, i64>(13)? as u64,
        created_at: row.get::<_, i64>(14)? as u64,
        updated_at: row.get::<_, i64>(15)? as u64,
    })
}

fn map_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudyGroupRow> {
    Ok(StudyGroupRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        course_code: row.get(3)?,
        creator_id: row.get(4)?,
        is_private: row.get::<_, i32>(5)? != 0,
        university_id: row.get(6)?,
        member_count: row.get::<_, i64>(7)? as u64,
        created_at: row.get::<_, i64>(8)? as u64,
    })
}

fn map_invitation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: row.get(0)?,
        study_group_id: row.get(1)?,
        code: row.get(2)?,
        created_by: row.get(3)?,
        expires_at: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        max_uses: row.get::<_, Option<i64>>(5)?.map(|v| v as u32),
        current_uses: row.get::<_, i64>(6)? as u32,
        created_at: row.get::<_, i64>(7)? as u64,
    })
}

fn map_notification(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        actor_id: row.get(2)?,
        notification_type: row.get(3)?,
        title: row.get(4)?,
        message: row.get(5)?,
        link: row.get(6)?,
        is_read: row.get::<_, i32>(7)? != 0,
        created_at: row.get::<_, i64>(8)? as u64,
    })
}

fn map_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRow> {
    let role: String = row.get(2)?;
    Ok(MemberRow {
        study_group_id: row.get(0)?,
        user_id: row.get(1)?,
        role: MemberRole::parse(&role).unwrap_or(MemberRole::Member),
        joined_at: row.get::<_, i64>(3)? as u64,
    })
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>, StorageError> {
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

fn like_pattern(search: &str) -> String {
    format!("%{}%", search.trim().to_lowercase())
}

impl Storage {
    /// Open or create a database at `path`; uploaded files live in a
    /// `files/` directory next to it.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let files_dir = path.parent().unwrap_or(Path::new(".")).join("files");
        std::fs::create_dir_all(&files_dir)?;
        let storage = Self { conn, files_dir };
        storage.create_schema()?;
        Ok(storage)
    }

    /// In-memory database with an explicit file directory chosen by the
    /// caller.
    pub fn open_in_memory(files_dir: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        std::fs::create_dir_all(files_dir)?;
        let storage = Self {
            conn,
            files_dir: files_dir.to_path_buf(),
        };
        storage.create_schema()?;
        Ok(storage)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id              TEXT PRIMARY KEY,
                username        TEXT NOT NULL UNIQUE,
                full_name       TEXT,
                university_id   TEXT,
                follower_count  INTEGER NOT NULL DEFAULT 0,
                following_count INTEGER NOT NULL DEFAULT 0,
                created_at      INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_followers (
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                follower_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (user_id, follower_id)
            );

            CREATE TABLE IF NOT EXISTS resources (
                id                TEXT PRIMARY KEY,
                author_id         TEXT NOT NULL,
                title             TEXT NOT NULL,
                description       TEXT,
                resource_type     TEXT NOT NULL,
                course_code       TEXT,
                external_link     TEXT,
                file_name         TEXT,
                file_content_type TEXT,
                is_public         INTEGER NOT NULL DEFAULT 1,
                university_id     TEXT,
                thumbnail_url     TEXT,
                comment_count     INTEGER NOT NULL DEFAULT 0,
                download_count    INTEGER NOT NULL DEFAULT 0,
                created_at        INTEGER NOT NULL,
                updated_at        INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_resources_author
                ON resources(author_id, created_at);

            CREATE TABLE IF NOT EXISTS resource_likes (
                resource_id TEXT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL,
                created_at  INTEGER NOT NULL,
                PRIMARY KEY (resource_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS resource_comments (
                id          TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_comments_resource
                ON resource_comments(resource_id, created_at);

            CREATE TABLE IF NOT EXISTS study_groups (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                description   TEXT,
                course_code   TEXT,
                creator_id    TEXT NOT NULL,
                is_private    INTEGER NOT NULL DEFAULT 0,
                university_id TEXT,
                member_count  INTEGER NOT NULL DEFAULT 0,
                created_at    INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS study_group_members (
                study_group_id TEXT NOT NULL REFERENCES study_groups(id) ON DELETE CASCADE,
                user_id        TEXT NOT NULL,
                role           TEXT NOT NULL DEFAULT 'member',
                joined_at      INTEGER NOT NULL,
                PRIMARY KEY (study_group_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS study_group_invitations (
                id             TEXT PRIMARY KEY,
                study_group_id TEXT NOT NULL REFERENCES study_groups(id) ON DELETE CASCADE,
                code           TEXT NOT NULL UNIQUE,
                created_by     TEXT NOT NULL,
                expires_at     INTEGER,
                max_uses       INTEGER,
                current_uses   INTEGER NOT NULL DEFAULT 0,
                created_at     INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL,
                actor_id    TEXT,
                type        TEXT NOT NULL,
                title       TEXT NOT NULL,
                message     TEXT NOT NULL,
                link        TEXT,
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_notifications_user
                ON notifications(user_id, created_at);
            ",
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Users and follows
    // -----------------------------------------------------------------------

    /// Create or update a profile. Counters are left untouched on update.
    pub fn upsert_user(&self, row: &UserRow) -> Result<(), StorageError> {
        let result = self.conn.execute(
            "INSERT INTO users (id, username, full_name, university_id, follower_count,
                                following_count, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                full_name = excluded.full_name,
                university_id = excluded.university_id",
            params![
                row.id,
                row.username,
                row.full_name,
                row.university_id,
                row.created_at as i64,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::AlreadyExists(format!(
                    "username {} is taken",
                    row.username
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>, StorageError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], map_user).optional()?)
    }

    pub fn count_users(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn recompute_follow_counts(
        conn: &Connection,
        user_id: &str,
        follower_id: &str,
    ) -> Result<(), StorageError> {
        conn.execute(
            "UPDATE users SET follower_count =
                (SELECT COUNT(*) FROM user_followers WHERE user_id = ?1)
             WHERE id = ?1",
            params![user_id],
        )?;
        conn.execute(
            "UPDATE users SET following_count =
                (SELECT COUNT(*) FROM user_followers WHERE follower_id = ?1)
             WHERE id = ?1",
            params![follower_id],
        )?;
        Ok(())
    }

    /// Record that `follower_id` follows `user_id`. Returns `false` when the
    /// edge already existed.
    pub fn insert_follow(
        &self,
        user_id: &str,
        follower_id: &str,
        now: u64,
    ) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO user_followers (user_id, follower_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![user_id, follower_id, now as i64],
        )? > 0;
        if inserted {
            Self::recompute_follow_counts(&tx, user_id, follower_id)?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Remove a follow edge. Returns `false` when there was none.
    pub fn delete_follow(&self, user_id: &str, follower_id: &str) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM user_followers WHERE user_id = ?1 AND follower_id = ?2",
            params![user_id, follower_id],
        )? > 0;
        if removed {
            Self::recompute_follow_counts(&tx, user_id, follower_id)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn is_following(&self, user_id: &str, follower_id: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM user_followers WHERE user_id = ?1 AND follower_id = ?2",
            params![user_id, follower_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    pub fn insert_resource(&self, row: &ResourceRow) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO resources (id, author_id, title, description, resource_type,
                course_code, external_link, file_name, file_content_type, is_public,
                university_id, thumbnail_url, comment_count, download_count,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, 0, ?13, ?14)",
            params![
                row.id,
                row.author_id,
                row.title,
                row.description,
                row.resource_type,
                row.course_code,
                row.external_link,
                row.file_name,
                row.file_content_type,
                row.is_public as i32,
                row.university_id,
                row.thumbnail_url,
                row.created_at as i64,
                row.updated_at as i64,
            ],
        )?;
        Ok(())
    }

    pub fn get_resource(&self, id: &str) -> Result<Option<ResourceRow>, StorageError> {
        let sql = format!("SELECT {RESOURCE_COLUMNS} FROM resources WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], map_resource)
            .optional()?)
    }

    pub fn update_resource(
        &self,
        id: &str,
        update: &ResourceUpdate,
        now: u64,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE resources SET title = ?2, description = ?3, resource_type = ?4,
                course_code = ?5, external_link = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                update.title,
                update.description,
                update.resource_type,
                update.course_code,
                update.external_link,
                now as i64,
            ],
        )?;
        Ok(affected > 0)
    }

    /// Delete a resource, its likes and comments, and its file on disk.
    pub fn delete_resource(&self, id: &str) -> Result<bool, StorageError> {
        let file_name = self.get_resource(id)?.and_then(|r| r.file_name);
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM resource_likes WHERE resource_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM resource_comments WHERE resource_id = ?1",
            params![id],
        )?;
        let removed = tx.execute("DELETE FROM resources WHERE id = ?1", params![id])? > 0;
        tx.commit()?;
        if let Some(name) = file_name {
            let _ = std::fs::remove_file(self.files_dir.join(name));
        }
        Ok(removed)
    }

    /// Store the uploaded file for a resource, replacing any previous file.
    pub fn store_resource_file(
        &self,
        id: &str,
        extension: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<String, StorageError> {
        let previous = self
            .get_resource(id)?
            .ok_or_else(|| StorageError::NotFound(format!("resource {id}")))?
            .file_name;
        let file_name = format!("{id}.{extension}");
        std::fs::write(self.files_dir.join(&file_name), data)?;
        self.conn.execute(
            "UPDATE resources SET file_name = ?2, file_content_type = ?3 WHERE id = ?1",
            params![id, file_name, content_type],
        )?;
        if let Some(old) = previous.filter(|old| *old != file_name) {
            let _ = std::fs::remove_file(self.files_dir.join(old));
        }
        Ok(file_name)
    }

    pub fn read_resource_file(&self, file_name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match std::fs::read(self.files_dir.join(file_name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Increment and return the download counter.
    pub fn record_download(&self, id: &str) -> Result<u64, StorageError> {
        self.conn.execute(
            "UPDATE resources SET download_count = download_count + 1 WHERE id = ?1",
            params![id],
        )?;
        let count: i64 = self.conn.query_row(
            "SELECT download_count FROM resources WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn set_thumbnail_url(&self, id: &str, url: Option<&str>) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE resources SET thumbnail_url = ?2 WHERE id = ?1",
            params![id, url],
        )?;
        Ok(affected > 0)
    }

    pub fn count_resources(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // -----------------------------------------------------------------------
    // Likes
    // -----------------------------------------------------------------------

    /// Returns `false` when the user had already liked the resource.
    pub fn insert_like(&self, resource_id: &str, user_id: &str, now: u64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "INSERT OR IGNORE INTO resource_likes (resource_id, user_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![resource_id, user_id, now as i64],
        )?;
        Ok(affected > 0)
    }

    pub fn has_liked(&self, resource_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM resource_likes WHERE resource_id = ?1 AND user_id = ?2",
            params![resource_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Live like aggregate.
    pub fn count_likes(&self, resource_id: &str) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM resource_likes WHERE resource_id = ?1",
            params![resource_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    fn recompute_comment_count(conn: &Connection, resource_id: &str) -> Result<u64, StorageError> {
        conn.execute(
            "UPDATE resources SET comment_count =
                (SELECT COUNT(*) FROM resource_comments WHERE resource_id = ?1)
             WHERE id = ?1",
            params![resource_id],
        )?;
        let count: i64 = conn.query_row(
            "SELECT comment_count FROM resources WHERE id = ?1",
            params![resource_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Insert a comment and return the recomputed comment count.
    pub fn insert_comment(&self, comment: &Comment) -> Result<u64, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO resource_comments (id, resource_id, user_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                comment.id,
                comment.resource_id,
                comment.user_id,
                comment.content,
                comment.created_at as i64,
            ],
        )?;
        let count = Self::recompute_comment_count(&tx, &comment.resource_id)?;
        tx.commit()?;
        Ok(count)
    }

    pub fn get_comment(&self, id: &str) -> Result<Option<Comment>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT c.id, c.resource_id, c.user_id, u.username, c.content, c.created_at
                 FROM resource_comments c LEFT JOIN users u ON u.id = c.user_id
                 WHERE c.id = ?1",
                params![id],
                map_comment,
            )
            .optional()?;
        Ok(row)
    }

    /// Delete a comment and return the recomputed comment count of its
    /// resource, or `None` if the comment did not exist.
    pub fn delete_comment(&self, id: &str) -> Result<Option<u64>, StorageError> {
        let Some(comment) = self.get_comment(id)? else {
            return Ok(None);
        };
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM resource_comments WHERE id = ?1", params![id])?;
        let count = Self::recompute_comment_count(&tx, &comment.resource_id)?;
        tx.commit()?;
        Ok(Some(count))
    }

    /// Comments of a resource, newest first.
    pub fn list_comments(&self, resource_id: &str) -> Result<Vec<Comment>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.resource_id, c.user_id, u.username, c.content, c.created_at
             FROM resource_comments c LEFT JOIN users u ON u.id = c.user_id
             WHERE c.resource_id = ?1
             ORDER BY c.created_at DESC, c.rowid DESC",
        )?;
        let rows = stmt.query_map(params![resource_id], map_comment)?;
        collect(rows)
    }

    // -----------------------------------------------------------------------
    // Study groups and members
    // -----------------------------------------------------------------------

    fn recompute_member_count(conn: &Connection, group_id: &str) -> Result<u64, StorageError> {
        conn.execute(
            "UPDATE study_groups SET member_count =
                (SELECT COUNT(*) FROM study_group_members WHERE study_group_id = ?1)
             WHERE id = ?1",
            params![group_id],
        )?;
        let count: i64 = conn.query_row(
            "SELECT member_count FROM study_groups WHERE id = ?1",
            params![group_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Create a group with its creator as the first admin member.
    pub fn insert_group_with_creator(&self, row: &StudyGroupRow) -> Result<(), StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO study_groups (id, name, description, course_code, creator_id,
                is_private, university_id, member_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                row.id,
                row.name,
                row.description,
                row.course_code,
                row.creator_id,
                row.is_private as i32,
                row.university_id,
                row.created_at as i64,
            ],
        )?;
        tx.execute(
            "INSERT INTO study_group_members (study_group_id, user_id, role, joined_at)
             VALUES (?1, ?2, 'admin', ?3)",
            params![row.id, row.creator_id, row.created_at as i64],
        )?;
        Self::recompute_member_count(&tx, &row.id)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_group(&self, id: &str) -> Result<Option<StudyGroupRow>, StorageError> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM study_groups WHERE id = ?1");
        Ok(self.conn.query_row(&sql, params![id], map_group).optional()?)
    }

    /// Public groups, newest first, optionally filtered by a case-insensitive
    /// search over name, description and course code.
    pub fn list_public_groups(
        &self,
        university_id: Option<&str>,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StudyGroupRow>, StorageError> {
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM study_groups
             WHERE is_private = 0
               AND (?1 IS NULL OR university_id = ?1)
               AND (?2 IS NULL OR lower(name) LIKE ?2 OR lower(coalesce(description, '')) LIKE ?2
                    OR lower(coalesce(course_code, '')) LIKE ?2)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?3 OFFSET ?4"
        );
        let pattern = search.filter(|s| !s.trim().is_empty()).map(like_pattern);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![university_id, pattern, limit as i64, offset as i64],
            map_group,
        )?;
        collect(rows)
    }

    pub fn count_public_groups(
        &self,
        university_id: Option<&str>,
        search: Option<&str>,
    ) -> Result<u64, StorageError> {
        let pattern = search.filter(|s| !s.trim().is_empty()).map(like_pattern);
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM study_groups
             WHERE is_private = 0
               AND (?1 IS NULL OR university_id = ?1)
               AND (?2 IS NULL OR lower(name) LIKE ?2 OR lower(coalesce(description, '')) LIKE ?2
                    OR lower(coalesce(course_code, '')) LIKE ?2)",
            params![university_id, pattern],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Groups the user belongs to, including private ones.
    pub fn list_groups_for_user(&self, user_id: &str) -> Result<Vec<StudyGroupRow>, StorageError> {
        let sql = format!(
            "SELECT {GROUP_COLUMNS} FROM study_groups
             WHERE id IN (SELECT study_group_id FROM study_group_members WHERE user_id = ?1)
             ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id], map_group)?;
        collect(rows)
    }

    pub fn delete_group(&self, id: &str) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM study_group_invitations WHERE study_group_id = ?1",
            params![id],
        )?;
        tx.execute(
            "DELETE FROM study_group_members WHERE study_group_id = ?1",
            params![id],
        )?;
        let removed = tx.execute("DELETE FROM study_groups WHERE id = ?1", params![id])? > 0;
        tx.commit()?;
        Ok(removed)
    }

    pub fn get_member(&self, group_id: &str, user_id: &str) -> Result<Option<MemberRow>, StorageError> {
        Ok(self
            .conn
            .query_row(
                "SELECT study_group_id, user_id, role, joined_at FROM study_group_members
                 WHERE study_group_id = ?1 AND user_id = ?2",
                params![group_id, user_id],
                map_member,
            )
            .optional()?)
    }

    pub fn list_members(&self, group_id: &str) -> Result<Vec<MemberRow>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT study_group_id, user_id, role, joined_at FROM study_group_members
             WHERE study_group_id = ?1 ORDER BY joined_at, rowid",
        )?;
        let rows = stmt.query_map(params![group_id], map_member)?;
        collect(rows)
    }

    /// Add a member. Returns `false` if the user was already a member.
    pub fn add_member(
        &self,
        group_id: &str,
        user_id: &str,
        role: MemberRole,
        now: u64,
    ) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO study_group_members (study_group_id, user_id, role, joined_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![group_id, user_id, role.as_str(), now as i64],
        )? > 0;
        if inserted {
            Self::recompute_member_count(&tx, group_id)?;
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn remove_member(&self, group_id: &str, user_id: &str) -> Result<bool, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM study_group_members WHERE study_group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
        )? > 0;
        if removed {
            Self::recompute_member_count(&tx, group_id)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn update_member_role(
        &self,
        group_id: &str,
        user_id: &str,
        role: MemberRole,
    ) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE study_group_members SET role = ?3 WHERE study_group_id = ?1 AND user_id = ?2",
            params![group_id, user_id, role.as_str()],
        )?;
        Ok(affected > 0)
    }

    pub fn count_groups(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM study_groups", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // -----------------------------------------------------------------------
    // Invitations
    // -----------------------------------------------------------------------

    pub fn insert_invitation(&self, inv: &Invitation) -> Result<(), StorageError> {
        let result = self.conn.execute(
            "INSERT INTO study_group_invitations (id, study_group_id, code, created_by,
                expires_at, max_uses, current_uses, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                inv.id,
                inv.study_group_id,
                inv.code,
                inv.created_by,
                inv.expires_at.map(|v| v as i64),
                inv.max_uses.map(|v| v as i64),
                inv.current_uses as i64,
                inv.created_at as i64,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(StorageError::AlreadyExists(format!("invitation code {}", inv.code)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_invitation(&self, id: &str) -> Result<Option<Invitation>, StorageError> {
        let sql = format!("SELECT {INVITATION_COLUMNS} FROM study_group_invitations WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], map_invitation)
            .optional()?)
    }

    pub fn get_invitation_by_code(&self, code: &str) -> Result<Option<Invitation>, StorageError> {
        let sql =
            format!("SELECT {INVITATION_COLUMNS} FROM study_group_invitations WHERE code = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![code], map_invitation)
            .optional()?)
    }

    pub fn list_invitations(&self, group_id: &str) -> Result<Vec<Invitation>, StorageError> {
        let sql = format!(
            "SELECT {INVITATION_COLUMNS} FROM study_group_invitations
             WHERE study_group_id = ?1 ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![group_id], map_invitation)?;
        collect(rows)
    }

    pub fn delete_invitation(&self, id: &str) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "DELETE FROM study_group_invitations WHERE id = ?1",
            params![id],
        )?;
        Ok(affected > 0)
    }

    /// Redeem an invitation code for `user_id`.
    ///
    /// Expiry and the use ceiling are checked by the same conditional
    /// `UPDATE` that consumes the use, inside one transaction with the
    /// membership insert, so two redeemers can never both take the last use.
    /// An existing member gets `AlreadyMember` and consumes nothing.
    pub fn redeem_invitation(
        &self,
        code: &str,
        user_id: &str,
        now: u64,
    ) -> Result<Redemption, StorageError> {
        let tx = self.conn.unchecked_transaction()?;
        let sql =
            format!("SELECT {INVITATION_COLUMNS} FROM study_group_invitations WHERE code = ?1");
        let Some(invitation) = tx.query_row(&sql, params![code], map_invitation).optional()? else {
            return Ok(Redemption::Rejected(RedeemFailure::NotFound));
        };
        let group_id = invitation.study_group_id.clone();

        let already_member: i64 = tx.query_row(
            "SELECT COUNT(*) FROM study_group_members WHERE study_group_id = ?1 AND user_id = ?2",
            params![group_id, user_id],
            |row| row.get(0),
        )?;
        if already_member > 0 {
            return Ok(Redemption::AlreadyMember {
                study_group_id: group_id,
            });
        }

        if invitation.is_expired(now) {
            return Ok(Redemption::Rejected(RedeemFailure::Expired));
        }

        let consumed = tx.execute(
            "UPDATE study_group_invitations SET current_uses = current_uses + 1
             WHERE id = ?1
               AND (max_uses IS NULL OR current_uses < max_uses)
               AND (expires_at IS NULL OR expires_at >= ?2)",
            params![invitation.id, now as i64],
        )?;
        if consumed == 0 {
            return Ok(Redemption::Rejected(RedeemFailure::Exhausted));
        }

        tx.execute(
            "INSERT INTO study_group_members (study_group_id, user_id, role, joined_at)
             VALUES (?1, ?2, 'member', ?3)",
            params![group_id, user_id, now as i64],
        )?;
        Self::recompute_member_count(&tx, &group_id)?;
        tx.commit()?;
        Ok(Redemption::Joined {
            study_group_id: group_id,
        })
    }

    // -----------------------------------------------------------------------
    // Notifications
    // -----------------------------------------------------------------------

    pub fn insert_notification(&self, row: &NotificationRow) -> Result<i64, StorageError> {
        self.conn.execute(
            "INSERT INTO notifications (user_id, actor_id, type, title, message, link,
                is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.user_id,
                row.actor_id,
                row.notification_type,
                row.title,
                row.message,
                row.link,
                row.is_read as i32,
                row.created_at as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Whether `actor_id` already produced a notification of this type for
    /// `user_id`.
    pub fn has_notification(
        &self,
        user_id: &str,
        actor_id: &str,
        notification_type: &str,
    ) -> Result<bool, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND actor_id = ?2 AND type = ?3",
            params![user_id, actor_id, notification_type],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: u32,
    ) -> Result<Vec<NotificationRow>, StorageError> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE user_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC, id DESC LIMIT ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![user_id, unread_only as i32, limit as i64],
            map_notification,
        )?;
        collect(rows)
    }

    pub fn count_unread_notifications(&self, user_id: &str) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn mark_notification_read(&self, user_id: &str, id: i64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        Ok(affected > 0)
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<u64, StorageError> {
        let affected = self.conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE user_id = ?1 AND is_read = 0",
            params![user_id],
        )?;
        Ok(affected as u64)
    }
}

fn map_comment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        resource_id: row.get(1)?,
        user_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
    })
}

/// Resolve the database path: `{data_dir}/unishare.db`.
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("unishare.db")
}

/// Map a MIME content type to a lowercase file extension.
pub fn content_type_to_ext(content_type: &str) -> &str {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim();
    match base {
        "application/pdf" => "pdf",
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "text/plain" => "txt",
        "text/markdown" => "md",
        "application/zip" => "zip",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        _ => "bin",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> (Storage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open_in_memory(&dir.path().join("files")).unwrap();
        (storage, dir)
    }

    fn user(id: &str) -> UserRow {
        UserRow {
            id: id.to_string(),
            username: format!("{id}-name"),
            full_name: None,
            university_id: Some("uni-1".to_string()),
            follower_count: 0,
            following_count: 0,
            created_at: 1,
        }
    }

    fn resource(id: &str, author: &str) -> ResourceRow {
        ResourceRow {
            id: id.to_string(),
            author_id: author.to_string(),
            title: "Week 3 notes".to_string(),
            description: None,
            resource_type: "notes".to_string(),
            course_code: Some("CS101".to_string()),
            external_link: None,
            file_name: None,
            file_content_type: None,
            is_public: true,
            university_id: Some("uni-1".to_string()),
            thumbnail_url: None,
            comment_count: 0,
            download_count: 0,
            created_at: 10,
            updated_at: 10,
        }
    }

    fn group(id: &str, creator: &str, is_private: bool) -> StudyGroupRow {
        StudyGroupRow {
            id: id.to_string(),
            name: format!("Group {id}"),
            description: Some("Exam prep".to_string()),
            course_code: Some("MATH200".to_string()),
            creator_id: creator.to_string(),
            is_private,
            university_id: Some("uni-1".to_string()),
            member_count: 0,
            created_at: 5,
        }
    }

    fn invitation(id: &str, group_id: &str, code: &str, max_uses: Option<u32>) -> Invitation {
        Invitation {
            id: id.to_string(),
            study_group_id: group_id.to_string(),
            code: code.to_string(),
            created_by: "creator".to_string(),
            expires_at: Some(1_000),
            max_uses,
            current_uses: 0,
            created_at: 1,
        }
    }

    #[test]
    fn test_user_upsert_keeps_counters_and_rejects_taken_username() {
        let (storage, _dir) = test_storage();
        storage.upsert_user(&user("alice")).unwrap();
        storage.upsert_user(&user("bob")).unwrap();
        storage.insert_follow("alice", "bob", 2).unwrap();

        let mut renamed = user("alice");
        renamed.full_name = Some("Alice A.".to_string());
        storage.upsert_user(&renamed).unwrap();
        let alice = storage.get_user("alice").unwrap().unwrap();
        assert_eq!(alice.full_name.as_deref(), Some("Alice A."));
        assert_eq!(alice.follower_count, 1);

        let mut clash = user("carol");
        clash.username = "alice-name".to_string();
        assert!(matches!(
            storage.upsert_user(&clash),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_follow_edges_are_unique_and_counted() {
        let (storage, _dir) = test_storage();
        storage.upsert_user(&user("alice")).unwrap();
        storage.upsert_user(&user("bob")).unwrap();

        assert!(storage.insert_follow("alice", "bob", 2).unwrap());
        assert!(!storage.insert_follow("alice", "bob", 3).unwrap());
        assert!(storage.is_following("alice", "bob").unwrap());
        assert_eq!(storage.get_user("alice").unwrap().unwrap().follower_count, 1);
        assert_eq!(storage.get_user("bob").unwrap().unwrap().following_count, 1);

        assert!(storage.delete_follow("alice", "bob").unwrap());
        assert!(!storage.delete_follow("alice", "bob").unwrap());
        assert_eq!(storage.get_user("alice").unwrap().unwrap().follower_count, 0);
        assert_eq!(storage.get_user("bob").unwrap().unwrap().following_count, 0);
    }

    #[test]
    fn test_likes_are_unique_per_user() {
        let (storage, _dir) = test_storage();
        storage.insert_resource(&resource("r1", "alice")).unwrap();

        assert!(storage.insert_like("r1", "bob", 1).unwrap());
        assert!(!storage.insert_like("r1", "bob", 2).unwrap());
        assert!(storage.insert_like("r1", "carol", 3).unwrap());
        assert_eq!(storage.count_likes("r1").unwrap(), 2);
        assert!(storage.has_liked("r1", "bob").unwrap());
        assert!(!storage.has_liked("r1", "dave").unwrap());
    }

    #[test]
    fn test_comment_count_tracks_live_rows() {
        let (storage, _dir) = test_storage();
        storage.upsert_user(&user("bob")).unwrap();
        storage.insert_resource(&resource("r1", "alice")).unwrap();

        let comment = |id: &str, at: u64| Comment {
            id: id.to_string(),
            resource_id: "r1".to_string(),
            user_id: "bob".to_string(),
            author_name: None,
            content: format!("comment {id}"),
            created_at: at,
        };
        assert_eq!(storage.insert_comment(&comment("c1", 1)).unwrap(), 1);
        assert_eq!(storage.insert_comment(&comment("c2", 2)).unwrap(), 2);

        let listed = storage.list_comments("r1").unwrap();
        assert_eq!(listed[0].id, "c2");
        assert_eq!(listed[0].author_name.as_deref(), Some("bob-name"));

        assert_eq!(storage.delete_comment("c1").unwrap(), Some(1));
        assert_eq!(storage.delete_comment("c1").unwrap(), None);
        assert_eq!(storage.get_resource("r1").unwrap().unwrap().comment_count, 1);
    }

    #[test]
    fn test_resource_file_and_downloads() {
        let (storage, _dir) = test_storage();
        storage.insert_resource(&resource("r1", "alice")).unwrap();

        let name = storage
            .store_resource_file("r1", "pdf", "application/pdf", b"%PDF-1.4")
            .unwrap();
        assert_eq!(name, "r1.pdf");
        assert_eq!(
            storage.read_resource_file(&name).unwrap().as_deref(),
            Some(&b"%PDF-1.4"[..])
        );
        assert_eq!(storage.record_download("r1").unwrap(), 1);
        assert_eq!(storage.record_download("r1").unwrap(), 2);

        assert!(storage.delete_resource("r1").unwrap());
        assert!(storage.read_resource_file(&name).unwrap().is_none());
        assert!(storage.get_resource("r1").unwrap().is_none());
    }

    #[test]
    fn test_group_membership_counts() {
        let (storage, _dir) = test_storage();
        storage
            .insert_group_with_creator(&group("g1", "alice", false))
            .unwrap();
        assert_eq!(storage.get_group("g1").unwrap().unwrap().member_count, 1);
        assert_eq!(
            storage.get_member("g1", "alice").unwrap().unwrap().role,
            MemberRole::Admin
        );

        assert!(storage.add_member("g1", "bob", MemberRole::Member, 6).unwrap());
        assert!(!storage.add_member("g1", "bob", MemberRole::Member, 7).unwrap());
        assert_eq!(storage.get_group("g1").unwrap().unwrap().member_count, 2);

        assert!(storage.update_member_role("g1", "bob", MemberRole::Admin).unwrap());
        assert!(storage.remove_member("g1", "bob").unwrap());
        assert_eq!(storage.get_group("g1").unwrap().unwrap().member_count, 1);
        assert_eq!(storage.list_members("g1").unwrap().len(), 1);
    }

    #[test]
    fn test_public_group_search_and_pagination() {
        let (storage, _dir) = test_storage();
        storage
            .insert_group_with_creator(&group("g1", "alice", false))
            .unwrap();
        storage
            .insert_group_with_creator(&group("g2", "alice", true))
            .unwrap();
        let mut other = group("g3", "bob", false);
        other.name = "Physics circle".to_string();
        other.course_code = Some("PHYS110".to_string());
        other.created_at = 9;
        storage.insert_group_with_creator(&other).unwrap();

        assert_eq!(storage.count_public_groups(None, None).unwrap(), 2);
        let page = storage.list_public_groups(None, None, 1, 0).unwrap();
        assert_eq!(page[0].id, "g3");
        let found = storage
            .list_public_groups(Some("uni-1"), Some("phys"), 10, 0)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(storage.list_groups_for_user("alice").unwrap().len(), 2);
    }

    #[test]
    fn test_redeem_invitation_rules() {
        let (storage, _dir) = test_storage();
        storage
            .insert_group_with_creator(&group("g1", "creator", true))
            .unwrap();
        storage
            .insert_invitation(&invitation("i1", "g1", "CODE1111", Some(1)))
            .unwrap();

        assert_eq!(
            storage.redeem_invitation("NOPE", "bob", 10).unwrap(),
            Redemption::Rejected(RedeemFailure::NotFound)
        );
        assert_eq!(
            storage.redeem_invitation("CODE1111", "bob", 10).unwrap(),
            Redemption::Joined {
                study_group_id: "g1".to_string()
            }
        );
        assert_eq!(
            storage.redeem_invitation("CODE1111", "bob", 11).unwrap(),
            Redemption::AlreadyMember {
                study_group_id: "g1".to_string()
            }
        );
        assert_eq!(
            storage.redeem_invitation("CODE1111", "carol", 12).unwrap(),
            Redemption::Rejected(RedeemFailure::Exhausted)
        );
        assert_eq!(
            storage.get_invitation("i1").unwrap().unwrap().current_uses,
            1
        );
        assert_eq!(storage.get_group("g1").unwrap().unwrap().member_count, 2);

        storage
            .insert_invitation(&invitation("i2", "g1", "CODE2222", None))
            .unwrap();
        assert_eq!(
            storage.redeem_invitation("CODE2222", "dave", 1_001).unwrap(),
            Redemption::Rejected(RedeemFailure::Expired)
        );
        assert!(matches!(
            storage.insert_invitation(&invitation("i3", "g1", "CODE2222", None)),
            Err(StorageError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_delete_group_cascades() {
        let (storage, _dir) = test_storage();
        storage
            .insert_group_with_creator(&group("g1", "creator", false))
            .unwrap();
        storage
            .insert_invitation(&invitation("i1", "g1", "CODE1111", None))
            .unwrap();
        assert!(storage.delete_group("g1").unwrap());
        assert!(storage.get_invitation("i1").unwrap().is_none());
        assert!(storage.get_member("g1", "creator").unwrap().is_none());
    }

    #[test]
    fn test_notifications_per_user() {
        let (storage, _dir) = test_storage();
        let row = NotificationRow {
            id: 0,
            user_id: "alice".to_string(),
            actor_id: Some("bob".to_string()),
            notification_type: "follow".to_string(),
            title: "New Follower".to_string(),
            message: "User @bob started following you".to_string(),
            link: Some("/u/bob".to_string()),
            is_read: false,
            created_at: 5,
        };
        let id = storage.insert_notification(&row).unwrap();
        assert!(storage.has_notification("alice", "bob", "follow").unwrap());
        assert!(!storage.has_notification("bob", "alice", "follow").unwrap());
        assert_eq!(storage.count_unread_notifications("alice").unwrap(), 1);

        assert!(!storage.mark_notification_read("bob", id).unwrap());
        assert!(storage.mark_notification_read("alice", id).unwrap());
        assert!(storage.list_notifications("alice", true, 10).unwrap().is_empty());
        assert_eq!(storage.list_notifications("alice", false, 10).unwrap().len(), 1);
        assert_eq!(storage.mark_all_notifications_read("alice").unwrap(), 0);
    }
}
