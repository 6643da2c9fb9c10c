//! 持久化轮次日志
//!
//! TurnLog 是按任务分键的有序追加日志：append_turn 只接受 index = 当前轮数 + 1，
//! 读取按 index 升序。InMemoryTurnLog 用于测试与临时运行，SqliteTurnLog 落盘（单连接 + 事务）。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use rusqlite::{params, Connection};

use crate::core::StorageError;
use crate::memory::turn::{Summary, Turn};

pub trait TurnLog: Send + Sync {
    /// 追加一轮；index 必须恰好是已有轮数 + 1
    fn append_turn(&self, turn: &Turn) -> Result<(), StorageError>;

    /// 读取 [from, to] 区间（含端点）；to 为 None 表示读到末尾
    fn read_turns(&self, task_id: &str, from: u32, to: Option<u32>) -> Result<Vec<Turn>, StorageError>;

    fn turn_count(&self, task_id: &str) -> Result<u32, StorageError>;

    fn append_summary(&self, task_id: &str, summary: &Summary) -> Result<(), StorageError>;

    /// 按 to_turn 升序
    fn summaries(&self, task_id: &str) -> Result<Vec<Summary>, StorageError>;
}

fn out_of_order(task_id: &str, expected: u32, got: u32) -> StorageError {
    StorageError::OutOfOrder {
        task_id: task_id.to_string(),
        expected,
        got,
    }
}

#[derive(Default)]
struct TaskLog {
    turns: Vec<Turn>,
    summaries: Vec<Summary>,
}

/// 内存实现
#[derive(Default)]
pub struct InMemoryTurnLog {
    tasks: RwLock<HashMap<String, TaskLog>>,
}

impl InMemoryTurnLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TurnLog for InMemoryTurnLog {
    fn append_turn(&self, turn: &Turn) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        let log = tasks.entry(turn.task_id.clone()).or_default();
        let expected = log.turns.len() as u32 + 1;
        if turn.index != expected {
            return Err(out_of_order(&turn.task_id, expected, turn.index));
        }
        log.turns.push(turn.clone());
        Ok(())
    }

    fn read_turns(&self, task_id: &str, from: u32, to: Option<u32>) -> Result<Vec<Turn>, StorageError> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        let to = to.unwrap_or(u32::MAX);
        Ok(tasks
            .get(task_id)
            .map(|log| {
                log.turns
                    .iter()
                    .filter(|t| t.index >= from && t.index <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn turn_count(&self, task_id: &str) -> Result<u32, StorageError> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks.get(task_id).map_or(0, |log| log.turns.len() as u32))
    }

    fn append_summary(&self, task_id: &str, summary: &Summary) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().unwrap_or_else(PoisonError::into_inner);
        tasks
            .entry(task_id.to_string())
            .or_default()
            .summaries
            .push(summary.clone());
        Ok(())
    }

    fn summaries(&self, task_id: &str) -> Result<Vec<Summary>, StorageError> {
        let tasks = self.tasks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tasks
            .get(task_id)
            .map(|log| log.summaries.clone())
            .unwrap_or_default())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS turns (
    task_id    TEXT    NOT NULL,
    idx        INTEGER NOT NULL,
    payload    TEXT    NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (task_id, idx)
);
CREATE TABLE IF NOT EXISTS summaries (
    task_id    TEXT    NOT NULL,
    from_turn  INTEGER NOT NULL,
    to_turn    INTEGER NOT NULL,
    payload    TEXT    NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (task_id, to_turn)
);
";

/// SQLite 实现：Turn / Summary 以 JSON 存储
pub struct SqliteTurnLog {
    conn: Mutex<Connection>,
}

impl SqliteTurnLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::Backend(format!("create {}: {}", parent.display(), e)))?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TurnLog for SqliteTurnLog {
    fn append_turn(&self, turn: &Turn) -> Result<(), StorageError> {
        let payload = serde_json::to_string(turn)?;
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let last: Option<u32> = tx.query_row(
            "SELECT MAX(idx) FROM turns WHERE task_id = ?1",
            params![turn.task_id],
            |row| row.get(0),
        )?;
        let expected = last.unwrap_or(0) + 1;
        if turn.index != expected {
            return Err(out_of_order(&turn.task_id, expected, turn.index));
        }

        tx.execute(
            "INSERT INTO turns (task_id, idx, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![turn.task_id, turn.index, payload, turn.timestamp],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn read_turns(&self, task_id: &str, from: u32, to: Option<u32>) -> Result<Vec<Turn>, StorageError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payload FROM turns WHERE task_id = ?1 AND idx >= ?2 AND idx <= ?3 ORDER BY idx",
        )?;
        let rows = stmt
            .query_map(params![task_id, from, to.unwrap_or(u32::MAX)], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|payload| serde_json::from_str(payload).map_err(StorageError::from))
            .collect()
    }

    fn turn_count(&self, task_id: &str) -> Result<u32, StorageError> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM turns WHERE task_id = ?1",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn append_summary(&self, task_id: &str, summary: &Summary) -> Result<(), StorageError> {
        let payload = serde_json::to_string(summary)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO summaries (task_id, from_turn, to_turn, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                task_id,
                summary.from_turn,
                summary.to_turn,
                payload,
                summary.created_at
            ],
        )?;
        Ok(())
    }

    fn summaries(&self, task_id: &str) -> Result<Vec<Summary>, StorageError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT payload FROM summaries WHERE task_id = ?1 ORDER BY to_turn")?;
        let rows = stmt
            .query_map(params![task_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|payload| serde_json::from_str(payload).map_err(StorageError::from))
            .collect()
    }
}
