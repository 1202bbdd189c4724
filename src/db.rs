use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, ErrorCode, Result};

use crate::error::AppError;
use crate::models::{
    completion_rate, points_earned, CreateTask, DailyScore, Session, Task, TaskCompletion,
    TaskListQuery, TaskStats, UpdateTask, User,
};

pub type DbPool = Arc<Mutex<Connection>>;

pub fn init_db(path: &str) -> Result<DbPool> {
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Creates all tables. Idempotent, also used by tests against an
/// in-memory connection.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            created_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            created_at INTEGER DEFAULT (strftime('%s', 'now')),
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT,
            positive_points INTEGER NOT NULL DEFAULT 1,
            negative_points INTEGER NOT NULL DEFAULT 0,
            category TEXT,
            difficulty_level INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER DEFAULT (strftime('%s', 'now')),
            updated_at INTEGER DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS task_completions (
            id INTEGER PRIMARY KEY,
            task_id INTEGER NOT NULL REFERENCES tasks (id) ON DELETE CASCADE,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            completion_date TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0,
            points_earned INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER DEFAULT (strftime('%s', 'now')),
            updated_at INTEGER DEFAULT (strftime('%s', 'now')),
            UNIQUE (user_id, task_id, completion_date)
        );

        CREATE TABLE IF NOT EXISTS daily_scores (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
            score_date TEXT NOT NULL,
            total_points INTEGER NOT NULL DEFAULT 0,
            completed_tasks INTEGER NOT NULL DEFAULT 0,
            total_tasks INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER DEFAULT (strftime('%s', 'now')),
            UNIQUE (user_id, score_date)
        );
        ",
    )
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

// User operations

pub fn create_user(pool: &DbPool, email: &str, password_hash: &str) -> Result<User, AppError> {
    let conn = pool.lock().unwrap();
    let result = conn.execute(
        "INSERT INTO users (email, password_hash) VALUES (?1, ?2)",
        (email, password_hash),
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            return Err(AppError::Validation("email already registered".to_string()));
        }
        Err(err) => return Err(err.into()),
    }
    let id = conn.last_insert_rowid();

    let user = conn.query_row(
        "SELECT id, email, created_at FROM users WHERE id = ?1",
        [id],
        |row| {
            Ok(User {
                id: row.get(0)?,
                email: row.get(1)?,
                created_at: row.get(2)?,
            })
        },
    )?;
    Ok(user)
}

pub fn find_user_credentials(pool: &DbPool, email: &str) -> Result<Option<(User, String)>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt =
        conn.prepare("SELECT id, email, created_at, password_hash FROM users WHERE email = ?1")?;
    let mut rows = stmt.query([email])?;

    if let Some(row) = rows.next()? {
        Ok(Some((
            User {
                id: row.get(0)?,
                email: row.get(1)?,
                created_at: row.get(2)?,
            },
            row.get(3)?,
        )))
    } else {
        Ok(None)
    }
}

pub fn get_user(pool: &DbPool, id: i64) -> Result<Option<User>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt = conn.prepare("SELECT id, email, created_at FROM users WHERE id = ?1")?;
    let mut rows = stmt.query([id])?;

    if let Some(row) = rows.next()? {
        Ok(Some(User {
            id: row.get(0)?,
            email: row.get(1)?,
            created_at: row.get(2)?,
        }))
    } else {
        Ok(None)
    }
}

// Session operations

pub fn create_session(pool: &DbPool, session: &Session) -> Result<(), AppError> {
    let conn = pool.lock().unwrap();
    conn.execute(
        "INSERT INTO sessions (id, user_id, expires_at) VALUES (?1, ?2, ?3)",
        (&session.id, session.user_id, session.expires_at),
    )?;
    Ok(())
}

/// Resolves a session id to its owning user, ignoring expired sessions.
pub fn session_user(pool: &DbPool, id: &str) -> Result<Option<i64>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt =
        conn.prepare("SELECT user_id FROM sessions WHERE id = ?1 AND expires_at > ?2")?;
    let mut rows = stmt.query((id, now()))?;

    if let Some(row) = rows.next()? {
        Ok(Some(row.get(0)?))
    } else {
        Ok(None)
    }
}

pub fn delete_session(pool: &DbPool, id: &str) -> Result<(), AppError> {
    let conn = pool.lock().unwrap();
    conn.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
    Ok(())
}

pub fn cleanup_expired_sessions(pool: &DbPool) -> Result<(), AppError> {
    let conn = pool.lock().unwrap();
    conn.execute("DELETE FROM sessions WHERE expires_at < ?1", [now()])?;
    Ok(())
}

// Task registry operations

const TASK_COLUMNS: &str = "id, user_id, name, description, positive_points, negative_points, \
                            category, difficulty_level, is_active, created_at, updated_at";

fn task_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        positive_points: row.get(4)?,
        negative_points: row.get(5)?,
        category: row.get(6)?,
        difficulty_level: row.get(7)?,
        is_active: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

pub fn create_task(pool: &DbPool, user_id: i64, req: &CreateTask) -> Result<Task, AppError> {
    let conn = pool.lock().unwrap();
    conn.execute(
        "INSERT INTO tasks (user_id, name, description, positive_points, negative_points, \
         category, difficulty_level, is_active) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        (
            user_id,
            req.name.trim(),
            &req.description,
            req.positive_points,
            req.negative_points,
            &req.category,
            req.difficulty_level,
            req.is_active as i64,
        ),
    )?;
    let id = conn.last_insert_rowid();

    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
    let task = stmt.query_row([id], task_from_row)?;
    Ok(task)
}

pub fn get_task(pool: &DbPool, user_id: i64, id: i64) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();
    get_task_internal(&conn, user_id, id)
}

fn get_task_internal(conn: &Connection, user_id: i64, id: i64) -> Result<Option<Task>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"
    ))?;
    let mut rows = stmt.query((id, user_id))?;

    if let Some(row) = rows.next()? {
        Ok(Some(task_from_row(row)?))
    } else {
        Ok(None)
    }
}

pub fn list_tasks(
    pool: &DbPool,
    user_id: i64,
    filter: &TaskListQuery,
) -> Result<Vec<Task>, AppError> {
    let order_column = match filter.sort.as_deref() {
        None | Some("created_at") => "created_at",
        Some("name") => "name",
        Some("difficulty_level") => "difficulty_level",
        Some("positive_points") => "positive_points",
        Some(other) => {
            return Err(AppError::Validation(format!("unknown sort column {other:?}")));
        }
    };
    let direction = match filter.order.as_deref() {
        None | Some("desc") => "DESC",
        Some("asc") => "ASC",
        Some(other) => {
            return Err(AppError::Validation(format!("unknown sort order {other:?}")));
        }
    };

    let mut clauses = vec!["user_id = ?".to_string()];
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(user_id)];

    if let Some(active) = filter.active {
        clauses.push("is_active = ?".to_string());
        params.push(Box::new(active as i64));
    }
    if let Some(ref category) = filter.category {
        clauses.push("category = ?".to_string());
        params.push(Box::new(category.clone()));
    }

    // Secondary id sort keeps ties in insertion order regardless of direction.
    let query = format!(
        "SELECT {TASK_COLUMNS} FROM tasks WHERE {} ORDER BY {order_column} {direction}, id ASC",
        clauses.join(" AND ")
    );

    let conn = pool.lock().unwrap();
    let mut stmt = conn.prepare(&query)?;
    let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let tasks = stmt
        .query_map(params_refs.as_slice(), task_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

pub fn update_task(
    pool: &DbPool,
    user_id: i64,
    id: i64,
    req: &UpdateTask,
) -> Result<Option<Task>, AppError> {
    let conn = pool.lock().unwrap();

    let mut updates = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(ref name) = req.name {
        updates.push("name = ?");
        params.push(Box::new(name.trim().to_string()));
    }
    if let Some(ref description) = req.description {
        updates.push("description = ?");
        params.push(Box::new(description.clone()));
    }
    if let Some(points) = req.positive_points {
        updates.push("positive_points = ?");
        params.push(Box::new(points));
    }
    if let Some(points) = req.negative_points {
        updates.push("negative_points = ?");
        params.push(Box::new(points));
    }
    if let Some(ref category) = req.category {
        updates.push("category = ?");
        params.push(Box::new(category.clone()));
    }
    if let Some(level) = req.difficulty_level {
        updates.push("difficulty_level = ?");
        params.push(Box::new(level));
    }
    if let Some(active) = req.is_active {
        updates.push("is_active = ?");
        params.push(Box::new(active as i64));
    }

    if updates.is_empty() {
        return get_task_internal(&conn, user_id, id);
    }

    updates.push("updated_at = strftime('%s', 'now')");
    params.push(Box::new(id));
    params.push(Box::new(user_id));

    let query = format!(
        "UPDATE tasks SET {} WHERE id = ? AND user_id = ?",
        updates.join(", ")
    );

    let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    conn.execute(&query, params_refs.as_slice())?;

    get_task_internal(&conn, user_id, id)
}

/// Hard delete. Ledger rows for the task go with it via the foreign key
/// cascade. Returns false when the task is absent or owned by someone else.
pub fn delete_task(pool: &DbPool, user_id: i64, id: i64) -> Result<bool, AppError> {
    let conn = pool.lock().unwrap();
    let rows = conn.execute(
        "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
        (id, user_id),
    )?;
    Ok(rows > 0)
}

pub fn task_stats(pool: &DbPool, user_id: i64) -> Result<TaskStats, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt = conn
        .prepare("SELECT category, difficulty_level, is_active FROM tasks WHERE user_id = ?1")?;
    let rows = stmt
        .query_map([user_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)? != 0,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let total_tasks = rows.len() as i64;
    let active_tasks = rows.iter().filter(|(_, _, active)| *active).count() as i64;
    let average_difficulty = if rows.is_empty() {
        0.0
    } else {
        let sum: i64 = rows.iter().map(|(_, level, _)| level).sum();
        (sum as f64 / rows.len() as f64 * 10.0).round() / 10.0
    };

    let mut category_counts = BTreeMap::new();
    for (category, _, _) in &rows {
        let key = category.clone().unwrap_or_else(|| "Uncategorized".to_string());
        *category_counts.entry(key).or_insert(0) += 1;
    }

    Ok(TaskStats {
        total_tasks,
        active_tasks,
        average_difficulty,
        category_counts,
    })
}

// Completion ledger and daily score operations

const COMPLETION_COLUMNS: &str = "id, task_id, user_id, completion_date, is_completed, \
                                  points_earned, created_at, updated_at";

fn completion_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskCompletion> {
    Ok(TaskCompletion {
        id: row.get(0)?,
        task_id: row.get(1)?,
        user_id: row.get(2)?,
        completion_date: row.get(3)?,
        is_completed: row.get::<_, i64>(4)? != 0,
        points_earned: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn get_completion_cell(
    conn: &Connection,
    user_id: i64,
    task_id: i64,
    date: &str,
) -> Result<Option<TaskCompletion>, AppError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMPLETION_COLUMNS} FROM task_completions \
         WHERE user_id = ?1 AND task_id = ?2 AND completion_date = ?3"
    ))?;
    let mut rows = stmt.query((user_id, task_id, date))?;

    if let Some(row) = rows.next()? {
        Ok(Some(completion_from_row(row)?))
    } else {
        Ok(None)
    }
}

/// Flips the completion state of one (task, date) cell and recomputes the
/// daily score, all in one transaction: either both the ledger row and the
/// aggregate commit, or neither does.
///
/// A cell with no stored row counts as missed; the first toggle therefore
/// always records a completion. Point values come from the task's current
/// configuration, so editing a task never rewrites history. Inactive tasks
/// may be toggled; hiding them is the caller's concern.
pub fn toggle_completion(
    pool: &DbPool,
    user_id: i64,
    task_id: i64,
    date: &str,
) -> Result<(TaskCompletion, DailyScore), AppError> {
    let mut conn = pool.lock().unwrap();
    let tx = conn.transaction()?;

    let task = get_task_internal(&tx, user_id, task_id)?.ok_or(AppError::NotFound)?;

    let completion_id = match get_completion_cell(&tx, user_id, task_id, date)? {
        Some(existing) => {
            let is_completed = !existing.is_completed;
            tx.execute(
                "UPDATE task_completions SET is_completed = ?1, points_earned = ?2, \
                 updated_at = strftime('%s', 'now') WHERE id = ?3",
                (
                    is_completed as i64,
                    points_earned(&task, is_completed),
                    existing.id,
                ),
            )?;
            existing.id
        }
        None => {
            tx.execute(
                "INSERT INTO task_completions \
                 (task_id, user_id, completion_date, is_completed, points_earned) \
                 VALUES (?1, ?2, ?3, 1, ?4)",
                (task_id, user_id, date, points_earned(&task, true)),
            )?;
            tx.last_insert_rowid()
        }
    };

    let score = recompute_daily_score(&tx, user_id, date)?;

    let completion = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {COMPLETION_COLUMNS} FROM task_completions WHERE id = ?1"
        ))?;
        stmt.query_row([completion_id], completion_from_row)?
    };

    tx.commit()?;
    Ok((completion, score))
}

/// Rebuilds the aggregate for one date from scratch and upserts it keyed
/// on (user_id, score_date). Always a full recomputation, never a patch.
fn recompute_daily_score(
    conn: &Connection,
    user_id: i64,
    date: &str,
) -> Result<DailyScore, AppError> {
    let (total_points, completed_tasks): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(points_earned), 0), COALESCE(SUM(is_completed), 0) \
         FROM task_completions WHERE user_id = ?1 AND completion_date = ?2",
        (user_id, date),
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let total_tasks = count_active_tasks(conn, user_id)?;

    conn.execute(
        "INSERT INTO daily_scores (user_id, score_date, total_points, completed_tasks, total_tasks) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (user_id, score_date) DO UPDATE SET \
             total_points = excluded.total_points, \
             completed_tasks = excluded.completed_tasks, \
             total_tasks = excluded.total_tasks",
        (user_id, date, total_points, completed_tasks, total_tasks),
    )?;

    stored_score(conn, user_id, date)?.ok_or(AppError::NotFound)
}

fn count_active_tasks(conn: &Connection, user_id: i64) -> Result<i64, AppError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE user_id = ?1 AND is_active = 1",
        [user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn score_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DailyScore> {
    let completed_tasks: i64 = row.get(3)?;
    let total_tasks: i64 = row.get(4)?;
    Ok(DailyScore {
        user_id: row.get(0)?,
        score_date: row.get(1)?,
        total_points: row.get(2)?,
        completed_tasks,
        total_tasks,
        completion_rate: completion_rate(completed_tasks, total_tasks),
        created_at: row.get(5)?,
    })
}

fn stored_score(
    conn: &Connection,
    user_id: i64,
    date: &str,
) -> Result<Option<DailyScore>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT user_id, score_date, total_points, completed_tasks, total_tasks, created_at \
         FROM daily_scores WHERE user_id = ?1 AND score_date = ?2",
    )?;
    let mut rows = stmt.query((user_id, date))?;

    if let Some(row) = rows.next()? {
        Ok(Some(score_from_row(row)?))
    } else {
        Ok(None)
    }
}

/// Returns the stored aggregate for the date. When no toggle has ever
/// happened on that date there is no stored row; a zeroed aggregate with a
/// live active-task count is derived on the spot and not persisted.
pub fn get_daily_score(pool: &DbPool, user_id: i64, date: &str) -> Result<DailyScore, AppError> {
    let conn = pool.lock().unwrap();
    if let Some(score) = stored_score(&conn, user_id, date)? {
        return Ok(score);
    }

    let total_tasks = count_active_tasks(&conn, user_id)?;
    Ok(DailyScore {
        user_id,
        score_date: date.to_string(),
        total_points: 0,
        completed_tasks: 0,
        total_tasks,
        completion_rate: 0,
        created_at: now(),
    })
}

pub fn list_daily_scores(
    pool: &DbPool,
    user_id: i64,
    from: &str,
    to: &str,
) -> Result<Vec<DailyScore>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt = conn.prepare(
        "SELECT user_id, score_date, total_points, completed_tasks, total_tasks, created_at \
         FROM daily_scores WHERE user_id = ?1 AND score_date >= ?2 AND score_date <= ?3 \
         ORDER BY score_date ASC",
    )?;
    let scores = stmt
        .query_map((user_id, from, to), score_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(scores)
}

pub fn list_completions(
    pool: &DbPool,
    user_id: i64,
    date: &str,
) -> Result<Vec<TaskCompletion>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMPLETION_COLUMNS} FROM task_completions \
         WHERE user_id = ?1 AND completion_date = ?2 ORDER BY id ASC"
    ))?;
    let completions = stmt
        .query_map((user_id, date), completion_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(completions)
}

pub fn list_completions_range(
    pool: &DbPool,
    user_id: i64,
    from: &str,
    to: &str,
) -> Result<Vec<TaskCompletion>, AppError> {
    let conn = pool.lock().unwrap();
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMPLETION_COLUMNS} FROM task_completions \
         WHERE user_id = ?1 AND completion_date >= ?2 AND completion_date <= ?3 \
         ORDER BY completion_date ASC, id ASC"
    ))?;
    let completions = stmt
        .query_map((user_id, from, to), completion_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(completions)
}
