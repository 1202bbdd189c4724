use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

use crate::error::AppError;

/// Fixed category set for habit tasks.
pub const TASK_CATEGORIES: &[&str] = &[
    "Health",
    "Learning",
    "Productivity",
    "Social",
    "Creativity",
    "Mindfulness",
    "Finance",
    "Fitness",
    "Career",
    "Personal",
];

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parses a canonical `YYYY-MM-DD` calendar date. The data layer is
/// timezone-naive; callers resolve timezone-to-date before reaching it.
pub fn parse_date(value: &str) -> Result<Date, AppError> {
    Date::parse(value, DATE_FORMAT)
        .map_err(|_| AppError::Validation("date must be in YYYY-MM-DD format".to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub positive_points: i64,
    pub negative_points: i64,
    pub category: Option<String>,
    pub difficulty_level: i64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Points a completion is worth given the task's *current* configuration.
/// A missed task costs the penalty magnitude; completion pays the reward.
pub fn points_earned(task: &Task, is_completed: bool) -> i64 {
    if is_completed {
        task.positive_points
    } else {
        -task.negative_points
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTask {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_positive_points")]
    pub positive_points: i64,
    #[serde(default)]
    pub negative_points: i64,
    pub category: Option<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty_level: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_positive_points() -> i64 {
    1
}

fn default_difficulty() -> i64 {
    1
}

fn default_active() -> bool {
    true
}

impl CreateTask {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_name(&self.name)?;
        validate_description(self.description.as_deref())?;
        validate_points(self.positive_points, "positive_points")?;
        validate_points(self.negative_points, "negative_points")?;
        validate_category(self.category.as_deref())?;
        validate_difficulty(self.difficulty_level)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTask {
    pub name: Option<String>,
    pub description: Option<String>,
    pub positive_points: Option<i64>,
    pub negative_points: Option<i64>,
    pub category: Option<String>,
    pub difficulty_level: Option<i64>,
    pub is_active: Option<bool>,
}

impl UpdateTask {
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(ref name) = self.name {
            validate_name(name)?;
        }
        validate_description(self.description.as_deref())?;
        if let Some(points) = self.positive_points {
            validate_points(points, "positive_points")?;
        }
        if let Some(points) = self.negative_points {
            validate_points(points, "negative_points")?;
        }
        validate_category(self.category.as_deref())?;
        if let Some(level) = self.difficulty_level {
            validate_difficulty(level)?;
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<(), AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("name is required".to_string()));
    }
    if trimmed.chars().count() > 100 {
        return Err(AppError::Validation(
            "name must be at most 100 characters".to_string(),
        ));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<(), AppError> {
    if let Some(text) = description {
        if text.chars().count() > 500 {
            return Err(AppError::Validation(
                "description must be at most 500 characters".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_points(value: i64, field: &str) -> Result<(), AppError> {
    if !(0..=100).contains(&value) {
        return Err(AppError::Validation(format!(
            "{field} must be between 0 and 100"
        )));
    }
    Ok(())
}

fn validate_category(category: Option<&str>) -> Result<(), AppError> {
    if let Some(value) = category {
        if !TASK_CATEGORIES.contains(&value) {
            return Err(AppError::Validation(format!("unknown category {value:?}")));
        }
    }
    Ok(())
}

fn validate_difficulty(level: i64) -> Result<(), AppError> {
    if !(1..=5).contains(&level) {
        return Err(AppError::Validation(
            "difficulty_level must be between 1 and 5".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub id: i64,
    pub task_id: i64,
    pub user_id: i64,
    pub completion_date: String,
    pub is_completed: bool,
    pub points_earned: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyScore {
    pub user_id: i64,
    pub score_date: String,
    pub total_points: i64,
    pub completed_tasks: i64,
    pub total_tasks: i64,
    /// Derived on read, never stored.
    pub completion_rate: i64,
    pub created_at: i64,
}

/// Percentage of active tasks completed, rounded to the nearest integer.
pub fn completion_rate(completed_tasks: i64, total_tasks: i64) -> i64 {
    if total_tasks <= 0 {
        return 0;
    }
    ((completed_tasks as f64 / total_tasks as f64) * 100.0).round() as i64
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub total_tasks: i64,
    pub active_tasks: i64,
    pub average_difficulty: f64,
    pub category_counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: i64,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub date: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub completion: TaskCompletion,
    pub score: DailyScore,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub active: Option<bool>,
    pub category: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompletionQuery {
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRangeQuery {
    pub from: String,
    pub to: String,
}
