use axum::extract::{Path, Query, State};
use axum::{http::StatusCode, response::IntoResponse, Json};
use tracing::info;

use crate::db::{
    create_task, delete_task, get_daily_score, get_task, list_completions,
    list_completions_range, list_daily_scores, list_tasks, task_stats, toggle_completion,
    update_task,
};
use crate::error::AppError;
use crate::middleware::CurrentUser;
use crate::models::{
    parse_date, CompletionQuery, CreateTask, DailyScore, ScoreRangeQuery, Task, TaskCompletion,
    TaskListQuery, TaskStats, ToggleRequest, ToggleResponse, UpdateTask,
};
use crate::AppState;

pub async fn list_all_tasks(
    user: CurrentUser,
    State(state): State<AppState>,
    Query(filter): Query<TaskListQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let tasks = list_tasks(&state.db, user.id, &filter)?;
    info!(count = tasks.len(), "Listed tasks");
    Ok(Json(tasks))
}

pub async fn create_new_task(
    user: CurrentUser,
    State(state): State<AppState>,
    Json(req): Json<CreateTask>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    req.validate()?;

    let task = create_task(&state.db, user.id, &req)?;
    info!(id = task.id, name = %task.name, "Created task");
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_single_task(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Task>, AppError> {
    match get_task(&state.db, user.id, id)? {
        Some(task) => Ok(Json(task)),
        None => Err(AppError::NotFound),
    }
}

pub async fn update_existing_task(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateTask>,
) -> Result<Json<Task>, AppError> {
    req.validate()?;

    match update_task(&state.db, user.id, id, &req)? {
        Some(task) => {
            info!(id = task.id, "Updated task");
            Ok(Json(task))
        }
        None => Err(AppError::NotFound),
    }
}

pub async fn delete_existing_task(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if delete_task(&state.db, user.id, id)? {
        info!(id, "Deleted task");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

pub async fn toggle_task(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>, AppError> {
    parse_date(&req.date)?;

    let (completion, score) = toggle_completion(&state.db, user.id, id, &req.date)?;
    info!(
        task_id = id,
        date = %req.date,
        completed = completion.is_completed,
        points = completion.points_earned,
        "Toggled completion"
    );
    Ok(Json(ToggleResponse { completion, score }))
}

pub async fn list_date_completions(
    user: CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<CompletionQuery>,
) -> Result<Json<Vec<TaskCompletion>>, AppError> {
    let completions = match (query.date, query.from, query.to) {
        (Some(date), None, None) => {
            parse_date(&date)?;
            list_completions(&state.db, user.id, &date)?
        }
        (None, Some(from), Some(to)) => {
            parse_date(&from)?;
            parse_date(&to)?;
            list_completions_range(&state.db, user.id, &from, &to)?
        }
        _ => {
            return Err(AppError::Validation(
                "either date or both from and to are required".to_string(),
            ));
        }
    };
    Ok(Json(completions))
}

pub async fn get_score(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<DailyScore>, AppError> {
    parse_date(&date)?;
    let score = get_daily_score(&state.db, user.id, &date)?;
    Ok(Json(score))
}

pub async fn list_scores(
    user: CurrentUser,
    State(state): State<AppState>,
    Query(query): Query<ScoreRangeQuery>,
) -> Result<Json<Vec<DailyScore>>, AppError> {
    parse_date(&query.from)?;
    parse_date(&query.to)?;
    let scores = list_daily_scores(&state.db, user.id, &query.from, &query.to)?;
    Ok(Json(scores))
}

pub async fn get_stats(
    user: CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<TaskStats>, AppError> {
    let stats = task_stats(&state.db, user.id)?;
    Ok(Json(stats))
}
