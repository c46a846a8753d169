//! REST handlers — the presentation boundary.
//!
//! Handlers translate requests into engine commands, run them under
//! the write lock (apply → flush → broadcast), and map rejections to
//! HTTP statuses. No workflow rule lives here.

use crate::auth::{generate_otp, generate_user_id, hash_otp, Credential, SharedState};
use crate::world::{
    require_role, Actor, ApprovalStatus, Command, Event, Priority, Project, Review, Role, Task,
    TaskPatch, TaskStatus, TeamMember, World, WorkflowError,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Request/response types ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: String,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub due_date: NaiveDate,
    pub assigned_to: String,
    pub project_id: Option<Uuid>,
}

fn default_priority() -> Priority {
    Priority::Medium
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub notes: String,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub approved: bool,
    #[serde(default)]
    pub comments: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub name: String,
    pub email: String,
    pub job_role: String,
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_doer: bool,
}

fn default_true() -> bool {
    true
}

/// Returned exactly once, at provisioning time — the only moment
/// the OTP exists in the clear.
#[derive(Debug, Serialize)]
pub struct CreatedAccountResponse {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub otp: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: NaiveDate,
    pub created_at: NaiveDate,
    pub assigned_to: String,
    /// Resolved member name; falls back to the bare email when the
    /// member has been removed from the roster.
    pub assigned_to_name: String,
    pub assigned_by: String,
    pub project_id: Option<Uuid>,
    pub approval: ApprovalStatus,
    pub completion_notes: Option<String>,
    pub admin_review: Option<Review>,
    pub superadmin_review: Option<Review>,
}

fn task_to_response(world: &World, task: &Task) -> TaskResponse {
    TaskResponse {
        id: task.id,
        title: task.title.clone(),
        description: task.description.clone(),
        status: task.status,
        priority: task.priority,
        due_date: task.due_date,
        created_at: task.created_at,
        assigned_to: task.assigned_to.clone(),
        assigned_to_name: world.assignee_label(task),
        assigned_by: task.assigned_by.clone(),
        project_id: task.project_id,
        approval: task.approval,
        completion_notes: task.completion_notes.clone(),
        admin_review: task.admin_review.clone(),
        superadmin_review: task.superadmin_review.clone(),
    }
}

// ── Plumbing ───────────────────────────────────────────────────

fn error_response(e: WorkflowError) -> (StatusCode, String) {
    let status = match e {
        WorkflowError::TaskNotFound
        | WorkflowError::MemberNotFound
        | WorkflowError::ProjectNotFound => StatusCode::NOT_FOUND,
        WorkflowError::PermissionDenied => StatusCode::FORBIDDEN,
        WorkflowError::MissingField(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::InvalidTransition => StatusCode::CONFLICT,
    };
    (status, e.to_string())
}

fn broadcast(state: &SharedState, event: &Event) {
    if let Ok(json) = serde_json::to_string(event) {
        let _ = state.events_tx.send(json);
    }
}

/// Apply a command under the write lock, flush to the save file,
/// broadcast the event. All synchronous — microseconds at this scale.
fn run_command(
    state: &SharedState,
    cmd: Command,
    actor: &Actor,
) -> Result<Event, (StatusCode, String)> {
    let event = {
        let mut world = state.world.write().unwrap();
        let event = world.apply(cmd, actor).map_err(|e| {
            tracing::warn!(actor = %actor.email, error = %e, "command rejected");
            error_response(e)
        })?;

        if let Err(e) = state.save_file.flush(&world, &event) {
            tracing::error!(error = %e, "save file flush failed");
        }
        event
    };

    broadcast(state, &event);
    Ok(event)
}

fn event_task_response(state: &SharedState, event: &Event) -> TaskResponse {
    let world = state.world.read().unwrap();
    match event {
        Event::TaskCreated { task, .. }
        | Event::TaskUpdated { task, .. }
        | Event::TaskSubmitted { task, .. }
        | Event::TaskReviewed { task, .. } => task_to_response(&world, task),
        // run_command only routes task events here.
        _ => unreachable!("expected a task event"),
    }
}

// ── Task handlers ──────────────────────────────────────────────

// GET /api/tasks
pub async fn list_tasks(State(state): State<SharedState>) -> Json<Vec<TaskResponse>> {
    let world = state.world.read().unwrap();
    let mut tasks: Vec<&Task> = world.tasks.values().collect();
    tasks.sort_by_key(|t| t.due_date);
    Json(tasks.iter().map(|t| task_to_response(&world, t)).collect())
}

// GET /api/tasks/:id
pub async fn get_task(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    let world = state.world.read().unwrap();
    let task = world
        .task(id)
        .ok_or_else(|| error_response(WorkflowError::TaskNotFound))?;
    Ok(Json(task_to_response(&world, task)))
}

// GET /api/tasks/assigned — the caller's personal queue.
pub async fn assigned_tasks(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
) -> Json<Vec<TaskResponse>> {
    let world = state.world.read().unwrap();
    Json(
        world
            .tasks_assigned_to(&actor.email)
            .iter()
            .map(|t| task_to_response(&world, t))
            .collect(),
    )
}

// GET /api/tasks/review-queue — tasks awaiting the admin verdict.
pub async fn review_queue(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<TaskResponse>>, (StatusCode, String)> {
    require_role(&actor, &[Role::Admin]).map_err(error_response)?;
    let world = state.world.read().unwrap();
    Ok(Json(
        world
            .pending_admin_review()
            .iter()
            .map(|t| task_to_response(&world, t))
            .collect(),
    ))
}

// GET /api/tasks/approval-queue — tasks awaiting the final verdict.
pub async fn approval_queue(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<TaskResponse>>, (StatusCode, String)> {
    require_role(&actor, &[Role::Superadmin]).map_err(error_response)?;
    let world = state.world.read().unwrap();
    Ok(Json(
        world
            .pending_superadmin_approval()
            .iter()
            .map(|t| task_to_response(&world, t))
            .collect(),
    ))
}

// POST /api/tasks
pub async fn create_task(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), (StatusCode, String)> {
    let event = run_command(
        &state,
        Command::CreateTask {
            title: payload.title,
            description: payload.description,
            priority: payload.priority,
            due_date: payload.due_date,
            assigned_to: payload.assigned_to,
            project_id: payload.project_id,
        },
        &actor,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(event_task_response(&state, &event)),
    ))
}

// PATCH /api/tasks/:id
pub async fn update_task(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    let event = run_command(&state, Command::UpdateTask { task_id: id, patch }, &actor)?;
    Ok(Json(event_task_response(&state, &event)))
}

// DELETE /api/tasks/:id
pub async fn delete_task(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    run_command(&state, Command::DeleteTask { task_id: id }, &actor)?;
    Ok(StatusCode::NO_CONTENT)
}

// POST /api/tasks/:id/submit — assignee marks the work done.
pub async fn submit_task(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    let event = run_command(
        &state,
        Command::SubmitCompletion {
            task_id: id,
            notes: payload.notes,
        },
        &actor,
    )?;
    Ok(Json(event_task_response(&state, &event)))
}

// POST /api/tasks/:id/admin-review
pub async fn admin_review(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    let event = run_command(
        &state,
        Command::AdminReview {
            task_id: id,
            approved: payload.approved,
            comments: payload.comments,
        },
        &actor,
    )?;
    Ok(Json(event_task_response(&state, &event)))
}

// POST /api/tasks/:id/superadmin-review
pub async fn superadmin_review(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    let event = run_command(
        &state,
        Command::SuperadminReview {
            task_id: id,
            approved: payload.approved,
            comments: payload.comments,
        },
        &actor,
    )?;
    Ok(Json(event_task_response(&state, &event)))
}

// ── Member handlers ────────────────────────────────────────────

// GET /api/members
pub async fn list_members(State(state): State<SharedState>) -> Json<Vec<TeamMember>> {
    let world = state.world.read().unwrap();
    let mut members: Vec<TeamMember> = world.members.values().cloned().collect();
    members.sort_by(|a, b| a.name.cmp(&b.name));
    Json(members)
}

// GET /api/members/doers — the assignable roster.
pub async fn list_doers(State(state): State<SharedState>) -> Json<Vec<TeamMember>> {
    let world = state.world.read().unwrap();
    Json(world.doers().into_iter().cloned().collect())
}

// DELETE /api/members/:id
pub async fn remove_member(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    run_command(&state, Command::RemoveMember { member_id: id }, &actor)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Project handlers ───────────────────────────────────────────

// GET /api/projects
pub async fn list_projects(State(state): State<SharedState>) -> Json<Vec<Project>> {
    let world = state.world.read().unwrap();
    let mut projects: Vec<Project> = world.projects.values().cloned().collect();
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    Json(projects)
}

// POST /api/projects
pub async fn create_project(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), (StatusCode, String)> {
    let event = run_command(
        &state,
        Command::AddProject {
            name: payload.name,
            description: payload.description,
            color: payload.color,
        },
        &actor,
    )?;

    match event {
        Event::ProjectAdded { project, .. } => Ok((StatusCode::CREATED, Json(project))),
        _ => unreachable!("expected ProjectAdded"),
    }
}

// DELETE /api/projects/:id
pub async fn remove_project(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    run_command(&state, Command::RemoveProject { project_id: id }, &actor)?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Account provisioning ───────────────────────────────────────

// POST /api/accounts — superadmin creates a roster entry plus the
// login credential, and hands the OTP back exactly once.
pub async fn create_account(
    State(state): State<SharedState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CreatedAccountResponse>), (StatusCode, String)> {
    {
        let directory = state.directory.read().unwrap();
        if directory.find(&payload.email, payload.role).is_some() {
            return Err((
                StatusCode::CONFLICT,
                "An account with this email and role already exists".to_string(),
            ));
        }
    }

    // The engine command carries the superadmin gate and the field
    // validation; a rejection here means no credential either.
    run_command(
        &state,
        Command::AddMember {
            name: payload.name.clone(),
            email: payload.email.clone(),
            job_role: payload.job_role,
            is_doer: payload.is_doer,
        },
        &actor,
    )?;

    let otp = generate_otp();
    let credential = Credential {
        user_id: generate_user_id(&payload.email, payload.role),
        name: payload.name,
        email: payload.email,
        otp_hash: hash_otp(&otp),
        role: payload.role,
    };

    state
        .save_file
        .save_credential(&credential)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let response = CreatedAccountResponse {
        user_id: credential.user_id.clone(),
        name: credential.name.clone(),
        email: credential.email.clone(),
        otp,
        role: credential.role,
    };

    state.directory.write().unwrap().credentials.push(credential);

    tracing::info!(user = %response.name, role = ?response.role, "account provisioned");
    Ok((StatusCode::CREATED, Json(response)))
}

// ── Tests ──────────────────────────────────────────────────────
