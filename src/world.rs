use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ── Entity types ──────────────────────────────────────────────

/// System access role carried by a logged-in actor.
/// Distinct from a team member's free-text job role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Staff,
    Admin,
    Superadmin,
}

/// Work-completion status. Correlated with, but not identical to,
/// the approval pipeline stage (a Completed task may still be
/// waiting on admin or superadmin review).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    OnHold,
}

/// Approval pipeline: Assigned → InReview → AdminApproved →
/// SuperadminApproved, with Rejected as the retry point.
///
/// SuperadminApproved is the only terminal state. Rejected is
/// reachable from either review stage and exits only via resubmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalStatus {
    Assigned,
    InReview,
    AdminApproved,
    SuperadminApproved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// One review verdict, recorded at each stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewed_by: String,
    pub reviewed_at: NaiveDate,
    pub comments: String,
}

/// A task — the unit of work moving through the approval pipeline.
///
/// `assigned_to` is a member email. It may dangle after the member
/// is removed from the roster; reads fall back to the bare email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: NaiveDate,
    pub created_at: NaiveDate,
    pub assigned_to: String,
    pub assigned_by: String,
    pub project_id: Option<Uuid>,
    pub approval: ApprovalStatus,
    pub completion_notes: Option<String>,
    pub admin_review: Option<Review>,
    pub superadmin_review: Option<Review>,
}

impl Task {
    /// Fully closed: approved at both stages, nothing left to do.
    pub fn is_closed(&self) -> bool {
        self.approval == ApprovalStatus::SuperadminApproved
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Free-text job role ("Video Editor"), not the system role.
    pub job_role: String,
    /// Eligible to receive task assignments.
    pub is_doer: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub color: Option<String>,
}

/// The identity an operation runs as. Resolved by the auth layer —
/// the engine never authenticates, it only checks roles.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

// ── Commands (client → engine) ────────────────────────────────

/// Partial update for a task. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
    pub assigned_to: Option<String>,
    pub project_id: Option<Uuid>,
}

/// A command is something an actor wants to happen.
/// The engine validates role and fields, applies it, and returns
/// an Event (or a typed rejection).
#[derive(Debug, Clone)]
pub enum Command {
    CreateTask {
        title: String,
        description: String,
        priority: Priority,
        due_date: NaiveDate,
        assigned_to: String,
        project_id: Option<Uuid>,
    },
    UpdateTask {
        task_id: Uuid,
        patch: TaskPatch,
    },
    DeleteTask {
        task_id: Uuid,
    },
    SubmitCompletion {
        task_id: Uuid,
        notes: String,
    },
    AdminReview {
        task_id: Uuid,
        approved: bool,
        comments: String,
    },
    SuperadminReview {
        task_id: Uuid,
        approved: bool,
        comments: String,
    },
    AddMember {
        name: String,
        email: String,
        job_role: String,
        is_doer: bool,
    },
    RemoveMember {
        member_id: Uuid,
    },
    AddProject {
        name: String,
        description: String,
        color: Option<String>,
    },
    RemoveProject {
        project_id: Uuid,
    },
}

// ── Events (engine → subscribers) ─────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStage {
    Admin,
    Superadmin,
}

/// An event is what actually happened. Broadcast to all connected
/// clients and flushed to the save file. Each event carries the
/// revision it was applied at and enough state to render without
/// a follow-up query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TaskCreated {
        revision: u64,
        task: Task,
    },
    TaskUpdated {
        revision: u64,
        task: Task,
    },
    TaskSubmitted {
        revision: u64,
        task: Task,
    },
    TaskReviewed {
        revision: u64,
        task: Task,
        stage: ReviewStage,
        approved: bool,
    },
    TaskDeleted {
        revision: u64,
        task_id: Uuid,
    },
    MemberAdded {
        revision: u64,
        member: TeamMember,
    },
    MemberRemoved {
        revision: u64,
        member_id: Uuid,
    },
    ProjectAdded {
        revision: u64,
        project: Project,
    },
    ProjectRemoved {
        revision: u64,
        project_id: Uuid,
    },
}

// ── Errors ─────────────────────────────────────────────────────

/// Rejection reasons. All local and non-retryable: a denied or
/// invalid command cannot succeed without a changed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    TaskNotFound,
    MemberNotFound,
    ProjectNotFound,
    /// Actor role or identity insufficient for the operation.
    PermissionDenied,
    /// Required field missing or empty.
    MissingField(&'static str),
    /// Task is not in the state this command requires.
    InvalidTransition,
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowError::TaskNotFound => write!(f, "task not found"),
            WorkflowError::MemberNotFound => write!(f, "team member not found"),
            WorkflowError::ProjectNotFound => write!(f, "project not found"),
            WorkflowError::PermissionDenied => write!(f, "permission denied"),
            WorkflowError::MissingField(field) => write!(f, "missing required field: {field}"),
            WorkflowError::InvalidTransition => {
                write!(f, "task is not in a state that allows this operation")
            }
        }
    }
}

// ── Authorization policy ───────────────────────────────────────

/// The one role check. Every gated operation goes through here so
/// the rule lives in a single, independently testable place.
pub fn require_role(actor: &Actor, allowed: &[Role]) -> Result<(), WorkflowError> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(WorkflowError::PermissionDenied)
    }
}

fn require_text(value: &str, field: &'static str) -> Result<(), WorkflowError> {
    if value.trim().is_empty() {
        Err(WorkflowError::MissingField(field))
    } else {
        Ok(())
    }
}

// ── The World ──────────────────────────────────────────────────

/// The authoritative application state. Lives in memory. Loaded
/// from the save file on boot. All mutations go through apply()
/// which validates, mutates, and returns an Event for broadcast.
pub struct World {
    pub tasks: HashMap<Uuid, Task>,
    pub members: HashMap<Uuid, TeamMember>,
    pub projects: HashMap<Uuid, Project>,
    pub revision: u64,
    /// Recent event log for reconnect replay.
    pub log: Vec<(u64, Event)>,
}

impl World {
    pub fn new() -> Self {
        World {
            tasks: HashMap::new(),
            members: HashMap::new(),
            projects: HashMap::new(),
            revision: 0,
            log: Vec::new(),
        }
    }

    /// Apply a command to the world. Returns the resulting Event on
    /// success. This is THE mutation codepath — every state change
    /// goes through here, and a failed command changes nothing.
    pub fn apply(&mut self, cmd: Command, actor: &Actor) -> Result<Event, WorkflowError> {
        match cmd {
            Command::CreateTask {
                title,
                description,
                priority,
                due_date,
                assigned_to,
                project_id,
            } => {
                require_role(actor, &[Role::Admin, Role::Superadmin])?;
                require_text(&title, "title")?;
                require_text(&description, "description")?;
                require_text(&assigned_to, "assigned_to")?;

                let task = Task {
                    id: Uuid::new_v4(),
                    title,
                    description,
                    status: TaskStatus::Pending,
                    priority,
                    due_date,
                    created_at: Utc::now().date_naive(),
                    assigned_to,
                    assigned_by: actor.email.clone(),
                    project_id,
                    approval: ApprovalStatus::Assigned,
                    completion_notes: None,
                    admin_review: None,
                    superadmin_review: None,
                };

                self.revision += 1;
                let event = Event::TaskCreated {
                    revision: self.revision,
                    task: task.clone(),
                };
                self.tasks.insert(task.id, task);
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::UpdateTask { task_id, patch } => {
                require_role(actor, &[Role::Admin, Role::Superadmin])?;

                // Validate before touching the task so a bad patch
                // leaves it unchanged.
                if let Some(ref title) = patch.title {
                    require_text(title, "title")?;
                }
                if let Some(ref description) = patch.description {
                    require_text(description, "description")?;
                }
                if let Some(ref assigned_to) = patch.assigned_to {
                    require_text(assigned_to, "assigned_to")?;
                }

                let task = self
                    .tasks
                    .get_mut(&task_id)
                    .ok_or(WorkflowError::TaskNotFound)?;

                if let Some(title) = patch.title {
                    task.title = title;
                }
                if let Some(description) = patch.description {
                    task.description = description;
                }
                if let Some(status) = patch.status {
                    task.status = status;
                }
                if let Some(priority) = patch.priority {
                    task.priority = priority;
                }
                if let Some(due_date) = patch.due_date {
                    task.due_date = due_date;
                }
                if let Some(assigned_to) = patch.assigned_to {
                    task.assigned_to = assigned_to;
                }
                if let Some(project_id) = patch.project_id {
                    task.project_id = Some(project_id);
                }

                self.revision += 1;
                let event = Event::TaskUpdated {
                    revision: self.revision,
                    task: task.clone(),
                };
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::DeleteTask { task_id } => {
                require_role(actor, &[Role::Admin, Role::Superadmin])?;

                if self.tasks.remove(&task_id).is_none() {
                    return Err(WorkflowError::TaskNotFound);
                }

                self.revision += 1;
                let event = Event::TaskDeleted {
                    revision: self.revision,
                    task_id,
                };
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::SubmitCompletion { task_id, notes } => {
                require_text(&notes, "notes")?;

                let task = self
                    .tasks
                    .get_mut(&task_id)
                    .ok_or(WorkflowError::TaskNotFound)?;

                // Only the assignee may submit their own work.
                if task.assigned_to != actor.email {
                    return Err(WorkflowError::PermissionDenied);
                }

                // First submit or resubmit after a rejection.
                if task.approval != ApprovalStatus::Assigned
                    && task.approval != ApprovalStatus::Rejected
                {
                    return Err(WorkflowError::InvalidTransition);
                }

                task.status = TaskStatus::Completed;
                task.approval = ApprovalStatus::InReview;
                task.completion_notes = Some(notes);

                self.revision += 1;
                let event = Event::TaskSubmitted {
                    revision: self.revision,
                    task: task.clone(),
                };
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::AdminReview {
                task_id,
                approved,
                comments,
            } => {
                require_role(actor, &[Role::Admin])?;

                // Rejections must say why.
                if !approved {
                    require_text(&comments, "comments")?;
                }

                let task = self
                    .tasks
                    .get_mut(&task_id)
                    .ok_or(WorkflowError::TaskNotFound)?;

                if task.approval != ApprovalStatus::InReview {
                    return Err(WorkflowError::InvalidTransition);
                }

                task.admin_review = Some(Review {
                    reviewed_by: actor.name.clone(),
                    reviewed_at: Utc::now().date_naive(),
                    comments,
                });

                if approved {
                    task.approval = ApprovalStatus::AdminApproved;
                } else {
                    task.approval = ApprovalStatus::Rejected;
                    task.status = TaskStatus::InProgress;
                }

                self.revision += 1;
                let event = Event::TaskReviewed {
                    revision: self.revision,
                    task: task.clone(),
                    stage: ReviewStage::Admin,
                    approved,
                };
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::SuperadminReview {
                task_id,
                approved,
                comments,
            } => {
                require_role(actor, &[Role::Superadmin])?;

                if !approved {
                    require_text(&comments, "comments")?;
                }

                let task = self
                    .tasks
                    .get_mut(&task_id)
                    .ok_or(WorkflowError::TaskNotFound)?;

                if task.approval != ApprovalStatus::AdminApproved {
                    return Err(WorkflowError::InvalidTransition);
                }

                task.superadmin_review = Some(Review {
                    reviewed_by: actor.name.clone(),
                    reviewed_at: Utc::now().date_naive(),
                    comments,
                });

                if approved {
                    task.approval = ApprovalStatus::SuperadminApproved;
                } else {
                    task.approval = ApprovalStatus::Rejected;
                    task.status = TaskStatus::InProgress;
                }

                self.revision += 1;
                let event = Event::TaskReviewed {
                    revision: self.revision,
                    task: task.clone(),
                    stage: ReviewStage::Superadmin,
                    approved,
                };
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::AddMember {
                name,
                email,
                job_role,
                is_doer,
            } => {
                require_role(actor, &[Role::Superadmin])?;
                require_text(&name, "name")?;
                require_text(&email, "email")?;
                require_text(&job_role, "job_role")?;

                let member = TeamMember {
                    id: Uuid::new_v4(),
                    name,
                    email,
                    job_role,
                    is_doer,
                    is_active: true,
                };

                self.revision += 1;
                let event = Event::MemberAdded {
                    revision: self.revision,
                    member: member.clone(),
                };
                self.members.insert(member.id, member);
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::RemoveMember { member_id } => {
                require_role(actor, &[Role::Superadmin])?;

                // No cascade: tasks assigned to this member keep
                // their email reference and reads degrade to it.
                if self.members.remove(&member_id).is_none() {
                    return Err(WorkflowError::MemberNotFound);
                }

                self.revision += 1;
                let event = Event::MemberRemoved {
                    revision: self.revision,
                    member_id,
                };
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::AddProject {
                name,
                description,
                color,
            } => {
                require_role(actor, &[Role::Admin, Role::Superadmin])?;
                require_text(&name, "name")?;

                let project = Project {
                    id: Uuid::new_v4(),
                    name,
                    description,
                    color,
                };

                self.revision += 1;
                let event = Event::ProjectAdded {
                    revision: self.revision,
                    project: project.clone(),
                };
                self.projects.insert(project.id, project);
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }

            Command::RemoveProject { project_id } => {
                require_role(actor, &[Role::Admin, Role::Superadmin])?;

                if self.projects.remove(&project_id).is_none() {
                    return Err(WorkflowError::ProjectNotFound);
                }

                self.revision += 1;
                let event = Event::ProjectRemoved {
                    revision: self.revision,
                    project_id,
                };
                self.log.push((self.revision, event.clone()));
                Ok(event)
            }
        }
    }

    // ── Queries (pure reads) ───────────────────────────────────

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn member(&self, id: Uuid) -> Option<&TeamMember> {
        self.members.get(&id)
    }

    pub fn project(&self, id: Uuid) -> Option<&Project> {
        self.projects.get(&id)
    }

    /// Look up a member by email (linear scan — fine for a roster
    /// of tens).
    pub fn member_by_email(&self, email: &str) -> Option<&TeamMember> {
        self.members.values().find(|m| m.email == email)
    }

    /// Display label for a task's assignee: the member's name, or
    /// the bare email once the member has been removed.
    pub fn assignee_label(&self, task: &Task) -> String {
        self.member_by_email(&task.assigned_to)
            .map(|m| m.name.clone())
            .unwrap_or_else(|| task.assigned_to.clone())
    }

    /// A staff member's personal queue, soonest due date first.
    pub fn tasks_assigned_to(&self, email: &str) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.assigned_to == email)
            .collect();
        tasks.sort_by_key(|t| t.due_date);
        tasks
    }

    /// Tasks waiting on an admin verdict, soonest due date first.
    pub fn pending_admin_review(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.approval == ApprovalStatus::InReview)
            .collect();
        tasks.sort_by_key(|t| t.due_date);
        tasks
    }

    /// Tasks waiting on the final superadmin verdict.
    pub fn pending_superadmin_approval(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.approval == ApprovalStatus::AdminApproved)
            .collect();
        tasks.sort_by_key(|t| t.due_date);
        tasks
    }

    /// The assignable roster: active members flagged as doers.
    pub fn doers(&self) -> Vec<&TeamMember> {
        let mut doers: Vec<&TeamMember> = self
            .members
            .values()
            .filter(|m| m.is_doer && m.is_active)
            .collect();
        doers.sort_by(|a, b| a.name.cmp(&b.name));
        doers
    }

    /// Get all events since a given revision (for reconnect replay).
    /// Returns None if the revision is too old (caller should send
    /// a full snapshot).
    pub fn events_since(&self, since_rev: u64) -> Option<&[(u64, Event)]> {
        let start = self.log.iter().position(|(rev, _)| *rev > since_rev);
        match start {
            Some(idx) => Some(&self.log[idx..]),
            None if since_rev >= self.revision => Some(&[]), // up to date
            None => None, // too old, log was trimmed
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────
