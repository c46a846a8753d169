//! World ↔ redb persistence.
//!
//! redb is a save file: loaded on boot, flushed on every mutation.
//! Never queried at runtime — World is the runtime truth. Login
//! credentials live in their own table beside the workflow state.

use crate::auth::{hash_otp, Credential, Directory};
use crate::world::{Event, Project, Task, TeamMember, World};
use redb::{Database, ReadableTable, TableDefinition};
use std::sync::Arc;

const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");
const MEMBERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("members");
const PROJECTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("projects");
const CREDENTIALS: TableDefinition<&str, &[u8]> = TableDefinition::new("credentials");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Bootstrap superadmin identity, created on an empty database.
pub const SEED_SUPERADMIN_USER_ID: &str = "SPA-ADMIN-0001";

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

impl SaveFile {
    /// Open (or create) the save file at the given path.
    /// Creates tables if they don't exist.
    pub fn open(path: &str) -> Result<Self, SaveFileError> {
        let db = Database::create(path)?;

        // Ensure tables exist
        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(TASKS)?;
            let _ = txn.open_table(MEMBERS)?;
            let _ = txn.open_table(PROJECTS)?;
            let _ = txn.open_table(CREDENTIALS)?;
            let _ = txn.open_table(META)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load the entire World from disk. Called once at boot.
    pub fn load_world(&self) -> Result<World, SaveFileError> {
        let mut world = World::new();
        let txn = self.db.begin_read()?;

        let tasks_table = txn.open_table(TASKS)?;
        for entry in tasks_table.iter()? {
            let (_, value) = entry?;
            let task: Task = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.tasks.insert(task.id, task);
        }

        let members_table = txn.open_table(MEMBERS)?;
        for entry in members_table.iter()? {
            let (_, value) = entry?;
            let member: TeamMember = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.members.insert(member.id, member);
        }

        let projects_table = txn.open_table(PROJECTS)?;
        for entry in projects_table.iter()? {
            let (_, value) = entry?;
            let project: Project = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            world.projects.insert(project.id, project);
        }

        let meta_table = txn.open_table(META)?;
        if let Some(rev_data) = meta_table.get("revision")? {
            let bytes = rev_data.value();
            if bytes.len() == 8 {
                world.revision = u64::from_le_bytes(bytes.try_into().unwrap());
            }
        }

        Ok(world)
    }

    /// Load the credential directory. Called once at boot.
    pub fn load_credentials(&self) -> Result<Directory, SaveFileError> {
        let mut credentials = Vec::new();
        let txn = self.db.begin_read()?;

        let table = txn.open_table(CREDENTIALS)?;
        for entry in table.iter()? {
            let (_, value) = entry?;
            let credential: Credential = postcard::from_bytes(value.value())
                .map_err(|e| SaveFileError::Decode(e.to_string()))?;
            credentials.push(credential);
        }

        Ok(Directory::new(credentials))
    }

    /// Flush a single event to disk. Called after every successful
    /// World::apply(). Writes the affected entity + updated revision
    /// in one transaction.
    pub fn flush(&self, world: &World, event: &Event) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut tasks = txn.open_table(TASKS)?;
            let mut members = txn.open_table(MEMBERS)?;
            let mut projects = txn.open_table(PROJECTS)?;
            let mut meta = txn.open_table(META)?;

            match event {
                Event::TaskCreated { task, .. }
                | Event::TaskUpdated { task, .. }
                | Event::TaskSubmitted { task, .. }
                | Event::TaskReviewed { task, .. } => {
                    let bytes = postcard::to_allocvec(task)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    tasks.insert(task.id.as_bytes().as_slice(), bytes.as_slice())?;
                }

                Event::TaskDeleted { task_id, .. } => {
                    tasks.remove(task_id.as_bytes().as_slice())?;
                }

                Event::MemberAdded { member, .. } => {
                    let bytes = postcard::to_allocvec(member)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    members.insert(member.id.as_bytes().as_slice(), bytes.as_slice())?;
                }

                Event::MemberRemoved { member_id, .. } => {
                    members.remove(member_id.as_bytes().as_slice())?;
                }

                Event::ProjectAdded { project, .. } => {
                    let bytes = postcard::to_allocvec(project)
                        .map_err(|e| SaveFileError::Encode(e.to_string()))?;
                    projects.insert(project.id.as_bytes().as_slice(), bytes.as_slice())?;
                }

                Event::ProjectRemoved { project_id, .. } => {
                    projects.remove(project_id.as_bytes().as_slice())?;
                }
            }

            // Always update revision
            meta.insert("revision", world.revision.to_le_bytes().as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Write a credential to the save file (account provisioning
    /// and seeding).
    pub fn save_credential(&self, credential: &Credential) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CREDENTIALS)?;
            let bytes = postcard::to_allocvec(credential)
                .map_err(|e| SaveFileError::Encode(e.to_string()))?;
            table.insert(credential.user_id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Seed the bootstrap superadmin if no superadmin credential
    /// exists yet. Returns true if created.
    pub fn ensure_default_superadmin(
        &self,
        directory: &mut Directory,
        email: &str,
        otp: &str,
    ) -> Result<bool, SaveFileError> {
        if directory.has_superadmin() {
            return Ok(false);
        }

        let credential = Credential {
            user_id: SEED_SUPERADMIN_USER_ID.to_string(),
            name: "System Administrator".to_string(),
            email: email.to_string(),
            otp_hash: hash_otp(otp),
            role: crate::world::Role::Superadmin,
        };

        self.save_credential(&credential)?;
        directory.credentials.push(credential);
        Ok(true)
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SaveFileError {
    Redb(String),
    Decode(String),
    Encode(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

impl std::fmt::Display for SaveFileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveFileError::Redb(e) => write!(f, "redb: {e}"),
            SaveFileError::Decode(e) => write!(f, "decode: {e}"),
            SaveFileError::Encode(e) => write!(f, "encode: {e}"),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verify_otp;
    use crate::world::{
        Actor, ApprovalStatus, Command, Priority, Role, TaskStatus,
    };
    use chrono::NaiveDate;
    use std::fs;
    use uuid::Uuid;

    /// Create a temp save file that auto-cleans.
    fn temp_save(name: &str) -> (SaveFile, String) {
        let path = format!("/tmp/taskflow_test_{name}_{}.redb", std::process::id());
        let _ = fs::remove_file(&path); // clean up any leftover
        let sf = SaveFile::open(&path).unwrap();
        (sf, path)
    }

    fn cleanup(path: &str) {
        let _ = fs::remove_file(path);
    }

    fn staff() -> Actor {
        Actor {
            user_id: "STF-SAMR-0001".into(),
            name: "Samruddhi Shivgan".into(),
            email: "samruddhi@company.com".into(),
            role: Role::Staff,
        }
    }

    fn admin() -> Actor {
        Actor {
            user_id: "ADM-ANIK-0001".into(),
            name: "Anika Rao".into(),
            email: "anika@company.com".into(),
            role: Role::Admin,
        }
    }

    fn superadmin() -> Actor {
        Actor {
            user_id: SEED_SUPERADMIN_USER_ID.into(),
            name: "System Administrator".into(),
            email: "sysadmin@company.com".into(),
            role: Role::Superadmin,
        }
    }

    fn create_task(world: &mut World, sf: &SaveFile) -> Uuid {
        let event = world
            .apply(
                Command::CreateTask {
                    title: "Design UI mockups".into(),
                    description: "Mockups for the new dashboard".into(),
                    priority: Priority::High,
                    due_date: NaiveDate::from_ymd_opt(2026, 9, 20).unwrap(),
                    assigned_to: staff().email,
                    project_id: None,
                },
                &admin(),
            )
            .unwrap();
        sf.flush(world, &event).unwrap();

        match event {
            Event::TaskCreated { task, .. } => task.id,
            _ => panic!("expected TaskCreated"),
        }
    }

    #[test]
    fn round_trip_empty_world() {
        let (sf, path) = temp_save("empty");

        let world = sf.load_world().unwrap();
        assert_eq!(world.tasks.len(), 0);
        assert_eq!(world.members.len(), 0);
        assert_eq!(world.projects.len(), 0);
        assert_eq!(world.revision, 0);
        assert!(sf.load_credentials().unwrap().credentials.is_empty());

        cleanup(&path);
    }

    #[test]
    fn seed_superadmin_and_reload() {
        let (sf, path) = temp_save("seed");

        let mut directory = sf.load_credentials().unwrap();
        let created = sf
            .ensure_default_superadmin(&mut directory, "admin@taskflow.local", "123456")
            .unwrap();
        assert!(created);
        assert!(directory.has_superadmin());

        // Reboot — credential should be there, OTP verifiable.
        let directory2 = sf.load_credentials().unwrap();
        let cred = directory2
            .find("admin@taskflow.local", Role::Superadmin)
            .unwrap();
        assert_eq!(cred.user_id, SEED_SUPERADMIN_USER_ID);
        assert!(verify_otp("123456", &cred.otp_hash));

        // Seed again — should be a no-op.
        let mut directory3 = sf.load_credentials().unwrap();
        assert!(!sf
            .ensure_default_superadmin(&mut directory3, "admin@taskflow.local", "123456")
            .unwrap());

        cleanup(&path);
    }

    #[test]
    fn flush_and_reload_workflow_state() {
        let (sf, path) = temp_save("workflow");

        let mut world = sf.load_world().unwrap();
        let task_id = create_task(&mut world, &sf);

        let event = world
            .apply(
                Command::SubmitCompletion {
                    task_id,
                    notes: "mockups attached".into(),
                },
                &staff(),
            )
            .unwrap();
        sf.flush(&world, &event).unwrap();

        let event = world
            .apply(
                Command::AdminReview {
                    task_id,
                    approved: true,
                    comments: "looks good".into(),
                },
                &admin(),
            )
            .unwrap();
        sf.flush(&world, &event).unwrap();

        // Reboot — world should have the task in the right state.
        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.revision, 3);
        assert_eq!(world2.tasks.len(), 1);

        let task = &world2.tasks[&task_id];
        assert_eq!(task.title, "Design UI mockups");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.approval, ApprovalStatus::AdminApproved);
        assert_eq!(task.completion_notes.as_deref(), Some("mockups attached"));
        assert_eq!(
            task.admin_review.as_ref().unwrap().reviewed_by,
            admin().name
        );

        cleanup(&path);
    }

    #[test]
    fn delete_task_removes_from_disk() {
        let (sf, path) = temp_save("delete");

        let mut world = sf.load_world().unwrap();
        let task_id = create_task(&mut world, &sf);

        let event = world
            .apply(Command::DeleteTask { task_id }, &admin())
            .unwrap();
        sf.flush(&world, &event).unwrap();

        // Reboot — task should be gone.
        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.tasks.len(), 0);
        assert_eq!(world2.revision, 2);

        cleanup(&path);
    }

    #[test]
    fn members_and_projects_round_trip() {
        let (sf, path) = temp_save("roster");

        let mut world = sf.load_world().unwrap();

        let event = world
            .apply(
                Command::AddMember {
                    name: "Vishal Chaudhary".into(),
                    email: "vishal@company.com".into(),
                    job_role: "Video Editor".into(),
                    is_doer: true,
                },
                &superadmin(),
            )
            .unwrap();
        sf.flush(&world, &event).unwrap();

        let event = world
            .apply(
                Command::AddProject {
                    name: "Zaiden".into(),
                    description: "Launch campaign".into(),
                    color: Some("#3B82F6".into()),
                },
                &admin(),
            )
            .unwrap();
        sf.flush(&world, &event).unwrap();

        let world2 = sf.load_world().unwrap();
        assert_eq!(world2.members.len(), 1);
        assert_eq!(world2.projects.len(), 1);
        let member = world2.member_by_email("vishal@company.com").unwrap();
        assert_eq!(member.job_role, "Video Editor");
        assert!(member.is_doer);

        // Removal reaches the disk too.
        let event = world
            .apply(
                Command::RemoveMember {
                    member_id: member.id,
                },
                &superadmin(),
            )
            .unwrap();
        sf.flush(&world, &event).unwrap();

        let world3 = sf.load_world().unwrap();
        assert_eq!(world3.members.len(), 0);
        assert_eq!(world3.projects.len(), 1);

        cleanup(&path);
    }

    #[test]
    fn credential_round_trip() {
        let (sf, path) = temp_save("credentials");

        let credential = Credential {
            user_id: "STF-SAMR-4F2A".into(),
            name: "Samruddhi Shivgan".into(),
            email: "samruddhi@company.com".into(),
            otp_hash: hash_otp("482916"),
            role: Role::Staff,
        };
        sf.save_credential(&credential).unwrap();

        let directory = sf.load_credentials().unwrap();
        assert_eq!(directory.credentials.len(), 1);
        assert!(directory
            .verify("samruddhi@company.com", "482916", Role::Staff)
            .is_some());

        cleanup(&path);
    }
}
