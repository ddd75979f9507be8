use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepoError, RepoResult, Repository, viewer_can_see};
use crate::models::{
    AccountStatus, ActivityFilter, ActivityLog, DashboardTotals, Department, DepartmentCounts,
    DepartmentFilter, DepartmentStats, DepartmentUserCount, Designation, DesignationCount,
    FacultyAssignment, FileFilter, FileRecord, FileStatus, FileViewer, Page, Role, RoleCount,
    RoleProfile, Section, SectionCount, StatusCount, Subject, SubjectFilter, SubjectStatus, User,
    UserFilter, UserStats, matches_search,
};

#[derive(Default)]
struct Store {
    users: HashMap<Uuid, User>,
    departments: HashMap<Uuid, Department>,
    subjects: HashMap<Uuid, Subject>,
    files: HashMap<Uuid, FileRecord>,
    activities: Vec<ActivityLog>,
}

/// InMemoryRepository
///
/// A complete `Repository` over plain collections behind one `RwLock`. Backs
/// the test suite and local runs without `DATABASE_URL`. Every mutation takes
/// the write lock for its whole read-check-write sequence, which is what makes
/// enrollment and uniqueness checks atomic here.
#[derive(Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn paginate<T: Clone>(items: Vec<T>, request: crate::models::PageRequest) -> Page<T> {
    Page {
        total: items.len() as u64,
        items: request.slice(&items),
    }
}

impl Store {
    /// Fills the read-only subject lists of a user from the subject side.
    fn hydrate(&self, mut user: User) -> User {
        let mut related: Vec<&Subject> = match &user.profile {
            RoleProfile::Student(_) => self
                .subjects
                .values()
                .filter(|s| s.has_student(user.id))
                .collect(),
            RoleProfile::Faculty(_) => self
                .subjects
                .values()
                .filter(|s| s.has_faculty(user.id))
                .collect(),
            _ => Vec::new(),
        };
        related.sort_by(|a, b| a.code.cmp(&b.code));
        let ids: Vec<Uuid> = related.iter().map(|s| s.id).collect();

        match &mut user.profile {
            RoleProfile::Student(student) => student.enrolled_subjects = ids,
            RoleProfile::Faculty(faculty) => faculty.assigned_subjects = ids,
            _ => {}
        }
        user
    }

    fn check_user_unique(&self, user: &User) -> RepoResult<()> {
        for other in self.users.values().filter(|u| u.id != user.id) {
            if other.email.eq_ignore_ascii_case(&user.email) {
                return Err(RepoError::Duplicate {
                    entity: "User",
                    field: "email",
                });
            }
            if let (Some(a), Some(b)) = (other.student_id(), user.student_id()) {
                if a == b {
                    return Err(RepoError::Duplicate {
                        entity: "User",
                        field: "studentId",
                    });
                }
            }
        }
        Ok(())
    }

    fn check_department_unique(&self, department: &Department) -> RepoResult<()> {
        for other in self.departments.values().filter(|d| d.id != department.id) {
            if other.name.eq_ignore_ascii_case(&department.name) {
                return Err(RepoError::Duplicate {
                    entity: "Department",
                    field: "name",
                });
            }
            if other.code == department.code {
                return Err(RepoError::Duplicate {
                    entity: "Department",
                    field: "code",
                });
            }
        }
        Ok(())
    }

    fn check_subject_unique(&self, subject: &Subject) -> RepoResult<()> {
        let clash = self.subjects.values().any(|other| {
            other.id != subject.id
                && other.code == subject.code
                && other.department == subject.department
                && other.section == subject.section
                && other.academic_year == subject.academic_year
        });
        if clash {
            return Err(RepoError::Duplicate {
                entity: "Subject",
                field: "code",
            });
        }
        Ok(())
    }

    fn counts(&self, department_id: Uuid) -> DepartmentCounts {
        let members = self
            .users
            .values()
            .filter(|u| u.department == Some(department_id));
        let mut counts = DepartmentCounts::default();
        for user in members {
            match user.role() {
                Role::Student => counts.students += 1,
                Role::Faculty => counts.faculty += 1,
                Role::Staff => counts.staff += 1,
                Role::Admin => {}
            }
        }
        counts.subjects = count(
            self.subjects
                .values()
                .filter(|s| s.department == department_id)
                .count(),
        );
        counts
    }

    fn subject_mut(&mut self, id: Uuid) -> RepoResult<&mut Subject> {
        self.subjects
            .get_mut(&id)
            .ok_or(RepoError::NotFound("Subject"))
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    // --- Users ---

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store.users.get(&id).cloned().map(|u| store.hydrate(u)))
    }

    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned()
            .map(|u| store.hydrate(u)))
    }

    async fn list_users(&self, filter: &UserFilter) -> RepoResult<Page<User>> {
        let store = self.store.read().await;
        let mut users: Vec<User> = store
            .users
            .values()
            .filter(|u| filter.role.is_none_or(|r| u.role() == r))
            .filter(|u| filter.department.is_none_or(|d| u.department == Some(d)))
            .filter(|u| filter.status.is_none_or(|s| u.status == s))
            .filter(|u| filter.section.is_none_or(|s| u.section() == Some(s)))
            .filter(|u| {
                filter.search.as_deref().is_none_or(|q| {
                    matches_search(q, &[u.name.as_str(), u.email.as_str(), u.student_id().unwrap_or("")])
                })
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let page = paginate(users, filter.page_request());
        Ok(Page {
            items: page.items.into_iter().map(|u| store.hydrate(u)).collect(),
            total: page.total,
        })
    }

    async fn create_user(&self, user: User) -> RepoResult<User> {
        let mut store = self.store.write().await;
        store.check_user_unique(&user)?;
        store.users.insert(user.id, user.clone());
        Ok(store.hydrate(user))
    }

    async fn update_user(&self, user: User) -> RepoResult<User> {
        let mut store = self.store.write().await;
        if !store.users.contains_key(&user.id) {
            return Err(RepoError::NotFound("User"));
        }
        store.check_user_unique(&user)?;
        let id = user.id;
        let role = user.role();
        store.users.insert(id, user.clone());
        if role != Role::Student {
            for subject in store.subjects.values_mut() {
                subject.enrolled_students.retain(|s| *s != id);
            }
        }
        if role != Role::Faculty {
            for subject in store.subjects.values_mut() {
                subject.faculty.retain(|f| f.faculty != id);
            }
            for department in store.departments.values_mut() {
                if department.hod == Some(id) {
                    department.hod = None;
                }
            }
        }
        Ok(store.hydrate(user))
    }

    async fn delete_user(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        if store.users.remove(&id).is_none() {
            return Ok(false);
        }
        for subject in store.subjects.values_mut() {
            subject.enrolled_students.retain(|s| *s != id);
            subject.faculty.retain(|f| f.faculty != id);
        }
        for department in store.departments.values_mut() {
            if department.hod == Some(id) {
                department.hod = None;
            }
        }
        Ok(true)
    }

    async fn student_id_exists(&self, student_id: &str) -> RepoResult<bool> {
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .any(|u| u.student_id() == Some(student_id)))
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> RepoResult<()> {
        let mut store = self.store.write().await;
        let user = store.users.get_mut(&id).ok_or(RepoError::NotFound("User"))?;
        user.last_login = Some(at);
        Ok(())
    }

    // --- Departments ---

    async fn get_department(&self, id: Uuid) -> RepoResult<Option<Department>> {
        Ok(self.store.read().await.departments.get(&id).cloned())
    }

    async fn find_department_by_code(&self, code: &str) -> RepoResult<Option<Department>> {
        let store = self.store.read().await;
        Ok(store
            .departments
            .values()
            .find(|d| d.code.eq_ignore_ascii_case(code.trim()))
            .cloned())
    }

    async fn list_departments(&self, filter: &DepartmentFilter) -> RepoResult<Page<Department>> {
        let store = self.store.read().await;
        let mut departments: Vec<Department> = store
            .departments
            .values()
            .filter(|d| {
                filter
                    .search
                    .as_deref()
                    .is_none_or(|q| matches_search(q, &[d.name.as_str(), d.code.as_str()]))
            })
            .cloned()
            .collect();
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(departments, filter.page_request()))
    }

    async fn create_department(&self, department: Department) -> RepoResult<Department> {
        let mut store = self.store.write().await;
        store.check_department_unique(&department)?;
        store.departments.insert(department.id, department.clone());
        Ok(department)
    }

    async fn update_department(&self, department: Department) -> RepoResult<Department> {
        let mut store = self.store.write().await;
        if !store.departments.contains_key(&department.id) {
            return Err(RepoError::NotFound("Department"));
        }
        store.check_department_unique(&department)?;
        store.departments.insert(department.id, department.clone());
        Ok(department)
    }

    async fn delete_department(&self, id: Uuid) -> RepoResult<bool> {
        let mut store = self.store.write().await;
        if !store.departments.contains_key(&id) {
            return Ok(false);
        }
        let has_members = store.users.values().any(|u| u.department == Some(id));
        let has_subjects = store.subjects.values().any(|s| s.department == id);
        if has_members || has_subjects {
            return Err(RepoError::InUse("Department"));
        }
        store.departments.remove(&id);
        Ok(true)
    }

    async fn department_counts(&self, id: Uuid) -> RepoResult<DepartmentCounts> {
        Ok(self.store.read().await.counts(id))
    }

    async fn department_stats(&self, id: Uuid) -> RepoResult<DepartmentStats> {
        let store = self.store.read().await;
        if !store.departments.contains_key(&id) {
            return Err(RepoError::NotFound("Department"));
        }

        let members: Vec<&User> = store
            .users
            .values()
            .filter(|u| u.department == Some(id))
            .collect();

        let students_by_section = Section::ALL
            .iter()
            .map(|section| SectionCount {
                section: *section,
                students: count(
                    members
                        .iter()
                        .filter(|u| u.section() == Some(*section))
                        .count(),
                ),
            })
            .collect();

        let faculty_by_designation = Designation::ALL
            .iter()
            .map(|designation| DesignationCount {
                designation: *designation,
                faculty: count(
                    members
                        .iter()
                        .filter(|u| {
                            matches!(&u.profile, RoleProfile::Faculty(f) if f.designation == *designation)
                        })
                        .count(),
                ),
            })
            .collect();

        let gpas: Vec<f64> = members
            .iter()
            .filter_map(|u| match &u.profile {
                RoleProfile::Student(s) => s.gpa.map(f64::from),
                _ => None,
            })
            .collect();
        let average_gpa = if gpas.is_empty() {
            None
        } else {
            Some(gpas.iter().sum::<f64>() / gpas.len() as f64)
        };

        let subjects: Vec<&Subject> = store
            .subjects
            .values()
            .filter(|s| s.department == id)
            .collect();

        Ok(DepartmentStats {
            department_id: id,
            counts: store.counts(id),
            students_by_section,
            faculty_by_designation,
            average_gpa,
            active_subjects: count(
                subjects
                    .iter()
                    .filter(|s| s.status == SubjectStatus::Active)
                    .count(),
            ),
            total_enrollments: count(subjects.iter().map(|s| s.enrolled_students.len()).sum()),
        })
    }

    // --- Subjects ---

    async fn get_subject(&self, id: Uuid) -> RepoResult<Option<Subject>> {
        Ok(self.store.read().await.subjects.get(&id).cloned())
    }

    async fn list_subjects(&self, filter: &SubjectFilter) -> RepoResult<Page<Subject>> {
        let store = self.store.read().await;
        let mut subjects: Vec<Subject> = store
            .subjects
            .values()
            .filter(|s| filter.department.is_none_or(|d| s.department == d))
            .filter(|s| filter.section.is_none_or(|sec| s.section == sec))
            .filter(|s| filter.semester.is_none_or(|sem| s.semester == sem))
            .filter(|s| {
                filter
                    .academic_year
                    .as_deref()
                    .is_none_or(|y| s.academic_year == y.trim())
            })
            .filter(|s| filter.faculty.is_none_or(|f| s.has_faculty(f)))
            .filter(|s| filter.student.is_none_or(|st| s.has_student(st)))
            .filter(|s| filter.status.is_none_or(|st| s.status == st))
            .filter(|s| {
                filter
                    .search
                    .as_deref()
                    .is_none_or(|q| matches_search(q, &[s.name.as_str(), s.code.as_str()]))
            })
            .cloned()
            .collect();
        subjects.sort_by(|a, b| a.code.cmp(&b.code).then(a.section.cmp(&b.section)));
        Ok(paginate(subjects, filter.page_request()))
    }

    async fn create_subject(&self, subject: Subject) -> RepoResult<Subject> {
        let mut store = self.store.write().await;
        store.check_subject_unique(&subject)?;
        store.subjects.insert(subject.id, subject.clone());
        Ok(subject)
    }

    async fn update_subject(&self, mut subject: Subject) -> RepoResult<Subject> {
        let mut store = self.store.write().await;
        let enrolled = store
            .subjects
            .get(&subject.id)
            .map(|s| s.enrolled_students.clone())
            .ok_or(RepoError::NotFound("Subject"))?;
        if enrolled.len() > subject.max_students as usize {
            return Err(RepoError::CapacityReached);
        }
        store.check_subject_unique(&subject)?;
        subject.enrolled_students = enrolled;
        store.subjects.insert(subject.id, subject.clone());
        Ok(subject)
    }

    async fn delete_subject(&self, id: Uuid) -> RepoResult<bool> {
        Ok(self.store.write().await.subjects.remove(&id).is_some())
    }

    async fn enroll_student(&self, subject_id: Uuid, student_id: Uuid) -> RepoResult<Subject> {
        let mut store = self.store.write().await;
        let subject = store.subject_mut(subject_id)?;
        if subject.has_student(student_id) {
            return Err(RepoError::AlreadyEnrolled);
        }
        if subject.is_full() {
            return Err(RepoError::CapacityReached);
        }
        subject.enrolled_students.push(student_id);
        subject.updated_at = Utc::now();
        Ok(subject.clone())
    }

    async fn unenroll_student(&self, subject_id: Uuid, student_id: Uuid) -> RepoResult<Subject> {
        let mut store = self.store.write().await;
        let subject = store.subject_mut(subject_id)?;
        if !subject.has_student(student_id) {
            return Err(RepoError::NotFound("Enrollment"));
        }
        subject.enrolled_students.retain(|s| *s != student_id);
        subject.updated_at = Utc::now();
        Ok(subject.clone())
    }

    async fn assign_faculty(
        &self,
        subject_id: Uuid,
        assignment: FacultyAssignment,
    ) -> RepoResult<Subject> {
        let mut store = self.store.write().await;
        let subject = store.subject_mut(subject_id)?;
        if subject.has_faculty(assignment.faculty) {
            return Err(RepoError::AlreadyAssigned);
        }
        if assignment.is_primary {
            for existing in subject.faculty.iter_mut() {
                existing.is_primary = false;
            }
        }
        subject.faculty.push(assignment);
        subject.updated_at = Utc::now();
        Ok(subject.clone())
    }

    async fn remove_faculty(&self, subject_id: Uuid, faculty_id: Uuid) -> RepoResult<Subject> {
        let mut store = self.store.write().await;
        let subject = store.subject_mut(subject_id)?;
        if !subject.has_faculty(faculty_id) {
            return Err(RepoError::NotFound("Faculty assignment"));
        }
        subject.faculty.retain(|f| f.faculty != faculty_id);
        subject.updated_at = Utc::now();
        Ok(subject.clone())
    }

    // --- Files ---

    async fn create_file(&self, file: FileRecord) -> RepoResult<FileRecord> {
        self.store.write().await.files.insert(file.id, file.clone());
        Ok(file)
    }

    async fn get_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>> {
        Ok(self.store.read().await.files.get(&id).cloned())
    }

    async fn list_files(
        &self,
        filter: &FileFilter,
        viewer: Option<FileViewer>,
        now: DateTime<Utc>,
    ) -> RepoResult<Page<FileRecord>> {
        let store = self.store.read().await;
        let mut files: Vec<FileRecord> = store
            .files
            .values()
            .filter(|f| match viewer {
                None => true,
                Some(v) => f.is_available(now) && viewer_can_see(f, v),
            })
            .filter(|f| filter.category.is_none_or(|c| f.category == c))
            .filter(|f| {
                filter
                    .related_type
                    .is_none_or(|t| f.related_to.is_some_and(|r| r.kind == t))
            })
            .filter(|f| {
                filter
                    .related_id
                    .is_none_or(|id| f.related_to.is_some_and(|r| r.id == id))
            })
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(files, filter.page_request()))
    }

    async fn archive_file(&self, id: Uuid) -> RepoResult<Option<FileRecord>> {
        let mut store = self.store.write().await;
        Ok(store.files.get_mut(&id).map(|file| {
            file.status = FileStatus::Archived;
            file.updated_at = Utc::now();
            file.clone()
        }))
    }

    async fn increment_download_count(&self, id: Uuid) -> RepoResult<()> {
        let mut store = self.store.write().await;
        let file = store.files.get_mut(&id).ok_or(RepoError::NotFound("File"))?;
        file.download_count += 1;
        Ok(())
    }

    async fn archive_expired_files(&self, now: DateTime<Utc>) -> RepoResult<Vec<FileRecord>> {
        let mut store = self.store.write().await;
        let mut archived = Vec::new();
        for file in store.files.values_mut() {
            if file.status == FileStatus::Active && file.is_expired(now) {
                file.status = FileStatus::Archived;
                file.updated_at = now;
                archived.push(file.clone());
            }
        }
        Ok(archived)
    }

    // --- Activity Log ---

    async fn log_activity(&self, entry: ActivityLog) -> RepoResult<()> {
        self.store.write().await.activities.push(entry);
        Ok(())
    }

    async fn list_activities(&self, filter: &ActivityFilter) -> RepoResult<Page<ActivityLog>> {
        let store = self.store.read().await;
        // Appended in time order, so newest first is a reversed scan.
        let entries: Vec<ActivityLog> = store
            .activities
            .iter()
            .rev()
            .filter(|a| filter.actor.is_none_or(|id| a.actor == Some(id)))
            .filter(|a| filter.action.is_none_or(|act| a.action == act))
            .filter(|a| filter.resource_type.is_none_or(|t| a.resource_type == t))
            .filter(|a| filter.resource_id.is_none_or(|id| a.resource_id == Some(id)))
            .cloned()
            .collect();
        Ok(paginate(entries, filter.page_request()))
    }

    // --- Analytics ---

    async fn dashboard_totals(&self) -> RepoResult<DashboardTotals> {
        let store = self.store.read().await;
        let by_role = |role: Role| count(store.users.values().filter(|u| u.role() == role).count());
        Ok(DashboardTotals {
            total_users: count(store.users.len()),
            active_users: count(store.users.values().filter(|u| u.is_active()).count()),
            students: by_role(Role::Student),
            faculty: by_role(Role::Faculty),
            staff: by_role(Role::Staff),
            admins: by_role(Role::Admin),
            departments: count(store.departments.len()),
            subjects: count(store.subjects.len()),
            active_subjects: count(
                store
                    .subjects
                    .values()
                    .filter(|s| s.status == SubjectStatus::Active)
                    .count(),
            ),
            files: count(
                store
                    .files
                    .values()
                    .filter(|f| f.status == FileStatus::Active)
                    .count(),
            ),
        })
    }

    async fn user_stats(&self, since: DateTime<Utc>) -> RepoResult<UserStats> {
        let store = self.store.read().await;

        let by_role = Role::ALL
            .iter()
            .map(|role| RoleCount {
                role: *role,
                count: count(store.users.values().filter(|u| u.role() == *role).count()),
            })
            .collect();

        let by_status = AccountStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: count(store.users.values().filter(|u| u.status == *status).count()),
            })
            .collect();

        let mut departments: Vec<&Department> = store.departments.values().collect();
        departments.sort_by(|a, b| a.name.cmp(&b.name));
        let by_department = departments
            .into_iter()
            .map(|d| DepartmentUserCount {
                department_id: d.id,
                department_name: d.name.clone(),
                count: count(
                    store
                        .users
                        .values()
                        .filter(|u| u.department == Some(d.id))
                        .count(),
                ),
            })
            .collect();

        Ok(UserStats {
            total: count(store.users.len()),
            by_role,
            by_status,
            by_department,
            new_last_30_days: count(
                store
                    .users
                    .values()
                    .filter(|u| u.created_at >= since)
                    .count(),
            ),
        })
    }
}
