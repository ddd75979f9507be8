#![allow(dead_code)]

use campus_admin::{
    AppState, InMemoryRepository, MockStorageService, RepositoryState, create_router,
    auth::{hash_password, issue_token},
    config::AppConfig,
    error::{ApiError, ApiResult},
    models::{
        AccountStatus, AdminProfile, AssessmentStructure, CreateDepartmentRequest,
        CreateSubjectRequest, Department, Designation, FacultyProfile, Role, RoleProfile, Section,
        StaffProfile, StudentProfile, Subject, User,
    },
};
use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use tokio::net::TcpListener;
use uuid::Uuid;

pub const TEST_PASSWORD: &str = "password123";

/// TestApp
///
/// A running server on an ephemeral port plus direct handles on the state it
/// serves, so tests can seed data without going through the API.
pub struct TestApp {
    pub address: String,
    pub client: Client,
    pub state: AppState,
    pub storage: MockStorageService,
}

/// Lowest bcrypt cost keeps seeding and login fast.
pub fn test_config() -> AppConfig {
    AppConfig {
        bcrypt_cost: 4,
        ..AppConfig::default()
    }
}

pub fn test_state(config: AppConfig) -> (AppState, MockStorageService) {
    let repo: RepositoryState = Arc::new(InMemoryRepository::new());
    let storage = MockStorageService::new();
    let state = AppState {
        repo,
        storage: Arc::new(storage.clone()),
        config,
    };
    (state, storage)
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: AppConfig) -> TestApp {
    let (state, storage) = test_state(config);
    serve(state, storage).await
}

/// Serves an already assembled state. `storage` must be the backend inside
/// `state` for the handle to observe anything.
pub async fn serve(state: AppState, storage: MockStorageService) -> TestApp {
    let app = create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: Client::new(),
        state,
        storage,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.address, path)
    }

    pub fn token_for(&self, user: &User) -> String {
        issue_token(&self.state.config, user).expect("Failed to sign test token")
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn seed_department(&self, name: &str, code: &str) -> Department {
        seed_department(&self.state, name, code).await
    }

    pub async fn seed_user(&self, role: Role, department: Option<&Department>) -> User {
        seed_user(&self.state, role, department).await
    }

    pub async fn seed_subject(&self, code: &str, department: &Department, max_students: u32) -> Subject {
        seed_subject(&self.state, code, department, max_students).await
    }
}

pub async fn seed_department(state: &AppState, name: &str, code: &str) -> Department {
    let request = CreateDepartmentRequest {
        name: name.to_string(),
        code: Some(code.to_string()),
        ..CreateDepartmentRequest::default()
    };
    state
        .repo
        .create_department(Department::from_request(request, Utc::now()))
        .await
        .expect("Failed to seed department")
}

/// Creates an active account of `role` whose password is `TEST_PASSWORD`.
/// Students land in section A of batch 2022-2026.
pub async fn seed_user(state: &AppState, role: Role, department: Option<&Department>) -> User {
    let tag = Uuid::new_v4().simple().to_string();
    let profile = match role {
        Role::Student => RoleProfile::Student(StudentProfile {
            section: Section::A,
            batch: "2022-2026".to_string(),
            student_id: format!("STU{}", tag[..8].to_uppercase()),
            enrolled_subjects: Vec::new(),
            gpa: None,
        }),
        Role::Faculty => RoleProfile::Faculty(FacultyProfile {
            designation: Designation::Lecturer,
            qualification: "PhD".to_string(),
            specialization: None,
            assigned_subjects: Vec::new(),
        }),
        Role::Staff => RoleProfile::Staff(StaffProfile::default()),
        Role::Admin => RoleProfile::Admin(AdminProfile {}),
    };

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name: format!("{} {}", role, &tag[..6]),
        email: format!("{}-{}@campus.test", role.as_str().to_lowercase(), &tag[..12]),
        password_hash: hash_password(TEST_PASSWORD, 4)
            .await
            .expect("Failed to hash password"),
        department: department.map(|d| d.id),
        status: AccountStatus::Active,
        phone: None,
        profile,
        last_login: None,
        created_at: now,
        updated_at: now,
    };
    state.repo.create_user(user).await.expect("Failed to seed user")
}

pub fn subject_request(code: &str, department: &Department, max_students: u32) -> CreateSubjectRequest {
    CreateSubjectRequest {
        name: format!("Subject {code}"),
        code: code.to_string(),
        department: department.id,
        section: Section::A,
        semester: 3,
        academic_year: "2024-2025".to_string(),
        credits: 4,
        subject_type: None,
        description: None,
        faculty: None,
        max_students: Some(max_students),
        schedule: None,
        assessment: Some(AssessmentStructure::default()),
        status: None,
    }
}

pub async fn seed_subject(
    state: &AppState,
    code: &str,
    department: &Department,
    max_students: u32,
) -> Subject {
    state
        .repo
        .create_subject(Subject::from_request(
            subject_request(code, department, max_students),
            Utc::now(),
        ))
        .await
        .expect("Failed to seed subject")
}

/// Unwraps the error side of a handler result.
pub fn expect_err<T>(result: ApiResult<T>) -> ApiError {
    match result {
        Ok(_) => panic!("expected the handler to fail"),
        Err(err) => err,
    }
}
