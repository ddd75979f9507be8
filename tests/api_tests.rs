mod common;

use campus_admin::models::{
    CreateSubjectRequest, FacultyAssignment, Role, Section, Subject, User,
};
use chrono::Utc;
use common::{TEST_PASSWORD, TestApp, spawn_app, subject_request};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

async fn status_of(app: &TestApp, path: &str, as_user: &User) -> StatusCode {
    app.client
        .get(app.url(path))
        .bearer_auth(app.token_for(as_user))
        .send()
        .await
        .expect("Failed to execute request.")
        .status()
}

// --- Public surface ---

#[tokio::test]
async fn health_check_works() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["environment"], "local");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = spawn_app().await;

    let response = app.client.get(app.url("/health")).send().await.unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/api-docs/openapi.json", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = response.json().await.unwrap();
    assert!(doc["paths"]["/api/auth/login"].is_object());
    assert!(doc["components"]["securitySchemes"]["bearer"].is_object());
}

#[tokio::test]
async fn unknown_route_returns_404_with_available_routes() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/api/does-not-exist", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 404);
    let routes = body["availableRoutes"].as_array().expect("routes listed");
    assert!(routes.iter().any(|r| r == "/api/users"));
}

// --- Login ---

#[tokio::test]
async fn login_returns_token_and_user_without_password() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app.login(&admin.email, TEST_PASSWORD).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Login successful");
    assert!(!body["data"]["token"].as_str().unwrap().is_empty());
    assert_eq!(body["data"]["user"]["email"], admin.email.as_str());
    assert_eq!(body["data"]["user"]["role"], "Admin");
    assert!(body["data"]["user"].get("passwordHash").is_none());
    assert!(body["data"]["user"]["lastLogin"].is_string());
}

#[tokio::test]
async fn login_email_is_case_insensitive() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app.login(&admin.email.to_uppercase(), TEST_PASSWORD).await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_with_wrong_password_or_unknown_email_is_401() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let wrong_password = app.login(&admin.email, "not-the-password").await;
    let unknown_email = app.login("nobody@campus.test", TEST_PASSWORD).await;

    for response in [wrong_password, unknown_email] {
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Invalid credentials");
    }
}

#[tokio::test]
async fn login_without_credentials_is_400() {
    let app = spawn_app().await;

    let response = app.login("", "").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Please provide an email and password");
}

#[tokio::test]
async fn malformed_json_body_is_400() {
    let app = spawn_app().await;

    let response = app
        .client
        .post(app.url("/auth/login"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

// --- Authentication gate ---

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = spawn_app().await;

    for path in ["/users", "/departments", "/subjects", "/files", "/auth/me"] {
        let response = app.client.get(app.url(path)).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["message"], "Not authorized to access this route");
    }
}

#[tokio::test]
async fn garbage_token_is_401() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(app.url("/auth/me"))
        .bearer_auth("not.a.jwt")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid token");
}

// --- Users ---

#[tokio::test]
async fn list_users_is_paginated() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let admin = app.seed_user(Role::Admin, None).await;
    for _ in 0..4 {
        app.seed_user(Role::Student, Some(&department)).await;
    }

    let response = app
        .client
        .get(app.url("/users?limit=2&page=1"))
        .bearer_auth(app.token_for(&admin))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 5);
    assert_eq!(body["pagination"]["pages"], 3);
    assert_eq!(body["pagination"]["limit"], 2);
}

#[tokio::test]
async fn list_users_filters_by_role() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let admin = app.seed_user(Role::Admin, None).await;
    app.seed_user(Role::Student, Some(&department)).await;
    app.seed_user(Role::Faculty, Some(&department)).await;

    let response = app
        .client
        .get(app.url("/users?role=Faculty"))
        .bearer_auth(app.token_for(&admin))
        .send()
        .await
        .unwrap();

    let body: Value = response.json().await.unwrap();
    let users = body["data"].as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["role"], "Faculty");
}

#[tokio::test]
async fn faculty_only_sees_own_department_users() {
    let app = spawn_app().await;
    let cse = app.seed_department("Computer Science", "CSE").await;
    let mech = app.seed_department("Mechanical", "MECH").await;
    let faculty = app.seed_user(Role::Faculty, Some(&cse)).await;
    app.seed_user(Role::Student, Some(&cse)).await;
    app.seed_user(Role::Student, Some(&mech)).await;

    let response = app
        .client
        .get(app.url(&format!("/users?department={}", mech.id)))
        .bearer_auth(app.token_for(&faculty))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let users = body["data"].as_array().unwrap();
    assert_eq!(users.len(), 2);
    assert!(users.iter().all(|u| u["department"] == cse.id.to_string()));
}

#[tokio::test]
async fn students_cannot_list_users() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let student = app.seed_user(Role::Student, Some(&department)).await;

    let response = app
        .client
        .get(app.url("/users"))
        .bearer_auth(app.token_for(&student))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "User role Student is not authorized to access this route");
}

#[tokio::test]
async fn create_user_over_http_returns_201() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app
        .client
        .post(app.url("/users"))
        .bearer_auth(app.token_for(&admin))
        .json(&json!({
            "name": "Asha Rao",
            "email": "Asha.Rao@Campus.Test",
            "password": "secret123",
            "role": "Student",
            "department": department.id,
            "section": "B",
            "batch": "2023-2027"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "User created successfully");
    assert_eq!(body["data"]["email"], "asha.rao@campus.test");
    assert!(body["data"]["studentId"].as_str().unwrap().starts_with("CSE23B"));
}

#[tokio::test]
async fn create_user_with_taken_email_is_409() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app
        .client
        .post(app.url("/users"))
        .bearer_auth(app.token_for(&admin))
        .json(&json!({
            "name": "Second Admin",
            "email": admin.email,
            "password": "secret123",
            "role": "Admin"
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "User with this email already exists");
}

#[tokio::test]
async fn delete_nonexistent_user_returns_404() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app
        .client
        .delete(app.url(&format!("/users/{}", Uuid::new_v4())))
        .bearer_auth(app.token_for(&admin))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "User not found");
}

#[tokio::test]
async fn admin_cannot_delete_own_account() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app
        .client
        .delete(app.url(&format!("/users/{}", admin.id)))
        .bearer_auth(app.token_for(&admin))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_id_in_path_is_404() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app
        .client
        .get(app.url("/users/not-a-uuid"))
        .bearer_auth(app.token_for(&admin))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn students_may_only_view_their_own_record() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let student = app.seed_user(Role::Student, Some(&department)).await;
    let classmate = app.seed_user(Role::Student, Some(&department)).await;

    let own = status_of(&app, &format!("/users/{}", student.id), &student).await;
    let other = status_of(&app, &format!("/users/{}", classmate.id), &student).await;

    assert_eq!(own, StatusCode::OK);
    assert_eq!(other, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn faculty_view_users_of_their_own_department_only() {
    let app = spawn_app().await;
    let cse = app.seed_department("Computer Science", "CSE").await;
    let mech = app.seed_department("Mechanical", "MECH").await;
    let faculty = app.seed_user(Role::Faculty, Some(&cse)).await;
    let own_student = app.seed_user(Role::Student, Some(&cse)).await;
    let other_student = app.seed_user(Role::Student, Some(&mech)).await;

    let own = status_of(&app, &format!("/users/{}", own_student.id), &faculty).await;
    let other = status_of(&app, &format!("/users/{}", other_student.id), &faculty).await;

    assert_eq!(own, StatusCode::OK);
    assert_eq!(other, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn role_change_releases_the_enrollment_seat() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let admin = app.seed_user(Role::Admin, None).await;
    let student = app.seed_user(Role::Student, Some(&department)).await;
    let newcomer = app.seed_user(Role::Student, Some(&department)).await;
    let subject = app.seed_subject("CS201", &department, 1).await;
    let enroll = |user: &User| {
        app.client
            .post(app.url(&format!("/subjects/{}/enroll", subject.id)))
            .bearer_auth(app.token_for(user))
            .send()
    };
    assert_eq!(enroll(&student).await.unwrap().status(), StatusCode::OK);

    let response = app
        .client
        .put(app.url(&format!("/users/{}", student.id)))
        .bearer_auth(app.token_for(&admin))
        .json(&json!({
            "role": "Faculty",
            "designation": "Lecturer",
            "qualification": "PhD"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["role"], "Faculty");

    let stored = app.state.repo.get_subject(subject.id).await.unwrap().unwrap();
    assert!(stored.enrolled_students.is_empty());
    assert_eq!(enroll(&newcomer).await.unwrap().status(), StatusCode::OK);
}

// --- Departments and subjects ---

#[tokio::test]
async fn duplicate_department_code_is_409() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;
    app.seed_department("Computer Science", "CSE").await;

    let response = app
        .client
        .post(app.url("/departments"))
        .bearer_auth(app.token_for(&admin))
        .json(&json!({ "name": "Computing Systems", "code": "cse" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Department with this code already exists");
}

#[tokio::test]
async fn department_code_is_derived_from_name() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app
        .client
        .post(app.url("/departments"))
        .bearer_auth(app.token_for(&admin))
        .json(&json!({ "name": "Electronics and Communication" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["code"], "EAC");
    assert_eq!(body["data"]["counts"]["students"], 0);
}

#[tokio::test]
async fn students_cannot_view_other_departments() {
    let app = spawn_app().await;
    let cse = app.seed_department("Computer Science", "CSE").await;
    let mech = app.seed_department("Mechanical", "MECH").await;
    let student = app.seed_user(Role::Student, Some(&cse)).await;
    let token = app.token_for(&student);

    let own = app
        .client
        .get(app.url(&format!("/departments/{}", cse.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let other = app
        .client
        .get(app.url(&format!("/departments/{}", mech.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(own.status(), StatusCode::OK);
    assert_eq!(other.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn subject_with_bad_assessment_split_is_400() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app
        .client
        .post(app.url("/subjects"))
        .bearer_auth(app.token_for(&admin))
        .json(&json!({
            "name": "Data Structures",
            "code": "CS201",
            "department": department.id,
            "section": "A",
            "semester": 3,
            "academicYear": "2024-2025",
            "credits": 4,
            "assessment": { "internals": 40, "externals": 40, "practicals": 10 }
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("Assessment percentages must total 100")
    );
}

#[tokio::test]
async fn student_enrolls_and_sees_subject_in_profile() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let student = app.seed_user(Role::Student, Some(&department)).await;
    let subject = app.seed_subject("CS201", &department, 30).await;
    let token = app.token_for(&student);

    let response = app
        .client
        .post(app.url(&format!("/subjects/{}/enroll", subject.id)))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let me: Value = app
        .client
        .get(app.url("/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let enrolled = me["data"]["enrolledSubjects"].as_array().unwrap();
    assert_eq!(enrolled.len(), 1);
    assert_eq!(enrolled[0], subject.id.to_string());
}

#[tokio::test]
async fn faculty_subject_access_follows_assignment_or_department() {
    let app = spawn_app().await;
    let cse = app.seed_department("Computer Science", "CSE").await;
    let mech = app.seed_department("Mechanical", "MECH").await;
    let subject = app.seed_subject("CS201", &cse, 30).await;
    let colleague = app.seed_user(Role::Faculty, Some(&cse)).await;
    let outsider = app.seed_user(Role::Faculty, Some(&mech)).await;
    let visiting = app.seed_user(Role::Faculty, Some(&mech)).await;
    app.state
        .repo
        .assign_faculty(
            subject.id,
            FacultyAssignment {
                faculty: visiting.id,
                is_external: true,
                is_primary: false,
            },
        )
        .await
        .unwrap();
    let path = format!("/subjects/{}", subject.id);

    assert_eq!(status_of(&app, &path, &colleague).await, StatusCode::OK);
    assert_eq!(status_of(&app, &path, &visiting).await, StatusCode::OK);
    assert_eq!(status_of(&app, &path, &outsider).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn student_subject_access_follows_enrollment_or_section() {
    let app = spawn_app().await;
    let cse = app.seed_department("Computer Science", "CSE").await;
    let mech = app.seed_department("Mechanical", "MECH").await;
    let section_a = app.seed_subject("CS201", &cse, 30).await;
    let section_b = app
        .state
        .repo
        .create_subject(Subject::from_request(
            CreateSubjectRequest {
                section: Section::B,
                ..subject_request("CS202", &cse, 30)
            },
            Utc::now(),
        ))
        .await
        .unwrap();
    let classmate = app.seed_user(Role::Student, Some(&cse)).await;
    let enrolled = app.seed_user(Role::Student, Some(&mech)).await;
    let outsider = app.seed_user(Role::Student, Some(&mech)).await;
    app.state
        .repo
        .enroll_student(section_b.id, enrolled.id)
        .await
        .unwrap();
    let path_a = format!("/subjects/{}", section_a.id);
    let path_b = format!("/subjects/{}", section_b.id);

    // same department and section
    assert_eq!(status_of(&app, &path_a, &classmate).await, StatusCode::OK);
    // same department, other section, not enrolled
    assert_eq!(status_of(&app, &path_b, &classmate).await, StatusCode::FORBIDDEN);
    // enrolled from another department
    assert_eq!(status_of(&app, &path_b, &enrolled).await, StatusCode::OK);
    assert_eq!(status_of(&app, &path_a, &outsider).await, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_subject_is_404_before_access_checks() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let student = app.seed_user(Role::Student, Some(&department)).await;

    let status = status_of(&app, &format!("/subjects/{}", Uuid::new_v4()), &student).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboard_is_limited_to_admin_and_staff() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let staff = app.seed_user(Role::Staff, Some(&department)).await;
    let faculty = app.seed_user(Role::Faculty, Some(&department)).await;

    let allowed = app
        .client
        .get(app.url("/analytics/dashboard"))
        .bearer_auth(app.token_for(&staff))
        .send()
        .await
        .unwrap();
    let denied = app
        .client
        .get(app.url("/analytics/dashboard"))
        .bearer_auth(app.token_for(&faculty))
        .send()
        .await
        .unwrap();

    assert_eq!(allowed.status(), StatusCode::OK);
    let body: Value = allowed.json().await.unwrap();
    assert_eq!(body["data"]["totals"]["departments"], 1);
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
}
