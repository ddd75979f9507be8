//! CSV imports and file endpoints over real multipart requests.

mod common;

use axum::{
    body::Body,
    http::{Request, header},
};
use campus_admin::{
    AppConfig, AppState, InMemoryRepository, MockStorageService,
    auth::issue_token,
    create_router,
    models::{FileAccess, FileCategory, FileFilter, FileRecord, FileStatus, Role, User},
    storage::StorageService,
};
use chrono::{Duration, Utc};
use common::{TestApp, seed_user, serve, spawn_app, spawn_app_with, test_config, test_state};
use reqwest::{
    StatusCode,
    multipart::{Form, Part},
};
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;
use uuid::Uuid;

fn file_part(name: &str, mime: &str, bytes: Vec<u8>) -> Part {
    Part::bytes(bytes)
        .file_name(name.to_string())
        .mime_str(mime)
        .unwrap()
}

fn csv_form(name: &str, body: &str) -> Form {
    Form::new().part("file", file_part(name, "text/csv", body.as_bytes().to_vec()))
}

async fn post_form(app: &TestApp, path: &str, token: &str, form: Form) -> reqwest::Response {
    app.client
        .post(app.url(path))
        .bearer_auth(token)
        .multipart(form)
        .send()
        .await
        .expect("Failed to execute request.")
}

fn stored_file(uploaded_by: &User, expires_at: Option<chrono::DateTime<Utc>>) -> FileRecord {
    let now = Utc::now();
    let id = Uuid::new_v4();
    FileRecord {
        id,
        original_name: "old.txt".to_string(),
        stored_name: format!("{id}.txt"),
        path: format!("files/{id}.txt"),
        mimetype: "text/plain".to_string(),
        size: 3,
        category: FileCategory::Other,
        description: None,
        uploaded_by: uploaded_by.id,
        access: FileAccess::default(),
        related_to: None,
        status: FileStatus::Active,
        download_count: 0,
        expires_at,
        created_at: now - Duration::days(3),
        updated_at: now - Duration::days(3),
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// --- CSV imports ---

#[tokio::test]
async fn user_csv_import_reports_created_and_failed_rows() {
    let app = spawn_app().await;
    app.seed_department("Computer Science", "CSE").await;
    let admin = app.seed_user(Role::Admin, None).await;
    let csv = "\
name,email,password,role,department,section,batch,designation,qualification
Asha Rao,asha@campus.test,secret123,Student,CSE,A,2022-2026,,
Bad Row,not-an-email,secret123,Student,CSE,A,2022-2026,,
Prof X,profx@campus.test,secret123,Faculty,cse,,,Professor,PhD
Ghost,ghost@campus.test,secret123,Student,NOPE,A,2022-2026,,
";

    let response = post_form(&app, "/upload/users", &app.token_for(&admin), csv_form("users.csv", csv)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "2 users imported, 2 rows failed");
    let report = &body["data"];
    assert_eq!(report["totalRows"], 4);
    assert_eq!(report["created"].as_array().unwrap().len(), 2);
    let failed = report["failed"].as_array().unwrap();
    assert_eq!(failed[0]["row"], 3);
    assert_eq!(failed[0]["message"], "Please provide a valid email address");
    assert_eq!(failed[1]["row"], 5);
    assert_eq!(failed[1]["message"], "Department 'NOPE' not found");

    // the CSV itself is kept as an admin-only bulk upload record
    let file_id: Uuid = report["fileId"].as_str().unwrap().parse().unwrap();
    let record = app.state.repo.get_file(file_id).await.unwrap().unwrap();
    assert_eq!(record.category, FileCategory::BulkUpload);
    assert_eq!(record.access.allowed_roles, vec![Role::Admin]);
    assert!(app.storage.contains(&record.path).await);

    let imported = app
        .state
        .repo
        .find_user_by_email("asha@campus.test")
        .await
        .unwrap()
        .unwrap();
    assert!(imported.student_id().unwrap().starts_with("CSE22A"));
}

#[tokio::test]
async fn subject_csv_import_keeps_going_past_bad_rows() {
    let app = spawn_app().await;
    app.seed_department("Computer Science", "CSE").await;
    let admin = app.seed_user(Role::Admin, None).await;
    let csv = "\
name,code,department,section,semester,academicYear,credits
Data Structures,CS201,CSE,A,3,2024-2025,4
Bad Year,CS202,CSE,A,3,2024-2026,4
Too Short,CS203
";

    let response = post_form(&app, "/upload/subjects", &app.token_for(&admin), csv_form("subjects.csv", csv)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "1 subjects imported, 2 rows failed");
    let failed = body["data"]["failed"].as_array().unwrap();
    assert_eq!(failed[0]["row"], 3);
    assert_eq!(failed[1]["row"], 4);
    assert_eq!(failed[1]["message"], "Row has the wrong number of columns");
    assert_eq!(body["data"]["created"][0]["code"], "CS201");
}

#[tokio::test]
async fn non_csv_upload_is_rejected() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;
    let form = Form::new().part("file", file_part("photo.png", "image/png", vec![0x89, 0x50, 0x4e, 0x47]));

    let response = post_form(&app, "/upload/users", &app.token_for(&admin), form).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Only CSV files are allowed");
    assert_eq!(app.storage.object_count().await, 0);
}

#[tokio::test]
async fn csv_without_data_rows_is_rejected() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = post_form(
        &app,
        "/upload/users",
        &app.token_for(&admin),
        csv_form("users.csv", "name,email,password\n"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "CSV file contains no data rows");
}

#[tokio::test]
async fn missing_file_field_is_rejected() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;
    let form = Form::new().text("note", "no file here");

    let response = post_form(&app, "/upload/users", &app.token_for(&admin), form).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Please upload a CSV file in the 'file' field");
}

#[tokio::test]
async fn oversized_csv_is_413() {
    let app = spawn_app_with(AppConfig {
        max_csv_upload_bytes: 1024,
        ..test_config()
    })
    .await;
    let admin = app.seed_user(Role::Admin, None).await;
    let mut csv = String::from("name,email,password\n");
    while csv.len() < 4096 {
        csv.push_str("Someone,someone@campus.test,secret123\n");
    }

    let response = post_form(&app, "/upload/users", &app.token_for(&admin), csv_form("users.csv", &csv)).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "File too large. Maximum size is 1 KB");
}

#[tokio::test]
async fn csv_imports_are_admin_only() {
    let app = spawn_app().await;
    let staff = app.seed_user(Role::Staff, None).await;

    let response = post_form(
        &app,
        "/upload/users",
        &app.token_for(&staff),
        csv_form("users.csv", "name,email\nA,a@campus.test\n"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// --- Files ---

#[tokio::test]
async fn shared_file_round_trip() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let faculty = app.seed_user(Role::Faculty, Some(&department)).await;
    let student = app.seed_user(Role::Student, Some(&department)).await;
    let staff = app.seed_user(Role::Staff, Some(&department)).await;
    let content = b"lecture one".to_vec();
    let form = Form::new()
        .part("file", file_part("Lecture 1.txt", "text/plain", content.clone()))
        .text("category", "Notes")
        .text("description", "Week one")
        .text("allowedRoles", "Student")
        .text("relatedType", "Department")
        .text("relatedId", department.id.to_string());

    let response = post_form(&app, "/files", &app.token_for(&faculty), form).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "File uploaded successfully");
    assert_eq!(body["data"]["originalName"], "Lecture 1.txt");
    assert_eq!(body["data"]["size"], content.len());
    assert!(body["data"]["storedName"].as_str().unwrap().ends_with(".txt"));
    let file_id = body["data"]["id"].as_str().unwrap().to_string();

    let download = app
        .client
        .get(app.url(&format!("/files/{file_id}/download")))
        .bearer_auth(app.token_for(&student))
        .send()
        .await
        .unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()["content-type"], "text/plain");
    assert_eq!(
        download.headers()["content-disposition"],
        "attachment; filename=\"Lecture 1.txt\""
    );
    assert_eq!(download.headers()["x-content-type-options"], "nosniff");
    assert_eq!(download.bytes().await.unwrap().to_vec(), content);

    let denied = app
        .client
        .get(app.url(&format!("/files/{file_id}")))
        .bearer_auth(app.token_for(&staff))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["message"], "Not authorized to access this file");

    let stored = app
        .state
        .repo
        .get_file(file_id.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.download_count, 1);
}

#[tokio::test]
async fn upload_for_a_missing_related_entity_is_rejected() {
    let app = spawn_app().await;
    let faculty = app.seed_user(Role::Faculty, None).await;
    let form = Form::new()
        .part("file", file_part("syllabus.txt", "text/plain", b"unit 1".to_vec()))
        .text("relatedType", "Subject")
        .text("relatedId", Uuid::new_v4().to_string());

    let response = post_form(&app, "/files", &app.token_for(&faculty), form).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Referenced subject does not exist");
    assert_eq!(app.storage.object_count().await, 0);
    let files = app
        .state
        .repo
        .list_files(&FileFilter::default(), None, Utc::now())
        .await
        .unwrap();
    assert_eq!(files.total, 0);
}

#[tokio::test]
async fn file_listing_hides_unshared_files() {
    let app = spawn_app().await;
    let faculty = app.seed_user(Role::Faculty, None).await;
    let student = app.seed_user(Role::Student, None).await;
    let staff = app.seed_user(Role::Staff, None).await;
    let form = Form::new()
        .part("file", file_part("notes.pdf", "application/pdf", b"%PDF".to_vec()))
        .text("allowedRoles", r#"["Student"]"#);
    post_form(&app, "/files", &app.token_for(&faculty), form).await;

    let count = |token: String| {
        let app = &app;
        async move {
            let body: Value = app
                .client
                .get(app.url("/files"))
                .bearer_auth(token)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            body["data"].as_array().unwrap().len()
        }
    };

    assert_eq!(count(app.token_for(&student)).await, 1);
    assert_eq!(count(app.token_for(&staff)).await, 0);
    assert_eq!(count(app.token_for(&faculty)).await, 1);
}

#[tokio::test]
async fn invalid_upload_fields_are_reported_together() {
    let app = spawn_app().await;
    let faculty = app.seed_user(Role::Faculty, None).await;
    let past = (Utc::now() - Duration::days(1)).to_rfc3339();
    let form = Form::new()
        .part("file", file_part("a.txt", "text/plain", b"a".to_vec()))
        .text("allowedRoles", "Student,Janitor")
        .text("isPublic", "maybe")
        .text("expiresAt", past);

    let response = post_form(&app, "/files", &app.token_for(&faculty), form).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("'Janitor' is not a valid Role"), "{message}");
    assert!(message.contains("isPublic must be true or false"), "{message}");
    assert!(message.contains("expiresAt must be in the future"), "{message}");
    assert_eq!(app.storage.object_count().await, 0);
}

#[tokio::test]
async fn only_uploader_or_admin_may_delete() {
    let app = spawn_app().await;
    let uploader = app.seed_user(Role::Faculty, None).await;
    let other = app.seed_user(Role::Student, None).await;
    let form = Form::new()
        .part("file", file_part("a.txt", "text/plain", b"a".to_vec()))
        .text("isPublic", "true");
    let body: Value = post_form(&app, "/files", &app.token_for(&uploader), form)
        .await
        .json()
        .await
        .unwrap();
    let file_id = body["data"]["id"].as_str().unwrap().to_string();
    let path = format!("/files/{file_id}");

    let denied = app
        .client
        .delete(app.url(&path))
        .bearer_auth(app.token_for(&other))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let deleted = app
        .client
        .delete(app.url(&path))
        .bearer_auth(app.token_for(&uploader))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);
    let body: Value = deleted.json().await.unwrap();
    assert_eq!(body["data"]["status"], "Archived");

    // archived files disappear for everyone but the uploader and admins
    let gone = app
        .client
        .get(app.url(&path))
        .bearer_auth(app.token_for(&other))
        .send()
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.storage.object_count().await, 1);
}

#[tokio::test]
async fn cleanup_archives_expired_files_and_removes_bytes() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;
    let expired = stored_file(&admin, Some(Utc::now() - Duration::hours(2)));
    let id = expired.id;
    app.storage
        .put_object(&expired.path, b"old".to_vec(), "text/plain")
        .await
        .unwrap();
    app.state.repo.create_file(expired.clone()).await.unwrap();

    let response = app
        .client
        .post(app.url("/files/cleanup"))
        .bearer_auth(app.token_for(&admin))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "1 expired files archived");
    assert_eq!(body["data"]["fileIds"][0], id.to_string());
    assert!(!app.storage.contains(&expired.path).await);
    let stored = app.state.repo.get_file(id).await.unwrap().unwrap();
    assert_eq!(stored.status, FileStatus::Archived);
}

#[tokio::test]
async fn storage_failure_leaves_no_file_record() {
    let storage = MockStorageService::new_failing();
    let state = AppState {
        repo: Arc::new(InMemoryRepository::new()),
        storage: Arc::new(storage.clone()),
        config: test_config(),
    };
    let app = serve(state, storage).await;
    let faculty = app.seed_user(Role::Faculty, None).await;
    let form = Form::new().part("file", file_part("a.txt", "text/plain", b"a".to_vec()));

    let response = post_form(&app, "/files", &app.token_for(&faculty), form).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Server Error");
    let files = app
        .state
        .repo
        .list_files(&FileFilter::default(), None, Utc::now())
        .await
        .unwrap();
    assert_eq!(files.total, 0);
}

// --- Router level ---

#[tokio::test]
async fn non_multipart_upload_is_400() {
    let (state, _storage) = test_state(test_config());
    let faculty = seed_user(&state, Role::Faculty, None).await;
    let token = issue_token(&state.config, &faculty).unwrap();
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/files")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"name":"a.txt"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 400);
}

#[tokio::test]
async fn download_with_missing_bytes_is_404() {
    let (state, _storage) = test_state(test_config());
    let admin = seed_user(&state, Role::Admin, None).await;
    let record = state
        .repo
        .create_file(stored_file(&admin, None))
        .await
        .unwrap();
    let token = issue_token(&state.config, &admin).unwrap();
    let app = create_router(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/files/{}/download", record.id))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["message"], "File content not found");
}
