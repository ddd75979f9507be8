mod common;

use campus_admin::{
    auth::{decode_token, ensure_bootstrap_admin, issue_token},
    config::{AppConfig, BootstrapAdmin},
    models::{AccountStatus, ActivityAction, ActivityFilter, Role},
};
use common::{TEST_PASSWORD, spawn_app, test_config, test_state};
use reqwest::StatusCode;
use serde_json::{Value, json};

#[tokio::test]
async fn issued_token_carries_user_and_role() {
    let app = spawn_app().await;
    let faculty = app.seed_user(Role::Faculty, None).await;

    let token = issue_token(&app.state.config, &faculty).unwrap();
    let claims = decode_token(&app.state.config, &token).unwrap();

    assert_eq!(claims.sub, faculty.id);
    assert_eq!(claims.role, Role::Faculty);
    assert!(claims.exp > claims.iat);
}

#[tokio::test]
async fn me_returns_the_flattened_profile() {
    let app = spawn_app().await;
    let department = app.seed_department("Computer Science", "CSE").await;
    let student = app.seed_user(Role::Student, Some(&department)).await;

    let response = app
        .client
        .get(app.url("/auth/me"))
        .bearer_auth(app.token_for(&student))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["id"], student.id.to_string());
    assert_eq!(body["data"]["role"], "Student");
    assert_eq!(body["data"]["section"], "A");
    assert_eq!(body["data"]["batch"], "2022-2026");
}

#[tokio::test]
async fn expired_token_is_rejected() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;
    let expired_config = AppConfig {
        jwt_expiry_hours: -1,
        ..app.state.config.clone()
    };
    let token = issue_token(&expired_config, &admin).unwrap();

    let response = app
        .client
        .get(app.url("/auth/me"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Token expired");
}

#[tokio::test]
async fn token_signed_with_another_secret_is_rejected() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;
    let foreign = AppConfig {
        jwt_secret: "some-other-secret".to_string(),
        ..app.state.config.clone()
    };
    let token = issue_token(&foreign, &admin).unwrap();

    let response = app
        .client
        .get(app.url("/auth/me"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn deactivated_account_loses_access_immediately() {
    let app = spawn_app().await;
    let mut staff = app.seed_user(Role::Staff, None).await;
    let token = app.token_for(&staff);

    staff.status = AccountStatus::Inactive;
    app.state.repo.update_user(staff.clone()).await.unwrap();

    let with_token = app
        .client
        .get(app.url("/auth/me"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(with_token.status(), StatusCode::UNAUTHORIZED);
    let body: Value = with_token.json().await.unwrap();
    assert_eq!(body["message"], "Account is inactive");

    let login = app.login(&staff.email, TEST_PASSWORD).await;
    assert_eq!(login.status(), StatusCode::UNAUTHORIZED);
    let body: Value = login.json().await.unwrap();
    assert_eq!(body["message"], "Account is inactive");
}

#[tokio::test]
async fn deleted_account_token_is_rejected() {
    let app = spawn_app().await;
    let staff = app.seed_user(Role::Staff, None).await;
    let token = app.token_for(&staff);

    app.state.repo.delete_user(staff.id).await.unwrap();

    let response = app
        .client
        .get(app.url("/auth/me"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "User no longer exists");
}

#[tokio::test]
async fn login_records_last_login_and_activity() {
    let app = spawn_app().await;
    let admin = app.seed_user(Role::Admin, None).await;

    let response = app.login(&admin.email, TEST_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.state.repo.get_user(admin.id).await.unwrap().unwrap();
    assert!(stored.last_login.is_some());

    let log = app
        .state
        .repo
        .list_activities(&ActivityFilter {
            action: Some(ActivityAction::Login),
            ..ActivityFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(log.total, 1);
    assert_eq!(log.items[0].actor, Some(admin.id));
    assert_eq!(log.items[0].details["success"], true);
}

#[tokio::test]
async fn failed_login_is_logged_without_an_actor() {
    let app = spawn_app().await;

    let response = app.login("ghost@campus.test", TEST_PASSWORD).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let log = app
        .state
        .repo
        .list_activities(&ActivityFilter::default())
        .await
        .unwrap();
    assert_eq!(log.total, 1);
    assert_eq!(log.items[0].actor, None);
    assert_eq!(log.items[0].details["success"], false);
    assert_eq!(log.items[0].details["email"], "ghost@campus.test");
}

#[tokio::test]
async fn logout_is_recorded() {
    let app = spawn_app().await;
    let faculty = app.seed_user(Role::Faculty, None).await;

    let response = app
        .client
        .post(app.url("/auth/logout"))
        .bearer_auth(app.token_for(&faculty))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Logged out successfully");

    let log = app
        .state
        .repo
        .list_activities(&ActivityFilter {
            actor: Some(faculty.id),
            ..ActivityFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(log.items[0].action, ActivityAction::Logout);
}

#[tokio::test]
async fn change_password_requires_the_current_password() {
    let app = spawn_app().await;
    let student = app.seed_user(Role::Student, None).await;
    let token = app.token_for(&student);

    let wrong = app
        .client
        .put(app.url("/auth/password"))
        .bearer_auth(&token)
        .json(&json!({ "currentPassword": "guess-again", "newPassword": "brand-new-pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);
    let body: Value = wrong.json().await.unwrap();
    assert_eq!(body["message"], "Current password is incorrect");

    let weak = app
        .client
        .put(app.url("/auth/password"))
        .bearer_auth(&token)
        .json(&json!({ "currentPassword": TEST_PASSWORD, "newPassword": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(weak.status(), StatusCode::BAD_REQUEST);

    let ok = app
        .client
        .put(app.url("/auth/password"))
        .bearer_auth(&token)
        .json(&json!({ "currentPassword": TEST_PASSWORD, "newPassword": "brand-new-pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    assert_eq!(
        app.login(&student.email, TEST_PASSWORD).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        app.login(&student.email, "brand-new-pass").await.status(),
        StatusCode::OK
    );
}

#[tokio::test]
async fn bootstrap_admin_is_created_once() {
    let config = AppConfig {
        bootstrap_admin: Some(BootstrapAdmin {
            email: "Root@Campus.Test".to_string(),
            password: "root-password".to_string(),
            name: "Root".to_string(),
        }),
        ..test_config()
    };
    let (state, _) = test_state(config);

    assert!(ensure_bootstrap_admin(&state.repo, &state.config).await.unwrap());
    assert!(!ensure_bootstrap_admin(&state.repo, &state.config).await.unwrap());

    let admin = state
        .repo
        .find_user_by_email("root@campus.test")
        .await
        .unwrap()
        .expect("bootstrap admin stored");
    assert_eq!(admin.role(), Role::Admin);
}

#[tokio::test]
async fn bootstrap_admin_with_weak_password_is_refused() {
    let config = AppConfig {
        bootstrap_admin: Some(BootstrapAdmin {
            email: "root@campus.test".to_string(),
            password: "123".to_string(),
            name: "Root".to_string(),
        }),
        ..test_config()
    };
    let (state, _) = test_state(config);

    assert!(ensure_bootstrap_admin(&state.repo, &state.config).await.is_err());
    assert!(
        state
            .repo
            .find_user_by_email("root@campus.test")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn no_bootstrap_admin_configured_is_a_no_op() {
    let (state, _) = test_state(test_config());

    assert!(!ensure_bootstrap_admin(&state.repo, &state.config).await.unwrap());
}
