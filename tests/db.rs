//! 依赖 Postgres 的路由测试，每个用例由 sqlx::test 建一个独立的临时库
//! 需要设置 DATABASE_URL；Redis 不可达，覆盖的流程都不碰 Redis

mod common;

use axum::http::StatusCode;
use common::{call, config, router_with, token, token_for};
use license_portal::utils::Role;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

const NATIONAL_ID: &str = "1234567890123";

async fn insert_citizen(pool: &PgPool, national_id: &str) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO citizens (national_id, full_name, phone_number, email, status) \
         VALUES ($1, 'Jean Ndayishimiye', '+257 79 123 456', 'jean@example.com', 'ACTIVE') \
         RETURNING id",
    )
    .bind(national_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn insert_application(pool: &PgPool, citizen_id: Uuid, status: &str) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO license_applications (citizen_id, license_type, status, personal_info) \
         VALUES ($1, 'car', $2, $3) RETURNING id",
    )
    .bind(citizen_id)
    .bind(status)
    .bind(json!({"nationalId": NATIONAL_ID, "firstName": "Jean", "lastName": "Ndayishimiye"}))
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn application_status(pool: &PgPool, id: Uuid) -> String {
    sqlx::query_scalar("SELECT status FROM license_applications WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrations = false, fixtures("schema"))]
async fn second_approval_is_rejected(pool: PgPool) {
    let config = config();
    let r = router_with(pool.clone(), &config);
    let admin = token(&config, Role::Admin);
    let id = insert_application(&pool, Uuid::new_v4(), "PENDING").await;
    let body = json!({"applicationId": id, "action": "APPROVED", "reviewNotes": " ok "});

    let review = "/api/admin/applications/review";
    let (s, first) = call(&r, "POST", review, Some(&admin), Some(body.clone())).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(first["msg"], "Application approved successfully");
    assert_eq!(first["respData"]["status"], "APPROVED");
    assert_eq!(first["respData"]["reviewNotes"], "ok");

    let (s, second) = call(&r, "POST", review, Some(&admin), Some(body)).await;
    assert_eq!(s, StatusCode::BAD_REQUEST);
    assert_eq!(second["msg"], "Application already APPROVED");

    let audits: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM admin_actions WHERE application_id = $1")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(audits, 1);
}

#[sqlx::test(migrations = false, fixtures("schema"))]
async fn batch_review_skips_final_applications(pool: PgPool) {
    let config = config();
    let r = router_with(pool.clone(), &config);
    let admin = token(&config, Role::Admin);
    let citizen = Uuid::new_v4();

    let mut ids = Vec::new();
    for status in ["DRAFT", "PENDING", "UNDER_REVIEW", "APPROVED", "REJECTED"] {
        ids.push(insert_application(&pool, citizen, status).await);
    }

    let (s, body) = call(
        &r,
        "PATCH",
        "/api/admin/applications/review",
        Some(&admin),
        Some(json!({"applicationIds": ids, "action": "REJECTED"})),
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body["respData"]["count"], 3);
    assert_eq!(body["msg"], "3 applications rejected successfully");

    assert_eq!(application_status(&pool, ids[0]).await, "REJECTED");
    assert_eq!(application_status(&pool, ids[2]).await, "REJECTED");
    assert_eq!(application_status(&pool, ids[3]).await, "APPROVED");

    let audits: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_actions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(audits, 3);
}

#[sqlx::test(migrations = false, fixtures("schema"))]
async fn otp_cannot_be_replayed(pool: PgPool) {
    let config = config();
    let r = router_with(pool.clone(), &config);
    let citizen_id = insert_citizen(&pool, NATIONAL_ID).await;

    let (s, init) = call(
        &r,
        "POST",
        "/api/auth/initiate",
        None,
        Some(json!({"nationalId": NATIONAL_ID})),
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(init["msg"], "OTP sent to +257 79 123 456");
    let transaction_id = init["respData"]["transactionId"].as_str().unwrap().to_string();
    let otp = init["respData"]["otp"].as_str().unwrap().to_string();
    let body = json!({"transactionId": transaction_id, "otp": otp});

    let (s, verified) = call(&r, "POST", "/api/auth/verify-otp", None, Some(body.clone())).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(verified["respData"]["citizen"]["id"], citizen_id.to_string());
    assert!(verified["respData"]["session"]["accessToken"].is_string());

    let (s, replay) = call(&r, "POST", "/api/auth/verify-otp", None, Some(body)).await;
    assert_eq!(s, StatusCode::BAD_REQUEST);
    assert_eq!(replay["msg"], "OTP has already been used");

    let status: String =
        sqlx::query_scalar("SELECT status FROM auth_sessions WHERE transaction_id = $1")
            .bind(&transaction_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "VERIFIED");
}

#[sqlx::test(migrations = false, fixtures("schema"))]
async fn expired_otp_closes_session(pool: PgPool) {
    let config = config();
    let r = router_with(pool.clone(), &config);
    let citizen_id = insert_citizen(&pool, NATIONAL_ID).await;
    sqlx::query(
        "INSERT INTO auth_sessions (citizen_id, transaction_id, otp_code, otp_expires_at, status) \
         VALUES ($1, 'txn_1_old', '123456', NOW() - INTERVAL '1 minute', 'PENDING')",
    )
    .bind(citizen_id)
    .execute(&pool)
    .await
    .unwrap();

    let (s, body) = call(
        &r,
        "POST",
        "/api/auth/verify-otp",
        None,
        Some(json!({"transactionId": "txn_1_old", "otp": "123456"})),
    )
    .await;
    assert_eq!(s, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "OTP has expired");

    let status: String =
        sqlx::query_scalar("SELECT status FROM auth_sessions WHERE transaction_id = 'txn_1_old'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "EXPIRED");
}

#[sqlx::test(migrations = false, fixtures("schema"))]
async fn saving_permissions_twice_updates(pool: PgPool) {
    let config = config();
    let r = router_with(pool.clone(), &config);
    insert_citizen(&pool, NATIONAL_ID).await;

    let save = |picture: bool| {
        json!({
            "nationalId": NATIONAL_ID,
            "permissions": {
                "email": true, "birthdate": false, "gender": true,
                "name": true, "phoneNumber": false, "picture": picture
            }
        })
    };

    let (s, first) = call(&r, "POST", "/api/permissions", None, Some(save(false))).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(first["msg"], "Permissions saved successfully");
    assert_eq!(first["respData"]["isUpdate"], false);

    let (s, second) = call(&r, "POST", "/api/permissions", None, Some(save(true))).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(second["msg"], "Permissions updated successfully");
    assert_eq!(second["respData"]["isUpdate"], true);

    let (rows, picture): (i64, bool) =
        sqlx::query_as("SELECT COUNT(*), BOOL_OR(picture_permission) FROM user_permissions")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(rows, 1);
    assert!(picture);

    let path = format!("/api/permissions?nationalId={}", NATIONAL_ID);
    let (s, fetched) = call(&r, "GET", &path, None, None).await;
    assert_eq!(s, StatusCode::OK);
    assert!(fetched["respData"].get("isUpdate").is_none());
}

#[sqlx::test(migrations = false, fixtures("schema"))]
async fn verify_records_expired_license(pool: PgPool) {
    let config = config();
    let r = router_with(pool.clone(), &config);
    let application_id = insert_application(&pool, Uuid::new_v4(), "APPROVED").await;
    sqlx::query(
        "INSERT INTO qr_codes (license_number, application_id, qr_code_data, issue_date, expiry_date, status) \
         VALUES ('CAR-1-ABCDEF', $1, '{}', DATE '2015-01-01', DATE '2020-01-01', 'active')",
    )
    .bind(application_id)
    .execute(&pool)
    .await
    .unwrap();

    let (s, body) = call(
        &r,
        "POST",
        "/api/qr-codes/verify",
        None,
        Some(json!({"qrData": {
            "licenseNumber": "CAR-1-ABCDEF",
            "applicationId": application_id,
            "holderName": "Jean Ndayishimiye"
        }})),
    )
    .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body["respData"]["valid"], false);
    assert_eq!(body["respData"]["status"], "expired");
    assert_eq!(body["respData"]["data"]["holderName"], "Jean Ndayishimiye");

    let status: String =
        sqlx::query_scalar("SELECT status FROM qr_codes WHERE license_number = 'CAR-1-ABCDEF'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "expired");
}

#[sqlx::test(migrations = false, fixtures("schema"))]
async fn citizens_cannot_touch_other_applications(pool: PgPool) {
    let config = config();
    let r = router_with(pool.clone(), &config);
    let owner = Uuid::new_v4();
    let id = insert_application(&pool, owner, "DRAFT").await;
    let path = format!("/api/applications/{}", id);
    let update = json!({"documents": {"idCard": "id.pdf"}});

    let stranger = token(&config, Role::Citizen);
    let (s, body) = call(&r, "PUT", &path, Some(&stranger), Some(update.clone())).await;
    assert_eq!(s, StatusCode::NOT_FOUND);
    assert_eq!(body["msg"], "Application not found");
    let (s, _) = call(&r, "GET", &path, Some(&stranger), None).await;
    assert_eq!(s, StatusCode::NOT_FOUND);
    let (s, _) = call(&r, "POST", &format!("{}/submit", path), Some(&stranger), None).await;
    assert_eq!(s, StatusCode::NOT_FOUND);
    assert_eq!(application_status(&pool, id).await, "DRAFT");

    let own = token_for(&config, &owner.to_string(), Role::Citizen);
    let (s, body) = call(&r, "PUT", &path, Some(&own), Some(update)).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body["respData"]["documents"]["idCard"], "id.pdf");

    let (s, listed) = call(&r, "GET", "/api/applications", Some(&own), None).await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(listed["respData"]["count"], 1);
}
