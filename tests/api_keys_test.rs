mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};

use common::TestApp;
use freightlink::errors::ServiceError;
use freightlink::models::ApiKeyStatus;
use freightlink::services::api_keys::PREFIX_LEN;

#[tokio::test]
async fn issued_keys_verify_and_stamp_last_use() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let keys = &app.services.api_keys;

    let issued = keys.issue_key(owner.id, "fleet tracker").await.unwrap();
    assert_eq!(issued.record.key_prefix.len(), PREFIX_LEN);
    assert!(issued.key.starts_with(&format!("{}.", issued.record.key_prefix)));
    assert!(!issued.record.key_hash.contains(&issued.key));
    assert!(issued.record.expires_at.is_some());

    let now = Utc::now();
    let verified = keys.verify_key(&issued.key, now).await.unwrap();
    assert_eq!(verified.id, issued.record.id);
    let stamped = verified.last_used.expect("last_used should be stamped");
    assert!((stamped - now).num_milliseconds().abs() < 1);
}

#[tokio::test]
async fn every_bad_key_gets_the_same_answer() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let keys = &app.services.api_keys;
    let issued = keys.issue_key(owner.id, "tracker").await.unwrap();

    let tampered = format!("{}x", issued.key);
    let unknown = format!("00000000.{}", issued.key.split_once('.').unwrap().1);
    for presented in ["", "not-a-key", tampered.as_str(), unknown.as_str()] {
        let err = keys.verify_key(presented, Utc::now()).await.unwrap_err();
        assert_matches!(err, ServiceError::Unauthorized(ref m) if m == "invalid API key");
    }
}

#[tokio::test]
async fn expired_keys_are_refused() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let keys = &app.services.api_keys;

    let issued = keys
        .issue_key_with_ttl(owner.id, "short lived", Some(Duration::hours(1)))
        .await
        .unwrap();
    keys.verify_key(&issued.key, Utc::now()).await.unwrap();
    assert_matches!(
        keys.verify_key(&issued.key, Utc::now() + Duration::hours(2)).await,
        Err(ServiceError::Unauthorized(_))
    );

    let forever = keys.issue_key_with_ttl(owner.id, "no expiry", None).await.unwrap();
    assert_eq!(forever.record.expires_at, None);
    keys.verify_key(&forever.key, Utc::now() + Duration::days(3650))
        .await
        .unwrap();
}

#[tokio::test]
async fn deactivated_keys_can_return_but_revoked_keys_cannot() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let keys = &app.services.api_keys;
    let issued = keys.issue_key(owner.id, "tracker").await.unwrap();
    let id = issued.record.id;

    assert_eq!(keys.deactivate(id, owner.id).await.unwrap().status, ApiKeyStatus::Inactive);
    assert_matches!(
        keys.verify_key(&issued.key, Utc::now()).await,
        Err(ServiceError::Unauthorized(_))
    );

    assert_eq!(keys.reactivate(id, owner.id).await.unwrap().status, ApiKeyStatus::Active);
    keys.verify_key(&issued.key, Utc::now()).await.unwrap();

    assert_eq!(keys.revoke(id, owner.id).await.unwrap().status, ApiKeyStatus::Revoked);
    assert_matches!(
        keys.reactivate(id, owner.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_matches!(
        keys.verify_key(&issued.key, Utc::now()).await,
        Err(ServiceError::Unauthorized(_))
    );
}

#[tokio::test]
async fn keys_belong_to_their_owner() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let other = app.business("+254711000001").await;
    let admin = app.admin().await;
    let keys = &app.services.api_keys;
    let issued = keys.issue_key(owner.id, "tracker").await.unwrap();

    assert_matches!(
        keys.revoke(issued.record.id, other.id).await,
        Err(ServiceError::Forbidden(_))
    );
    keys.revoke(issued.record.id, admin.id).await.unwrap();

    assert_matches!(
        keys.issue_key(owner.id, "   ").await,
        Err(ServiceError::ValidationError(_))
    );
    keys.issue_key(owner.id, "second").await.unwrap();
    let listed = keys.keys_for_user(owner.id).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].key_name, "second");
}

#[tokio::test]
async fn keys_verified_under_another_pepper_fail() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let issued = app.services.api_keys.issue_key(owner.id, "tracker").await.unwrap();

    let rotated = freightlink::services::api_keys::ApiKeyService::new(
        app.db.clone(),
        "a-completely-different-pepper-value-here",
        None,
    );
    assert_matches!(
        rotated.verify_key(&issued.key, Utc::now()).await,
        Err(ServiceError::Unauthorized(_))
    );
}
