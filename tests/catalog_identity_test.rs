mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use rust_decimal_macros::dec;

use common::{cargo_input, route_input, ymd, TestApp};
use freightlink::errors::ServiceError;
use freightlink::models::{
    BusinessDocumentType, CargoStatus, MatchStatus, NotificationType, TruckDocumentType,
    UserType, VerificationStatus,
};
use freightlink::services::accounts::{RegisterUserInput, UpdateProfileInput};
use freightlink::services::fleet::RegisterTruckInput;

#[tokio::test]
async fn superusers_get_every_privilege_flag() {
    let app = TestApp::new().await;
    let admin = app.admin().await;

    assert_eq!(admin.user_type, UserType::Admin);
    assert!(admin.is_staff && admin.is_superuser && admin.is_verified && admin.is_active);
    assert!(admin.password_hash.is_some());

    let authed = app
        .services
        .accounts
        .authenticate("+254700000001", "admin-password")
        .await
        .unwrap();
    assert_eq!(authed.id, admin.id);
    assert_matches!(
        app.services.accounts.authenticate("+254700000001", "wrong").await,
        Err(ServiceError::Unauthorized(_))
    );
}

#[tokio::test]
async fn phone_numbers_are_unique_and_validated() {
    let app = TestApp::new().await;
    let first = app.business("+254711000001").await;
    assert_eq!(first.email.as_deref(), Some("254711000001@example.com"));
    assert!(!first.is_verified);
    assert_eq!(first.average_rating, dec!(0));

    let err = app
        .services
        .accounts
        .register(RegisterUserInput::new(
            "+254711000001",
            "Other",
            "Person",
            UserType::TruckOwner,
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let err = app
        .services
        .accounts
        .register(RegisterUserInput::new(
            "00254 711-000-001",
            "Same",
            "Number",
            UserType::TruckOwner,
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(_));

    let spaced = app
        .services
        .accounts
        .register(RegisterUserInput::new(
            "+254 722 000 009",
            "Spaced",
            "Out",
            UserType::TruckOwner,
        ))
        .await
        .unwrap();
    assert_eq!(spaced.phone_number, "+254722000009");
    let found = app.services.accounts.find_by_phone("+254722000009").await.unwrap();
    assert_eq!(found.map(|u| u.id), Some(spaced.id));

    let err = app
        .services
        .accounts
        .register(RegisterUserInput::new("07-11", "Bad", "Phone", UserType::Business))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn profiles_and_preferences_update_in_place() {
    let app = TestApp::new().await;
    let user = app.business("+254711000001").await;

    let updated = app
        .services
        .accounts
        .update_profile(
            user.id,
            UpdateProfileInput {
                city: Some("Nakuru".to_string()),
                company_name: Some("Rift Grains Ltd".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.city.as_deref(), Some("Nakuru"));
    assert_eq!(updated.first_name, "Test");

    let prefs = app
        .services
        .accounts
        .set_notification_preferences(user.id, false, true)
        .await
        .unwrap();
    assert!(!prefs.email_notifications && prefs.sms_notifications);

    let seen = Utc::now();
    app.services.accounts.touch_last_online(user.id, seen).await.unwrap();
    let reloaded = app.services.accounts.get_user(user.id).await.unwrap();
    assert!(reloaded.last_online.is_some());

    let gone = app.services.accounts.deactivate(user.id).await.unwrap();
    assert!(!gone.is_active);
}

#[tokio::test]
async fn verification_requests_flow_through_moderators() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let business = app.business("+254711000001").await;
    let verifications = &app.services.verification;

    let request = verifications
        .request_user_verification(business.id, Some("Please review".to_string()))
        .await
        .unwrap();
    assert_eq!(request.status, VerificationStatus::Pending);
    assert_matches!(
        verifications.request_user_verification(business.id, None).await,
        Err(ServiceError::Conflict(_))
    );

    let other = app.truck_owner("+254722000001").await;
    assert_matches!(
        verifications
            .decide_user_verification(request.id, other.id, true, None)
            .await,
        Err(ServiceError::Forbidden(_))
    );

    let decided = verifications
        .decide_user_verification(request.id, admin.id, true, None)
        .await
        .unwrap();
    assert_eq!(decided.status, VerificationStatus::Approved);
    assert_eq!(decided.verified_by, Some(admin.id));
    assert!(app.services.accounts.get_user(business.id).await.unwrap().is_verified);

    assert_matches!(
        verifications
            .decide_user_verification(request.id, admin.id, false, None)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_eq!(verifications.verification_history(business.id).await.unwrap().len(), 1);

    let inbox = app.services.notifications.list_for_user(business.id).await.unwrap();
    assert!(inbox.iter().any(|n| n.notification_type == NotificationType::System));
}

#[tokio::test]
async fn trading_readiness_needs_approval_and_documents() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let business = app.business("+254711000001").await;
    let verifications = &app.services.verification;

    let readiness = verifications.user_readiness(business.id).await.unwrap();
    assert!(!readiness.approved);
    assert_eq!(readiness.missing_documents.len(), 2);

    let mut docs = Vec::new();
    for kind in [BusinessDocumentType::BusinessRegistration, BusinessDocumentType::IdDocument] {
        docs.push(
            verifications
                .upload_business_document(business.id, kind, "documents/cert.pdf", None)
                .await
                .unwrap(),
        );
    }
    for doc in &docs {
        let verified = verifications.verify_business_document(doc.id, admin.id).await.unwrap();
        assert!(verified.is_verified && verified.verified_at.is_some());
    }
    assert_matches!(
        verifications.verify_business_document(docs[0].id, admin.id).await,
        Err(ServiceError::InvalidOperation(_))
    );
    // documents alone do not verify the account
    assert!(!verifications.is_user_ready_to_trade(business.id).await.unwrap());

    let request = verifications.request_user_verification(business.id, None).await.unwrap();
    verifications
        .decide_user_verification(request.id, admin.id, true, None)
        .await
        .unwrap();
    assert!(verifications.is_user_ready_to_trade(business.id).await.unwrap());
}

#[tokio::test]
async fn trucks_need_all_three_documents() {
    let app = TestApp::new().await;
    let admin = app.admin().await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KBZ 900Z").await;
    let verifications = &app.services.verification;

    for kind in [TruckDocumentType::License, TruckDocumentType::Insurance] {
        let doc = verifications
            .upload_truck_document(truck.id, kind, "documents/truck.pdf")
            .await
            .unwrap();
        verifications.verify_truck_document(doc.id, admin.id).await.unwrap();
    }
    assert_matches!(
        verifications.set_truck_verified(truck.id, owner.id, true).await,
        Err(ServiceError::Forbidden(_))
    );
    verifications.set_truck_verified(truck.id, admin.id, true).await.unwrap();

    let readiness = verifications.truck_readiness(truck.id).await.unwrap();
    assert!(readiness.approved);
    assert_eq!(readiness.missing_documents, vec!["roadworthy".to_string()]);
    assert!(!verifications.is_truck_ready_to_trade(truck.id).await.unwrap());

    let doc = verifications
        .upload_truck_document(truck.id, TruckDocumentType::Roadworthy, "documents/rw.pdf")
        .await
        .unwrap();
    verifications.verify_truck_document(doc.id, admin.id).await.unwrap();
    assert!(verifications.is_truck_ready_to_trade(truck.id).await.unwrap());
}

#[tokio::test]
async fn only_truck_owners_register_unique_plates() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;

    let input = |plate: &str| RegisterTruckInput {
        license_plate: plate.to_string(),
        truck_type: freightlink::models::TruckType::Canter,
        capacity_volume: dec!(20),
        capacity_weight: dec!(5),
    };

    assert_matches!(
        app.services.fleet.register_truck(business.id, input("KAA 111A")).await,
        Err(ServiceError::Forbidden(_))
    );

    let truck = app.services.fleet.register_truck(owner.id, input("kaa 111a")).await.unwrap();
    assert_eq!(truck.license_plate, "KAA111A");
    assert!(!truck.is_verified);

    assert_matches!(
        app.services.fleet.register_truck(owner.id, input("KAA 111A")).await,
        Err(ServiceError::Conflict(_))
    );
    assert_matches!(
        app.services.fleet.register_truck(owner.id, input("  ")).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(app.services.fleet.trucks_for_owner(owner.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn one_primary_photo_per_truck() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KAB 222B").await;
    let fleet = &app.services.fleet;

    let front = fleet.add_truck_photo(truck.id, "photos/front.jpg", true).await.unwrap();
    let side = fleet.add_truck_photo(truck.id, "photos/side.jpg", true).await.unwrap();
    fleet.add_truck_photo(truck.id, "photos/rear.jpg", false).await.unwrap();

    let photos = fleet.truck_photos(truck.id).await.unwrap();
    assert_eq!(photos.iter().filter(|p| p.is_primary).count(), 1);
    assert_eq!(photos[0].id, side.id);

    fleet.set_primary_truck_photo(front.id).await.unwrap();
    let photos = fleet.truck_photos(truck.id).await.unwrap();
    assert_eq!(photos.iter().filter(|p| p.is_primary).count(), 1);
    assert_eq!(photos[0].id, front.id);
}

#[tokio::test]
async fn routes_respect_schedule_and_truck_capacity() {
    let app = TestApp::new().await;
    let owner = app.truck_owner("+254722000001").await;
    let stranger = app.truck_owner("+254722000002").await;
    let truck = app.truck(owner.id, "KAC 333C").await;
    let routes = &app.services.routes;

    let mut backwards = route_input(truck.id, 3);
    backwards.estimated_arrival_date = backwards.departure_date;
    backwards.estimated_arrival_time = common::hm(7, 0);
    assert_matches!(
        routes.create_route(owner.id, backwards).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut overloaded = route_input(truck.id, 3);
    overloaded.available_capacity_weight = dec!(12);
    assert_matches!(
        routes.create_route(owner.id, overloaded).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut off_map = route_input(truck.id, 3);
    off_map.origin_latitude = dec!(91);
    assert_matches!(
        routes.create_route(owner.id, off_map).await,
        Err(ServiceError::ValidationError(_))
    );

    assert_matches!(
        routes.create_route(stranger.id, route_input(truck.id, 3)).await,
        Err(ServiceError::Forbidden(_))
    );

    let later = app.route(owner.id, truck.id, 5).await;
    let sooner = app.route(owner.id, truck.id, 2).await;
    let upcoming: Vec<i64> = routes
        .active_routes(common::today_plus(0))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(upcoming, vec![sooner.id, later.id]);
    assert_eq!(routes.routes_for_truck(truck.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn pickup_window_drives_the_active_catalog() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let cargo = &app.services.cargo;

    let mut input = cargo_input(dec!(1.5), dec!(3));
    input.pickup_date_from = ymd(2024, 1, 10);
    input.pickup_date_to = ymd(2024, 1, 12);
    input.delivery_date_from = ymd(2024, 1, 12);
    input.delivery_date_to = ymd(2024, 1, 15);
    let listing = cargo.create_listing(business.id, input).await.unwrap();
    assert_eq!(listing.status, CargoStatus::Active);

    for (day, expected) in [
        (ymd(2024, 1, 9), 0),
        (ymd(2024, 1, 10), 1),
        (ymd(2024, 1, 11), 1),
        (ymd(2024, 1, 12), 1),
        (ymd(2024, 1, 13), 0),
    ] {
        assert_eq!(cargo.active_listings_on(day).await.unwrap().len(), expected, "{}", day);
    }

    let cancelled = cargo.cancel_listing(listing.id, business.id).await.unwrap();
    assert_eq!(cancelled.status, CargoStatus::Cancelled);
    assert!(cargo.active_listings_on(ymd(2024, 1, 11)).await.unwrap().is_empty());
    assert_matches!(
        cargo.cancel_listing(listing.id, business.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn cargo_rules_on_posting_and_cancelling() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let cargo = &app.services.cargo;

    assert_matches!(
        cargo.create_listing(owner.id, cargo_input(dec!(1), dec!(1))).await,
        Err(ServiceError::Forbidden(_))
    );

    let mut inverted = cargo_input(dec!(1), dec!(1));
    inverted.pickup_date_to = ymd(2000, 1, 1);
    assert_matches!(
        cargo.create_listing(business.id, inverted).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        cargo.create_listing(business.id, cargo_input(dec!(0), dec!(1))).await,
        Err(ServiceError::ValidationError(_))
    );

    let listing = app.cargo(business.id, dec!(1), dec!(2)).await;
    let truck = app.truck(owner.id, "KAD 444D").await;
    let route = app.route(owner.id, truck.id, 2).await;
    let pending = app.record_match(listing.id, route.id, dec!(55)).await;

    assert_matches!(
        cargo.cancel_listing(listing.id, owner.id).await,
        Err(ServiceError::Forbidden(_))
    );
    cargo.cancel_listing(listing.id, business.id).await.unwrap();
    assert_eq!(
        app.services.matching.get_match(pending.id).await.unwrap().status,
        MatchStatus::Expired
    );

    let photo = cargo.add_cargo_photo(listing.id, "photos/pallet.jpg", true).await.unwrap();
    let photos = cargo.cargo_photos(listing.id).await.unwrap();
    assert_eq!(photos.iter().map(|p| p.id).collect::<Vec<_>>(), vec![photo.id]);
    assert_eq!(cargo.listings_for_business(business.id).await.unwrap().len(), 1);
}
