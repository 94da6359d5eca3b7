mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use common::{match_input, TestApp};
use freightlink::errors::ServiceError;
use freightlink::models::{
    route_match, CargoStatus, MatchStatus, NotificationType, RouteStatus,
};
use freightlink::services::matching::BookingTerms;

#[tokio::test]
async fn recording_a_match_notifies_the_truck_owner() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KCB 100B").await;
    let route = app.route(owner.id, truck.id, 3).await;
    let cargo = app.cargo(business.id, dec!(2), dec!(5)).await;

    let recorded = app.record_match(cargo.id, route.id, dec!(87.5)).await;
    assert_eq!(recorded.status, MatchStatus::Pending);
    // 480 km at 85 per km
    assert_eq!(recorded.price_estimate, dec!(40800));

    let inbox = app.services.notifications.list_for_user(owner.id).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].notification_type, NotificationType::RouteMatch);
    assert_eq!(inbox[0].related_object_id, Some(recorded.id));
    assert_eq!(inbox[0].related_object_type.as_deref(), Some("route_match"));
}

#[tokio::test]
async fn scores_outside_zero_to_hundred_are_rejected() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KCB 100B").await;
    let route = app.route(owner.id, truck.id, 3).await;
    let cargo = app.cargo(business.id, dec!(2), dec!(5)).await;

    for score in [dec!(-1), dec!(100.5)] {
        let err = app
            .services
            .matching
            .record_match(match_input(cargo.id, route.id, score))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
    assert!(app.services.matching.matches_for_cargo(cargo.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn departed_routes_cannot_be_matched() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KCB 100B").await;
    let route = app.route(owner.id, truck.id, -2).await;
    let cargo = app.cargo(business.id, dec!(2), dec!(5)).await;

    let err = app
        .services
        .matching
        .record_match(match_input(cargo.id, route.id, dec!(60)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn candidates_come_best_score_first() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let cargo = app.cargo(business.id, dec!(2), dec!(5)).await;

    let mut routes = Vec::new();
    for (i, plate) in ["KCC 001C", "KCC 002C", "KCC 003C"].iter().enumerate() {
        let truck = app.truck(owner.id, plate).await;
        routes.push(app.route(owner.id, truck.id, 2 + i as i64).await);
    }
    let low = app.record_match(cargo.id, routes[0].id, dec!(40)).await;
    let high = app.record_match(cargo.id, routes[1].id, dec!(92.5)).await;
    let mid = app.record_match(cargo.id, routes[2].id, dec!(71)).await;

    let ids: Vec<i64> = app
        .services
        .matching
        .candidates_for_cargo(cargo.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(ids, vec![high.id, mid.id, low.id]);

    app.services.matching.reject_match(mid.id, owner.id).await.unwrap();
    assert_eq!(app.services.matching.candidates_for_cargo(cargo.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn accepting_expires_siblings_and_blocks_a_second_acceptance() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let first_truck = app.truck(owner.id, "KCD 001D").await;
    let second_truck = app.truck(owner.id, "KCD 002D").await;
    let first_route = app.route(owner.id, first_truck.id, 2).await;
    let second_route = app.route(owner.id, second_truck.id, 4).await;
    let cargo = app.cargo(business.id, dec!(3), dec!(9)).await;

    let chosen = app.record_match(cargo.id, first_route.id, dec!(90)).await;
    let sibling = app.record_match(cargo.id, second_route.id, dec!(80)).await;

    let booking = app
        .services
        .matching
        .accept_match(
            chosen.id,
            business.id,
            BookingTerms {
                price: Some(dec!(35000)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(booking.route_match_id, Some(chosen.id));
    assert_eq!(booking.price, dec!(35000));
    assert_eq!(booking.pickup_date, first_route.departure_date);
    assert_eq!(booking.estimated_delivery_date, first_route.estimated_arrival_date);

    let sibling = app.services.matching.get_match(sibling.id).await.unwrap();
    assert_eq!(sibling.status, MatchStatus::Expired);

    let err = app
        .services
        .matching
        .accept_match(sibling.id, owner.id, BookingTerms::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidTransition { .. });

    let accepted = route_match::Entity::find()
        .filter(route_match::Column::CargoId.eq(cargo.id))
        .filter(route_match::Column::Status.eq(MatchStatus::Accepted))
        .count(&*app.db)
        .await
        .unwrap();
    assert_eq!(accepted, 1);

    let listing = app.services.cargo.get_listing(cargo.id).await.unwrap();
    assert_eq!(listing.status, CargoStatus::Booked);
    assert!(app.services.cargo.cancel_listing(cargo.id, business.id).await.is_err());
}

#[tokio::test]
async fn over_capacity_acceptance_leaves_nothing_behind() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KCE 001E").await;
    let route = app.route(owner.id, truck.id, 2).await;
    let first = app.cargo(business.id, dec!(8), dec!(10)).await;
    let second = app.cargo(business.id, dec!(8), dec!(10)).await;

    let first_match = app.record_match(first.id, route.id, dec!(70)).await;
    let second_match = app.record_match(second.id, route.id, dec!(70)).await;

    app.services
        .matching
        .accept_match(first_match.id, owner.id, BookingTerms::default())
        .await
        .unwrap();

    let err = app
        .services
        .matching
        .accept_match(second_match.id, owner.id, BookingTerms::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientCapacity(_));

    let second_match = app.services.matching.get_match(second_match.id).await.unwrap();
    assert_eq!(second_match.status, MatchStatus::Pending);
    let second = app.services.cargo.get_listing(second.id).await.unwrap();
    assert_eq!(second.status, CargoStatus::Active);

    let route = app.services.routes.get_route(route.id).await.unwrap();
    assert_eq!(route.available_capacity_weight, dec!(2));
    assert_eq!(app.services.bookings.bookings_for_user(business.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_acceptances_never_oversell_a_route() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KCF 001F").await;
    let route = app.route(owner.id, truck.id, 2).await;

    let mut match_ids = Vec::new();
    for _ in 0..5 {
        let cargo = app.cargo(business.id, dec!(3), dec!(5)).await;
        match_ids.push(app.record_match(cargo.id, route.id, dec!(50)).await.id);
    }

    let mut tasks = Vec::new();
    for match_id in match_ids {
        let matching = app.services.matching.clone();
        let actor = owner.id;
        tasks.push(tokio::spawn(async move {
            matching
                .accept_match(match_id, actor, BookingTerms::default())
                .await
                .is_ok()
        }));
    }
    let mut accepted = 0;
    for task in tasks {
        if task.await.unwrap_or(false) {
            accepted += 1;
        }
    }

    assert_eq!(accepted, 3, "10 t of capacity fits three 3 t loads");
    let route = app.services.routes.get_route(route.id).await.unwrap();
    assert_eq!(route.available_capacity_weight, dec!(1));
}

#[tokio::test]
async fn stale_matches_expire_once_the_route_departs() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KCG 001G").await;
    let route = app.route(owner.id, truck.id, 2).await;
    let cargo = app.cargo(business.id, dec!(2), dec!(4)).await;
    let pending = app.record_match(cargo.id, route.id, dec!(66)).await;

    assert_eq!(app.services.matching.expire_stale_matches(Utc::now()).await.unwrap(), 0);

    let later = Utc::now() + Duration::days(5);
    assert_eq!(app.services.matching.expire_stale_matches(later).await.unwrap(), 1);
    assert_eq!(
        app.services.matching.get_match(pending.id).await.unwrap().status,
        MatchStatus::Expired
    );
    assert_eq!(app.services.matching.expire_stale_matches(later).await.unwrap(), 0);
}

#[tokio::test]
async fn closing_a_route_expires_its_pending_matches() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KCH 001H").await;
    let route = app.route(owner.id, truck.id, 2).await;
    let cargo = app.cargo(business.id, dec!(2), dec!(4)).await;
    let pending = app.record_match(cargo.id, route.id, dec!(66)).await;

    let err = app
        .services
        .routes
        .transition_route(route.id, business.id, RouteStatus::Cancelled)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let closed = app
        .services
        .routes
        .transition_route(route.id, owner.id, RouteStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(closed.status, RouteStatus::Cancelled);
    assert_eq!(
        app.services.matching.get_match(pending.id).await.unwrap().status,
        MatchStatus::Expired
    );
    assert!(app
        .services
        .routes
        .active_routes(common::today_plus(0))
        .await
        .unwrap()
        .is_empty());
}
