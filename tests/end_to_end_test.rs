mod common;

use chrono::Utc;
use rust_decimal_macros::dec;

use common::TestApp;
use freightlink::models::{BookingStatus, CargoStatus, MatchStatus, PaymentStatus, PaymentType};
use freightlink::services::matching::BookingTerms;
use freightlink::services::payments::RecordPaymentInput;

#[tokio::test]
async fn cargo_to_paid_booking() {
    let app = TestApp::new().await;
    let a = app.business("+254711000001").await;
    let b = app.truck_owner("+254722000001").await;

    let listing = app.cargo(a.id, dec!(5), dec!(14)).await;
    let truck = app.truck(b.id, "KDC 123C").await;
    let route = app.route(b.id, truck.id, 2).await;

    let m = app.record_match(listing.id, route.id, dec!(87.50)).await;
    assert_eq!(m.match_score, dec!(87.5));

    let booking = app
        .services
        .matching
        .accept_match(m.id, a.id, BookingTerms::default())
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(
        (booking.cargo_listing_id, booking.route_id, booking.business_id, booking.truck_owner_id),
        (listing.id, route.id, a.id, b.id)
    );
    assert_eq!(
        app.services.matching.get_match(m.id).await.unwrap().status,
        MatchStatus::Accepted
    );
    assert_eq!(
        app.services.cargo.get_listing(listing.id).await.unwrap().status,
        CargoStatus::Booked
    );

    let approved = app.services.bookings.approve(booking.id, b.id, None).await.unwrap();
    assert_eq!(approved.status, BookingStatus::Approved);

    let newest = app.services.bookings.status_trail(booking.id).await.unwrap();
    assert_eq!(newest[0].status, BookingStatus::Approved);
    assert_eq!(newest[0].updated_by, b.id);

    let payment = app
        .services
        .payments
        .record_payment(RecordPaymentInput {
            booking_id: booking.id,
            payer_id: a.id,
            receiver_id: b.id,
            amount: approved.price,
            payment_type: PaymentType::Booking,
            notes: None,
        })
        .await
        .unwrap();
    let paid = app
        .services
        .payments
        .complete_payment(payment.id, Some("RKT45PLM2Q".to_string()), Utc::now())
        .await
        .unwrap();
    assert_eq!(paid.status, PaymentStatus::Completed);
    assert_eq!(paid.payment_type, PaymentType::Booking);

    let recorded = app.services.payments.payments_for_booking(booking.id).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].status, PaymentStatus::Completed);
    assert_eq!(
        app.services.payments.amount_settled(booking.id).await.unwrap(),
        approved.price
    );

    app.services.bookings.verify_audit_trail(booking.id).await.unwrap();
}
