mod common;

use assert_matches::assert_matches;
use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;

use common::TestApp;
use freightlink::errors::ServiceError;
use freightlink::models::{
    booking, mpesa_callback, payment, NotificationType, PaymentStatus, PaymentType,
};
use freightlink::services::mpesa::CallbackDisposition;
use freightlink::services::payments::RecordPaymentInput;

const CHECKOUT_ID: &str = "ws_CO_191220191020363925";

struct Settlement {
    app: TestApp,
    booking: booking::Model,
}

/// An approved booking between a business and a truck owner.
async fn approved_booking() -> Settlement {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KDA 001A").await;
    let route = app.route(owner.id, truck.id, 2).await;
    let cargo = app.cargo(business.id, dec!(2), dec!(6)).await;
    let booking = app.accepted_booking(cargo.id, route.id, business.id).await;
    let booking = app
        .services
        .bookings
        .approve(booking.id, owner.id, None)
        .await
        .unwrap();
    Settlement { app, booking }
}

fn booking_payment(b: &booking::Model, amount: rust_decimal::Decimal) -> RecordPaymentInput {
    RecordPaymentInput {
        booking_id: b.id,
        payer_id: b.business_id,
        receiver_id: b.truck_owner_id,
        amount,
        payment_type: PaymentType::Booking,
        notes: None,
    }
}

fn stk_callback(merchant_id: &str, checkout_id: &str, result_code: i64) -> String {
    let body = if result_code == 0 {
        json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": merchant_id,
                "CheckoutRequestID": checkout_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {"Item": [
                    {"Name": "Amount", "Value": 1500},
                    {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                    {"Name": "TransactionDate", "Value": 20191219102115u64},
                    {"Name": "PhoneNumber", "Value": 254708374149u64}
                ]}
            }}
        })
    } else {
        json!({
            "Body": {"stkCallback": {
                "MerchantRequestID": merchant_id,
                "CheckoutRequestID": checkout_id,
                "ResultCode": result_code,
                "ResultDesc": "Request cancelled by user"
            }}
        })
    };
    body.to_string()
}

#[tokio::test]
async fn payments_run_between_the_booking_parties() {
    let s = approved_booking().await;
    let payments = &s.app.services.payments;

    let mut wrong_way = booking_payment(&s.booking, dec!(1500));
    std::mem::swap(&mut wrong_way.payer_id, &mut wrong_way.receiver_id);
    assert_matches!(
        payments.record_payment(wrong_way).await,
        Err(ServiceError::ValidationError(_))
    );

    assert_matches!(
        payments.record_payment(booking_payment(&s.booking, dec!(0))).await,
        Err(ServiceError::ValidationError(_))
    );

    let recorded = payments
        .record_payment(booking_payment(&s.booking, dec!(1500)))
        .await
        .unwrap();
    assert_eq!(recorded.status, PaymentStatus::Pending);
    assert_eq!(recorded.transaction_id, None);
}

#[tokio::test]
async fn pending_bookings_cannot_take_payments() {
    let app = TestApp::new().await;
    let business = app.business("+254711000001").await;
    let owner = app.truck_owner("+254722000001").await;
    let truck = app.truck(owner.id, "KDA 001A").await;
    let route = app.route(owner.id, truck.id, 2).await;
    let cargo = app.cargo(business.id, dec!(2), dec!(6)).await;
    let pending = app.accepted_booking(cargo.id, route.id, business.id).await;

    let err = app
        .services
        .payments
        .record_payment(booking_payment(&pending, dec!(1500)))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn successful_callback_completes_the_payment_once() {
    let s = approved_booking().await;
    let payments = &s.app.services.payments;
    let recorded = payments
        .record_payment(booking_payment(&s.booking, dec!(1500)))
        .await
        .unwrap();
    let processing = payments.mark_processing(recorded.id, CHECKOUT_ID).await.unwrap();
    assert_eq!(processing.status, PaymentStatus::Processing);
    assert_eq!(processing.transaction_id.as_deref(), Some(CHECKOUT_ID));

    let raw = stk_callback("29115-34620561-1", CHECKOUT_ID, 0);
    let first = s.app.services.mpesa.ingest_callback(&raw).await.unwrap();
    let completed = assert_matches!(first.disposition, CallbackDisposition::Completed(p) => p);
    assert_eq!(completed.status, PaymentStatus::Completed);
    assert_eq!(completed.mpesa_receipt.as_deref(), Some("NLJ7RT61SV"));
    assert_eq!(
        completed.payment_date,
        Some(Utc.with_ymd_and_hms(2019, 12, 19, 7, 21, 15).unwrap())
    );
    assert_eq!(first.callback.payment_id, Some(recorded.id));
    assert_eq!(first.callback.raw_response, raw);

    let replay = s.app.services.mpesa.ingest_callback(&raw).await.unwrap();
    assert_eq!(replay.disposition, CallbackDisposition::Duplicate);
    assert_eq!(replay.callback.id, first.callback.id);

    let stored = mpesa_callback::Entity::find().count(&*s.app.db).await.unwrap();
    assert_eq!(stored, 1);
    assert_eq!(
        s.app.services.mpesa.callbacks_for_payment(recorded.id).await.unwrap().len(),
        1
    );
    assert_eq!(payments.amount_settled(s.booking.id).await.unwrap(), dec!(1500));

    let receiver_inbox = s
        .app
        .services
        .notifications
        .list_for_user(s.booking.truck_owner_id)
        .await
        .unwrap();
    assert!(receiver_inbox
        .iter()
        .any(|n| n.notification_type == NotificationType::Payment
            && n.related_object_id == Some(recorded.id)));
}

#[tokio::test]
async fn settled_payments_ignore_later_callbacks() {
    let s = approved_booking().await;
    let payments = &s.app.services.payments;
    let recorded = payments
        .record_payment(booking_payment(&s.booking, dec!(1500)))
        .await
        .unwrap();
    payments.mark_processing(recorded.id, CHECKOUT_ID).await.unwrap();

    let cancelled = stk_callback("29115-34620561-1", CHECKOUT_ID, 1032);
    let outcome = s.app.services.mpesa.ingest_callback(&cancelled).await.unwrap();
    let failed = assert_matches!(outcome.disposition, CallbackDisposition::Failed(p) => p);
    assert_eq!(failed.status, PaymentStatus::Failed);
    assert_eq!(failed.notes.as_deref(), Some("Request cancelled by user"));

    // a different delivery claiming success for the same checkout
    let late = stk_callback("29115-34620561-2", CHECKOUT_ID, 0);
    let outcome = s.app.services.mpesa.ingest_callback(&late).await.unwrap();
    assert_matches!(outcome.disposition, CallbackDisposition::AlreadySettled(_));

    let current = payments.get_payment(recorded.id).await.unwrap();
    assert_eq!(current.status, PaymentStatus::Failed);
    assert_eq!(current.mpesa_receipt, None);
    assert_eq!(
        s.app.services.mpesa.callbacks_for_payment(recorded.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn malformed_and_unmatched_payloads_are_kept() {
    let s = approved_booking().await;
    let mpesa = &s.app.services.mpesa;

    let garbage = "{\"Body\": not json";
    let first = mpesa.ingest_callback(garbage).await.unwrap();
    assert_eq!(first.disposition, CallbackDisposition::Malformed);
    assert!(first.callback.parse_error.is_some());
    assert_eq!(first.callback.checkout_request_id, None);
    assert_eq!(first.callback.raw_response, garbage);

    let again = mpesa.ingest_callback(garbage).await.unwrap();
    assert_eq!(again.disposition, CallbackDisposition::Duplicate);
    assert_eq!(again.callback.id, first.callback.id);

    let stray = stk_callback("1-2-3", "ws_CO_unknown", 0);
    let unmatched = mpesa.ingest_callback(&stray).await.unwrap();
    assert_eq!(unmatched.disposition, CallbackDisposition::Unmatched);
    assert_eq!(unmatched.callback.payment_id, None);

    let stored = mpesa_callback::Entity::find().count(&*s.app.db).await.unwrap();
    assert_eq!(stored, 2);
}

#[tokio::test]
async fn racing_deliveries_of_one_malformed_body_store_it_once() {
    let app = TestApp::new().await;
    let garbage = "<html>502 Bad Gateway</html>";

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let mpesa = app.services.mpesa.clone();
        tasks.push(tokio::spawn(async move {
            mpesa.ingest_callback(garbage).await.map(|o| o.disposition)
        }));
    }
    let mut malformed = 0;
    let mut duplicates = 0;
    for task in tasks {
        match task.await.unwrap().unwrap() {
            CallbackDisposition::Malformed => malformed += 1,
            CallbackDisposition::Duplicate => duplicates += 1,
            other => panic!("unexpected disposition {:?}", other),
        }
    }

    assert_eq!((malformed, duplicates), (1, 5));
    let stored = mpesa_callback::Entity::find().count(&*app.db).await.unwrap();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn refunds_only_follow_completed_payments() {
    let s = approved_booking().await;
    let payments = &s.app.services.payments;
    let recorded = payments
        .record_payment(booking_payment(&s.booking, dec!(2500)))
        .await
        .unwrap();

    assert_matches!(
        payments.refund_payment(recorded.id, Some("early")).await,
        Err(ServiceError::InvalidTransition { .. })
    );

    let paid_at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
    let completed = payments
        .complete_payment(recorded.id, Some("QWE123RTY".to_string()), paid_at)
        .await
        .unwrap();
    assert_eq!(completed.payment_date, Some(paid_at));

    assert_matches!(
        payments.fail_payment(recorded.id, "late failure").await,
        Err(ServiceError::InvalidTransition { .. })
    );

    let refunded = payments.refund_payment(recorded.id, Some("Load cancelled")).await.unwrap();
    assert_eq!(refunded.status, PaymentStatus::Refunded);
    assert_matches!(
        payments.refund_payment(recorded.id, None).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_eq!(payments.amount_settled(s.booking.id).await.unwrap(), dec!(0));

    let ledger = payments.payments_for_booking(s.booking.id).await.unwrap();
    assert_eq!(ledger.len(), 2);
    let reversal = &ledger[1];
    assert_eq!(reversal.payment_type, PaymentType::Refund);
    assert_eq!(reversal.status, PaymentStatus::Completed);
    assert_eq!(reversal.amount, dec!(2500));
    assert_eq!(
        (reversal.payer_id, reversal.receiver_id),
        (completed.receiver_id, completed.payer_id)
    );

    let manual = payments
        .record_payment(RecordPaymentInput {
            booking_id: s.booking.id,
            payer_id: s.booking.truck_owner_id,
            receiver_id: s.booking.business_id,
            amount: dec!(500),
            payment_type: PaymentType::Refund,
            notes: Some("Return of deposit".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(manual.payer_id, s.booking.truck_owner_id);

    let all = payment::Entity::find().count(&*s.app.db).await.unwrap();
    assert_eq!(all, 3);
}
