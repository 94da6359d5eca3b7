// Identity
pub mod business_document;
pub mod user;
pub mod user_verification;

// Fleet
pub mod truck;
pub mod truck_document;
pub mod truck_photo;

// Catalogs
pub mod cargo_listing;
pub mod cargo_photo;
pub mod route;

// Matching and bookings
pub mod booking;
pub mod booking_status_update;
pub mod route_match;

// Payments
pub mod mpesa_callback;
pub mod payment;

// Engagement
pub mod api_key;
pub mod notification;
pub mod review;

pub use api_key::ApiKeyStatus;
pub use booking::BookingStatus;
pub use business_document::BusinessDocumentType;
pub use cargo_listing::{CargoStatus, CargoType};
pub use notification::{NotificationType, RelatedObject};
pub use payment::{PaymentStatus, PaymentType};
pub use route::RouteStatus;
pub use route_match::MatchStatus;
pub use truck::TruckType;
pub use truck_document::TruckDocumentType;
pub use user::UserType;
pub use user_verification::VerificationStatus;

pub use booking::Model as Booking;
pub use booking_status_update::Model as BookingStatusUpdate;
pub use cargo_listing::Model as CargoListing;
pub use payment::Model as Payment;
pub use route::Model as Route;
pub use route_match::Model as RouteMatch;
pub use truck::Model as Truck;
pub use user::Model as User;
