use std::sync::Arc;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use metrics::counter;
use regex::Regex;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::user::{self, UserType};
use crate::services::load_user;

lazy_static! {
    pub static ref PHONE_RE: Regex = Regex::new(r"^\+?1?\d{9,15}$").unwrap();
}

/// Registration data for a new marketplace account.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterUserInput {
    #[validate(regex(path = "PHONE_RE", message = "phone number must be 9 to 15 digits"))]
    pub phone_number: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: Option<String>,
    #[validate(length(min = 1, max = 150))]
    pub first_name: String,
    #[validate(length(max = 150))]
    pub last_name: String,
    pub user_type: UserType,
    #[validate(length(max = 255))]
    pub company_name: Option<String>,
    #[validate(length(max = 100))]
    pub business_registration_number: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

impl RegisterUserInput {
    pub fn new(
        phone_number: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        user_type: UserType,
    ) -> Self {
        Self {
            phone_number: phone_number.into(),
            email: None,
            password: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            user_type,
            company_name: None,
            business_registration_number: None,
            city: None,
            country: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateProfileInput {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 255))]
    pub company_name: Option<String>,
    pub bio: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
    pub profile_picture: Option<String>,
}

/// Drops spaces and common separators and rewrites a `00` international
/// prefix as `+`, so one number has one stored form.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.' | '(' | ')'))
        .collect();
    match digits.strip_prefix("00") {
        Some(rest) => format!("+{}", rest),
        None => digits,
    }
}

/// Lowercases the domain part of an address and trims surrounding space.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim();
    match email.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_lowercase()),
        None => email.to_string(),
    }
}

pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::HashError(e.to_string()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
}

impl AccountService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Creates a regular account. Phone numbers are the login identifier and
    /// must be unique.
    #[instrument(skip(self, input), fields(phone = %input.phone_number))]
    pub async fn register(
        &self,
        mut input: RegisterUserInput,
    ) -> Result<user::Model, ServiceError> {
        input.phone_number = normalize_phone(&input.phone_number);
        input.validate()?;
        self.insert_user(input, false).await
    }

    /// Creates an administrator with staff, superuser and verified flags set.
    #[instrument(skip(self, password))]
    pub async fn create_superuser(
        &self,
        phone_number: &str,
        password: &str,
        email: Option<String>,
    ) -> Result<user::Model, ServiceError> {
        let mut input =
            RegisterUserInput::new(normalize_phone(phone_number), "Admin", "", UserType::Admin);
        input.password = Some(password.to_string());
        input.email = email;
        input.validate()?;
        self.insert_user(input, true).await
    }

    async fn insert_user(
        &self,
        input: RegisterUserInput,
        superuser: bool,
    ) -> Result<user::Model, ServiceError> {
        let db = &*self.db;

        let existing = user::Entity::find()
            .filter(user::Column::PhoneNumber.eq(input.phone_number.as_str()))
            .one(db)
            .await?;
        if existing.is_some() {
            warn!("Phone number already registered");
            return Err(ServiceError::Conflict(format!(
                "phone number {} is already registered",
                input.phone_number
            )));
        }

        let password_hash = input.password.as_deref().map(hash_password).transpose()?;
        let now = Utc::now();
        let user_type = if superuser { UserType::Admin } else { input.user_type };

        let record = user::ActiveModel {
            phone_number: Set(input.phone_number.clone()),
            email: Set(input.email.as_deref().map(normalize_email)),
            password_hash: Set(password_hash),
            first_name: Set(input.first_name),
            last_name: Set(input.last_name),
            user_type: Set(user_type),
            company_name: Set(input.company_name),
            business_registration_number: Set(input.business_registration_number),
            city: Set(input.city),
            country: Set(input.country),
            is_verified: Set(superuser),
            is_staff: Set(superuser),
            is_superuser: Set(superuser),
            is_active: Set(true),
            email_notifications: Set(true),
            sms_notifications: Set(true),
            average_rating: Set(Decimal::ZERO),
            total_reviews: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        let phone = input.phone_number;
        let created = record.insert(db).await.map_err(|e| {
            error!("Failed to create user: {}", e);
            ServiceError::from_write(e, || format!("phone number {} is already registered", phone))
        })?;

        counter!("freightlink.users.created", 1);
        info!(user_id = created.id, user_type = %created.user_type, "User created");
        Ok(created)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<user::Model, ServiceError> {
        load_user(&*self.db, user_id).await
    }

    pub async fn find_by_phone(
        &self,
        phone_number: &str,
    ) -> Result<Option<user::Model>, ServiceError> {
        Ok(user::Entity::find()
            .filter(user::Column::PhoneNumber.eq(normalize_phone(phone_number)))
            .one(&*self.db)
            .await?)
    }

    /// Checks a phone/password pair. Inactive accounts and accounts without a
    /// password never authenticate.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        phone_number: &str,
        password: &str,
    ) -> Result<user::Model, ServiceError> {
        let denied = || ServiceError::Unauthorized("invalid phone number or password".to_string());

        let found = self.find_by_phone(phone_number).await?.ok_or_else(denied)?;
        let hash = found.password_hash.as_deref().ok_or_else(denied)?;

        if !found.is_active || !verify_password(password, hash) {
            warn!(user_id = found.id, "Authentication failed");
            return Err(denied());
        }
        Ok(found)
    }

    #[instrument(skip(self, input))]
    pub async fn update_profile(
        &self,
        user_id: i64,
        input: UpdateProfileInput,
    ) -> Result<user::Model, ServiceError> {
        input.validate()?;
        let found = load_user(&*self.db, user_id).await?;

        let mut active: user::ActiveModel = found.into();
        if let Some(email) = input.email.as_deref() {
            active.email = Set(Some(normalize_email(email)));
        }
        if input.company_name.is_some() {
            active.company_name = Set(input.company_name);
        }
        if input.bio.is_some() {
            active.bio = Set(input.bio);
        }
        if input.address.is_some() {
            active.address = Set(input.address);
        }
        if input.city.is_some() {
            active.city = Set(input.city);
        }
        if input.country.is_some() {
            active.country = Set(input.country);
        }
        if input.latitude.is_some() {
            active.latitude = Set(input.latitude);
        }
        if input.longitude.is_some() {
            active.longitude = Set(input.longitude);
        }
        if input.profile_picture.is_some() {
            active.profile_picture = Set(input.profile_picture);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    pub async fn set_notification_preferences(
        &self,
        user_id: i64,
        email: bool,
        sms: bool,
    ) -> Result<user::Model, ServiceError> {
        let found = load_user(&*self.db, user_id).await?;
        let mut active: user::ActiveModel = found.into();
        active.email_notifications = Set(email);
        active.sms_notifications = Set(sms);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn touch_last_online(
        &self,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let found = load_user(&*self.db, user_id).await?;
        let mut active: user::ActiveModel = found.into();
        active.last_online = Set(Some(at));
        active.update(&*self.db).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn deactivate(&self, user_id: i64) -> Result<user::Model, ServiceError> {
        let found = load_user(&*self.db, user_id).await?;
        let mut active: user::ActiveModel = found.into();
        active.is_active = Set(false);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;
        info!(user_id, "User deactivated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("+254712345678", true)]
    #[case("0712345678", true)]
    #[case("712345678", true)]
    #[case("12345678", false)]
    #[case("+2547123456789012", false)]
    #[case("07123-45678", false)]
    #[case("", false)]
    fn phone_format(#[case] phone: &str, #[case] valid: bool) {
        assert_eq!(PHONE_RE.is_match(phone), valid);
    }

    #[test]
    fn invalid_phone_fails_validation() {
        let input = RegisterUserInput::new("not-a-phone", "Jane", "Doe", UserType::Business);
        assert!(input.validate().is_err());
    }

    #[rstest]
    #[case("+254 712 345 678", "+254712345678")]
    #[case("00254-712-345-678", "+254712345678")]
    #[case(" (0712) 345.678 ", "0712345678")]
    #[case("+254712345678", "+254712345678")]
    fn phone_is_normalized(#[case] raw: &str, #[case] stored: &str) {
        assert_eq!(normalize_phone(raw), stored);
    }

    #[test]
    fn email_domain_is_lowercased() {
        assert_eq!(normalize_email(" Jane.Doe@Example.CO.KE "), "Jane.Doe@example.co.ke");
        assert_eq!(normalize_email("no-at-sign"), "no-at-sign");
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-phc-string"));
    }
}
