use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::errors::ServiceError;
use crate::models::business_document::{self, BusinessDocumentType};
use crate::models::notification::NotificationType;
use crate::models::truck;
use crate::models::truck_document::{self, TruckDocumentType};
use crate::models::user::{self, UserType};
use crate::models::user_verification::{self, VerificationStatus};
use crate::services::{load_user, notifications};
use crate::state_machine::ensure_transition;

/// Document types a user of the given type needs verified before trading.
pub fn required_business_documents(user_type: UserType) -> &'static [BusinessDocumentType] {
    match user_type {
        UserType::Business => &[
            BusinessDocumentType::BusinessRegistration,
            BusinessDocumentType::IdDocument,
        ],
        UserType::TruckOwner => &[BusinessDocumentType::IdDocument],
        UserType::Admin => &[],
    }
}

pub const REQUIRED_TRUCK_DOCUMENTS: &[TruckDocumentType] = &[
    TruckDocumentType::License,
    TruckDocumentType::Insurance,
    TruckDocumentType::Roadworthy,
];

/// Outcome of the trading-readiness rule: the moderator flag plus every
/// required document type verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Readiness {
    pub approved: bool,
    pub missing_documents: Vec<String>,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.approved && self.missing_documents.is_empty()
    }
}

fn missing<T: Copy + Eq + std::hash::Hash + ToString>(
    required: &[T],
    verified: &HashSet<T>,
) -> Vec<String> {
    required
        .iter()
        .filter(|t| !verified.contains(t))
        .map(|t| t.to_string())
        .collect()
}

#[derive(Clone)]
pub struct VerificationService {
    db: Arc<DatabaseConnection>,
}

impl VerificationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, document))]
    pub async fn upload_business_document(
        &self,
        user_id: i64,
        document_type: BusinessDocumentType,
        document: &str,
        notes: Option<String>,
    ) -> Result<business_document::Model, ServiceError> {
        load_user(&*self.db, user_id).await?;
        if document.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "document reference is required".to_string(),
            ));
        }

        let record = business_document::ActiveModel {
            user_id: Set(user_id),
            document_type: Set(document_type),
            document: Set(document.to_string()),
            is_verified: Set(false),
            notes: Set(notes),
            uploaded_at: Set(Utc::now()),
            verified_at: Set(None),
            ..Default::default()
        };
        let created = record.insert(&*self.db).await.map_err(|e| {
            error!("Failed to store business document: {}", e);
            ServiceError::DatabaseError(e)
        })?;
        info!(document_id = created.id, "Business document uploaded");
        Ok(created)
    }

    /// Marks a business document verified and stamps `verified_at`. The
    /// owner's `is_verified` flag is left alone.
    #[instrument(skip(self))]
    pub async fn verify_business_document(
        &self,
        document_id: i64,
        moderator_id: i64,
    ) -> Result<business_document::Model, ServiceError> {
        self.require_moderator(moderator_id).await?;
        let found = business_document::Entity::find_by_id(document_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Business document", document_id))?;

        if found.is_verified {
            return Err(ServiceError::InvalidOperation(format!(
                "business document {} is already verified",
                document_id
            )));
        }

        let mut active: business_document::ActiveModel = found.into();
        active.is_verified = Set(true);
        active.verified_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }

    #[instrument(skip(self, document))]
    pub async fn upload_truck_document(
        &self,
        truck_id: i64,
        document_type: TruckDocumentType,
        document: &str,
    ) -> Result<truck_document::Model, ServiceError> {
        truck::Entity::find_by_id(truck_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck", truck_id))?;
        if document.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "document reference is required".to_string(),
            ));
        }

        let record = truck_document::ActiveModel {
            truck_id: Set(truck_id),
            document_type: Set(document_type),
            document: Set(document.to_string()),
            is_verified: Set(false),
            uploaded_at: Set(Utc::now()),
            verified_at: Set(None),
            ..Default::default()
        };
        Ok(record.insert(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn verify_truck_document(
        &self,
        document_id: i64,
        moderator_id: i64,
    ) -> Result<truck_document::Model, ServiceError> {
        self.require_moderator(moderator_id).await?;
        let found = truck_document::Entity::find_by_id(document_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck document", document_id))?;

        if found.is_verified {
            return Err(ServiceError::InvalidOperation(format!(
                "truck document {} is already verified",
                document_id
            )));
        }

        let mut active: truck_document::ActiveModel = found.into();
        active.is_verified = Set(true);
        active.verified_at = Set(Some(Utc::now()));
        Ok(active.update(&*self.db).await?)
    }

    /// Opens a verification request. Only one may be pending per user.
    #[instrument(skip(self, notes))]
    pub async fn request_user_verification(
        &self,
        user_id: i64,
        notes: Option<String>,
    ) -> Result<user_verification::Model, ServiceError> {
        let subject = load_user(&*self.db, user_id).await?;
        if subject.is_verified {
            return Err(ServiceError::InvalidOperation(format!(
                "user {} is already verified",
                user_id
            )));
        }

        let open = user_verification::Entity::find()
            .filter(user_verification::Column::UserId.eq(user_id))
            .filter(user_verification::Column::Status.eq(VerificationStatus::Pending))
            .one(&*self.db)
            .await?;
        if open.is_some() {
            return Err(ServiceError::Conflict(format!(
                "user {} already has a pending verification request",
                user_id
            )));
        }

        let now = Utc::now();
        let record = user_verification::ActiveModel {
            user_id: Set(user_id),
            status: Set(VerificationStatus::Pending),
            verified_by: Set(None),
            notes: Set(notes),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        Ok(record.insert(&*self.db).await?)
    }

    /// Approves or rejects a pending request. Approval sets the subject's
    /// `is_verified` flag in the same transaction.
    #[instrument(skip(self, notes))]
    pub async fn decide_user_verification(
        &self,
        verification_id: i64,
        verifier_id: i64,
        approve: bool,
        notes: Option<String>,
    ) -> Result<user_verification::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let verifier = load_user(&txn, verifier_id).await?;
        if !(verifier.is_admin() || verifier.is_staff) {
            warn!(verifier_id, "Non-moderator attempted a verification decision");
            return Err(ServiceError::Forbidden(format!(
                "user {} may not decide verification requests",
                verifier_id
            )));
        }

        let request = user_verification::Entity::find_by_id(verification_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Verification", verification_id))?;

        let target = if approve {
            VerificationStatus::Approved
        } else {
            VerificationStatus::Rejected
        };
        ensure_transition(request.status, target)?;

        let now = Utc::now();
        let subject_id = request.user_id;
        let mut active: user_verification::ActiveModel = request.into();
        active.status = Set(target);
        active.verified_by = Set(Some(verifier_id));
        if notes.is_some() {
            active.notes = Set(notes);
        }
        active.updated_at = Set(now);
        let decided = active.update(&txn).await?;

        if approve {
            user::Entity::update_many()
                .col_expr(user::Column::IsVerified, Expr::value(true))
                .col_expr(user::Column::UpdatedAt, Expr::value(now))
                .filter(user::Column::Id.eq(subject_id))
                .exec(&txn)
                .await?;
        }

        notifications::push(
            &txn,
            subject_id,
            NotificationType::System,
            "Account verification",
            format!("Your verification request was {}.", target),
            None,
        )
        .await?;

        txn.commit().await?;
        info!(verification_id, status = %target, "Verification decided");
        Ok(decided)
    }

    /// Sets the moderator-controlled verification flag on a truck.
    #[instrument(skip(self))]
    pub async fn set_truck_verified(
        &self,
        truck_id: i64,
        moderator_id: i64,
        verified: bool,
    ) -> Result<truck::Model, ServiceError> {
        self.require_moderator(moderator_id).await?;
        let found = truck::Entity::find_by_id(truck_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck", truck_id))?;

        let mut active: truck::ActiveModel = found.into();
        active.is_verified = Set(verified);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    pub async fn verification_history(
        &self,
        user_id: i64,
    ) -> Result<Vec<user_verification::Model>, ServiceError> {
        Ok(user_verification::Entity::find()
            .filter(user_verification::Column::UserId.eq(user_id))
            .order_by_asc(user_verification::Column::CreatedAt)
            .order_by_asc(user_verification::Column::Id)
            .all(&*self.db)
            .await?)
    }

    pub async fn user_readiness(&self, user_id: i64) -> Result<Readiness, ServiceError> {
        let subject = load_user(&*self.db, user_id).await?;
        let verified: HashSet<BusinessDocumentType> = business_document::Entity::find()
            .filter(business_document::Column::UserId.eq(user_id))
            .filter(business_document::Column::IsVerified.eq(true))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|d| d.document_type)
            .collect();

        Ok(Readiness {
            approved: subject.is_verified,
            missing_documents: missing(required_business_documents(subject.user_type), &verified),
        })
    }

    pub async fn truck_readiness(&self, truck_id: i64) -> Result<Readiness, ServiceError> {
        let found = truck::Entity::find_by_id(truck_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Truck", truck_id))?;
        let verified: HashSet<TruckDocumentType> = truck_document::Entity::find()
            .filter(truck_document::Column::TruckId.eq(truck_id))
            .filter(truck_document::Column::IsVerified.eq(true))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|d| d.document_type)
            .collect();

        Ok(Readiness {
            approved: found.is_verified,
            missing_documents: missing(REQUIRED_TRUCK_DOCUMENTS, &verified),
        })
    }

    pub async fn is_user_ready_to_trade(&self, user_id: i64) -> Result<bool, ServiceError> {
        Ok(self.user_readiness(user_id).await?.is_ready())
    }

    pub async fn is_truck_ready_to_trade(&self, truck_id: i64) -> Result<bool, ServiceError> {
        Ok(self.truck_readiness(truck_id).await?.is_ready())
    }

    async fn require_moderator(&self, moderator_id: i64) -> Result<user::Model, ServiceError> {
        let moderator = load_user(&*self.db, moderator_id).await?;
        if moderator.is_admin() || moderator.is_staff {
            Ok(moderator)
        } else {
            Err(ServiceError::Forbidden(format!(
                "user {} is not a moderator",
                moderator_id
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_users_need_registration_and_id() {
        let verified: HashSet<_> = [BusinessDocumentType::IdDocument].into_iter().collect();
        assert_eq!(
            missing(required_business_documents(UserType::Business), &verified),
            vec!["business_registration".to_string()]
        );
        assert!(missing(required_business_documents(UserType::TruckOwner), &verified).is_empty());
    }

    #[test]
    fn readiness_requires_flag_and_documents() {
        let ready = Readiness { approved: true, missing_documents: vec![] };
        let unapproved = Readiness { approved: false, missing_documents: vec![] };
        let incomplete = Readiness {
            approved: true,
            missing_documents: vec!["insurance".to_string()],
        };
        assert!(ready.is_ready());
        assert!(!unapproved.is_ready());
        assert!(!incomplete.is_ready());
    }
}
