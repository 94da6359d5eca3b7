use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::{info, instrument, warn};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::notification::{self, NotificationType, RelatedObject};
use crate::models::user;

/// Outbound delivery channel for stored notifications.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), ServiceError>;
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), ServiceError>;
}

/// Dispatcher that only writes deliveries to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn send_email(&self, to: &str, subject: &str, _body: &str) -> Result<(), ServiceError> {
        info!(to, subject, "email notification");
        Ok(())
    }

    async fn send_sms(&self, to: &str, body: &str) -> Result<(), ServiceError> {
        info!(to, len = body.len(), "sms notification");
        Ok(())
    }
}

/// Counts from one `dispatch_pending` pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub examined: usize,
    pub emails_sent: usize,
    pub sms_sent: usize,
    pub failures: usize,
}

/// Stores a notification using the caller's connection, so it commits or
/// rolls back with the change that triggered it.
pub(crate) async fn push<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
    notification_type: NotificationType,
    title: impl Into<String>,
    message: impl Into<String>,
    related: Option<RelatedObject>,
) -> Result<notification::Model, ServiceError> {
    let record = notification::ActiveModel {
        user_id: Set(user_id),
        title: Set(title.into()),
        message: Set(message.into()),
        notification_type: Set(notification_type),
        related_object_id: Set(related.map(|r| r.id())),
        related_object_type: Set(related.map(|r| r.kind().to_string())),
        is_read: Set(false),
        email_sent: Set(false),
        sms_sent: Set(false),
        dispatched_at: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    Ok(record.insert(conn).await?)
}

#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    email_enabled: bool,
    sms_enabled: bool,
}

impl NotificationService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            email_enabled: true,
            sms_enabled: true,
        }
    }

    pub fn from_config(db: Arc<DatabaseConnection>, config: &AppConfig) -> Self {
        Self {
            db,
            email_enabled: config.notify_email_enabled,
            sms_enabled: config.notify_sms_enabled,
        }
    }

    #[instrument(skip(self, title, message))]
    pub async fn notify(
        &self,
        user_id: i64,
        notification_type: NotificationType,
        title: &str,
        message: &str,
        related: Option<RelatedObject>,
    ) -> Result<notification::Model, ServiceError> {
        let created = push(
            &*self.db,
            user_id,
            notification_type,
            title,
            message,
            related,
        )
        .await?;
        counter!("freightlink.notifications.created", 1);
        Ok(created)
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<notification::Model>, ServiceError> {
        Ok(notification::Entity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id)
            .all(&*self.db)
            .await?)
    }

    pub async fn unread_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<notification::Model>, ServiceError> {
        Ok(notification::Entity::find()
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .order_by_desc(notification::Column::CreatedAt)
            .order_by_desc(notification::Column::Id)
            .all(&*self.db)
            .await?)
    }

    /// Marks one notification read; only its recipient may do so.
    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        notification_id: i64,
        user_id: i64,
    ) -> Result<notification::Model, ServiceError> {
        let found = notification::Entity::find_by_id(notification_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Notification", notification_id))?;

        if found.user_id != user_id {
            return Err(ServiceError::Forbidden(format!(
                "notification {} belongs to another user",
                notification_id
            )));
        }
        if found.is_read {
            return Ok(found);
        }

        let mut active: notification::ActiveModel = found.into();
        active.is_read = Set(true);
        Ok(active.update(&*self.db).await?)
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, ServiceError> {
        let result = notification::Entity::update_many()
            .col_expr(notification::Column::IsRead, Expr::value(true))
            .filter(notification::Column::UserId.eq(user_id))
            .filter(notification::Column::IsRead.eq(false))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Delivers unsent notifications over the enabled channels.
    ///
    /// A channel is used only when it is enabled in configuration, the user
    /// opted in, and the user has an address for it. A notification leaves
    /// the pending set once every usable channel has delivered; channels that
    /// cannot be used count as settled. Failed deliveries keep it pending for
    /// the next pass.
    #[instrument(skip(self, dispatcher))]
    pub async fn dispatch_pending(
        &self,
        dispatcher: &dyn NotificationDispatcher,
    ) -> Result<DispatchReport, ServiceError> {
        let mut report = DispatchReport::default();

        let pending = notification::Entity::find()
            .filter(notification::Column::DispatchedAt.is_null())
            .find_also_related(user::Entity)
            .order_by_asc(notification::Column::Id)
            .all(&*self.db)
            .await?;

        for (note, recipient) in pending {
            let Some(recipient) = recipient else { continue };
            report.examined += 1;

            let mut email_sent = note.email_sent;
            let mut sms_sent = note.sms_sent;
            let mut outstanding = false;

            let email_to = recipient
                .email
                .as_deref()
                .filter(|_| self.email_enabled && recipient.email_notifications);
            if let (Some(email), false) = (email_to, email_sent) {
                match dispatcher.send_email(email, &note.title, &note.message).await {
                    Ok(()) => {
                        email_sent = true;
                        report.emails_sent += 1;
                    }
                    Err(e) => {
                        warn!(notification_id = note.id, error = %e, "email delivery failed");
                        report.failures += 1;
                        outstanding = true;
                    }
                }
            }

            if self.sms_enabled && recipient.sms_notifications && !sms_sent {
                let body = format!("{}: {}", note.title, note.message);
                match dispatcher.send_sms(&recipient.phone_number, &body).await {
                    Ok(()) => {
                        sms_sent = true;
                        report.sms_sent += 1;
                    }
                    Err(e) => {
                        warn!(notification_id = note.id, error = %e, "sms delivery failed");
                        report.failures += 1;
                        outstanding = true;
                    }
                }
            }

            let mut active: notification::ActiveModel = note.into();
            active.email_sent = Set(email_sent);
            active.sms_sent = Set(sms_sent);
            if !outstanding {
                active.dispatched_at = Set(Some(Utc::now()));
            }
            active.update(&*self.db).await?;
        }

        counter!("freightlink.notifications.emails_sent", report.emails_sent as u64);
        counter!("freightlink.notifications.sms_sent", report.sms_sent as u64);
        info!(
            examined = report.examined,
            emails = report.emails_sent,
            sms = report.sms_sent,
            failures = report.failures,
            "notification dispatch pass complete"
        );
        Ok(report)
    }
}
