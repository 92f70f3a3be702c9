use validator::Validate;

use crate::auth::models::SessionUser;
use crate::db::models::{now_millis, BorrowRequest, BorrowStatus, BORROW_REQUESTS};
use crate::db::repository::CatalogRepository;
use crate::db::store::fields_of;
use crate::error::AppError;

/// The borrow form shown on a document page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Validate)]
pub struct BorrowDraft {
    #[validate(length(min = 1, message = "Reason is required"))]
    pub reason: String,
    #[validate(length(min = 1, message = "Borrow period is required"))]
    pub borrow_period: String,
}

impl BorrowDraft {
    pub fn new(reason: impl Into<String>, borrow_period: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            borrow_period: borrow_period.into(),
        }
    }

    fn trimmed(&self) -> Self {
        Self::new(self.reason.trim(), self.borrow_period.trim())
    }
}

/// Submit a pending borrow request for `document_id` on behalf of `user`.
pub async fn process_borrow_request(
    repo: &CatalogRepository,
    user: Option<&SessionUser>,
    document_id: &str,
    draft: &BorrowDraft,
) -> Result<BorrowRequest, AppError> {
    let user = user.ok_or_else(|| {
        AppError::AuthRequired("You must sign in to borrow documents".to_string())
    })?;

    let draft = draft.trimmed();
    draft.validate()?;

    let document = repo
        .find_document(document_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Document {document_id}")))?;

    let mut request = BorrowRequest {
        id: String::new(),
        document_id: document.id,
        document_title: document.title,
        user_id: user.uid.clone(),
        user_email: user.email.clone(),
        reason: draft.reason,
        borrow_period: draft.borrow_period,
        status: BorrowStatus::Pending,
        timestamp: now_millis(),
    };

    let fields = fields_of(&request)?;
    request.id = repo.store().create(BORROW_REQUESTS, fields).await?;
    tracing::info!(
        uid = %user.uid,
        "Borrow request {} submitted for '{}'",
        request.id,
        request.document_title
    );
    Ok(request)
}
