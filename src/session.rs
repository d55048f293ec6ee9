use tower_sessions::Session;

use crate::{AppError, AppResult};

pub const USER_ID: &str = "user_id";

pub async fn current_identity(session: &Session) -> AppResult<String> {
    session
        .get::<String>(USER_ID)
        .await?
        .ok_or(AppError::AuthFailure)
}
