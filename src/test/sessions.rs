#[cfg(test)]
mod tests {
    use crate::{
        db::{
            clean_expired_sessions, create_user_session, get_session_by_token, invalidate_session,
        },
        error::AppError,
        test::test_utils::{TestDbBuilder, memory_pool},
    };
    use chrono::{Duration, NaiveDateTime, Utc};
    use rocket::tokio;
    use sqlx::{Pool, Sqlite};
    use uuid::Uuid;

    async fn create_test_session() -> (i64, String, NaiveDateTime, Pool<Sqlite>) {
        let test_db = TestDbBuilder::new()
            .user("sessie")
            .build()
            .await
            .expect("Failed to build test database");

        let user_id = test_db.user_id("sessie").expect("User not found");

        let token = format!("test_token_{}", Uuid::new_v4());

        let expires_at = (Utc::now() + Duration::hours(1)).naive_utc();

        (user_id, token, expires_at, test_db.pool)
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let (user_id, token, expires_at, pool) = create_test_session().await;

        let session_id = create_user_session(&pool, user_id, &token, expires_at)
            .await
            .expect("Failed to create session");

        assert!(session_id > 0, "Session ID should be positive");

        let session = get_session_by_token(&pool, &token)
            .await
            .expect("Failed to get session");

        assert_eq!(session.user_id, user_id);
        assert_eq!(session.token, token);
        assert!(session.is_valid());

        let expires_diff =
            (session.expires_at.and_utc().timestamp() - expires_at.and_utc().timestamp()).abs();
        assert!(
            expires_diff <= 1,
            "Expiration timestamps should match within 1 second"
        );
    }

    #[tokio::test]
    async fn test_get_nonexistent_session() {
        let pool = memory_pool().await.expect("Failed to create database");

        let result = get_session_by_token(&pool, "nonexistent_token").await;

        match result {
            Err(AppError::Authentication(msg)) => assert_eq!(msg, "Invalid session token"),
            other => panic!("Expected Authentication error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalidate_session() {
        let (user_id, token, expires_at, pool) = create_test_session().await;

        create_user_session(&pool, user_id, &token, expires_at)
            .await
            .expect("Failed to create session");

        invalidate_session(&pool, &token)
            .await
            .expect("Failed to invalidate session");

        assert!(get_session_by_token(&pool, &token).await.is_err());
    }

    #[tokio::test]
    async fn test_clean_expired_sessions() {
        let (user_id, token, expires_at, pool) = create_test_session().await;

        let expired_token = format!("expired_{}", Uuid::new_v4());
        let expired_at = (Utc::now() - Duration::hours(2)).naive_utc();

        create_user_session(&pool, user_id, &token, expires_at)
            .await
            .expect("Failed to create session");
        create_user_session(&pool, user_id, &expired_token, expired_at)
            .await
            .expect("Failed to create expired session");

        let expired = get_session_by_token(&pool, &expired_token)
            .await
            .expect("Expired session is still stored");
        assert!(!expired.is_valid());

        let removed = clean_expired_sessions(&pool)
            .await
            .expect("Failed to clean sessions");
        assert_eq!(removed, 1);

        assert!(get_session_by_token(&pool, &token).await.is_ok());
        assert!(get_session_by_token(&pool, &expired_token).await.is_err());
    }
}
