#[cfg(test)]
mod tests {
    use crate::auth::{AccountRules, Role, is_legacy_hash};
    use crate::db::{
        authenticate_user, count_users_by_role, find_user_by_email, get_users_by_role,
        register_account,
    };
    use crate::error::AppError;
    use crate::test::test_utils::{
        STANDARD_PASSWORD, TEST_BCRYPT_COST, TEST_DOMAIN, TestDbBuilder, memory_pool, test_email,
    };
    use rocket::tokio;
    use sqlx::{Pool, Sqlite};

    fn rules() -> AccountRules {
        AccountRules {
            institution_domain: Some(TEST_DOMAIN.to_string()),
            hash_cost: TEST_BCRYPT_COST,
            ..AccountRules::default()
        }
    }

    #[tokio::test]
    async fn test_register_derives_roles() {
        let pool = memory_pool().await.expect("Failed to create database");

        let teacher = register_account(&pool, &rules(), &test_email("jan"), "geheim123")
            .await
            .expect("Failed to register teacher");
        assert_eq!(teacher.role, Role::Teacher);
        assert_eq!(teacher.email, "jan@school.test");

        let director = register_account(
            &pool,
            &rules(),
            &test_email("directie.marleen"),
            "geheim123",
        )
        .await
        .expect("Failed to register director");
        assert_eq!(director.role, Role::Director);

        assert_eq!(count_users_by_role(&pool, Role::Teacher).await.unwrap(), 1);
        assert_eq!(count_users_by_role(&pool, Role::Director).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let pool = memory_pool().await.expect("Failed to create database");

        register_account(&pool, &rules(), &test_email("jan"), "geheim123")
            .await
            .expect("First registration should succeed");

        let result = register_account(&pool, &rules(), " JAN@School.test ", "anderwachtwoord").await;

        match result {
            Err(AppError::DuplicateAccount(email)) => assert_eq!(email, "jan@school.test"),
            other => panic!("Expected DuplicateAccount, got {:?}", other),
        }

        let teachers = get_users_by_role(&pool, Role::Teacher).await.unwrap();
        assert_eq!(teachers.len(), 1);
    }

    #[tokio::test]
    async fn test_registration_rejects_foreign_domain_and_short_password() {
        let pool = memory_pool().await.expect("Failed to create database");

        let result = register_account(&pool, &rules(), "jan@gmail.com", "geheim123").await;
        assert!(matches!(result, Err(AppError::InvalidDomain(_))));

        let result = register_account(&pool, &rules(), "not-an-address", "geheim123").await;
        assert!(matches!(result, Err(AppError::InvalidDomain(_))));

        let result = register_account(&pool, &rules(), &test_email("jan"), "kort").await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        assert!(
            find_user_by_email(&pool, &test_email("jan"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_authenticate() {
        let test_db = TestDbBuilder::new()
            .user("jan")
            .user("directie.marleen")
            .build()
            .await
            .expect("Failed to build test database");
        let pool = &test_db.pool;

        let user = authenticate_user(pool, &test_email("jan"), STANDARD_PASSWORD, TEST_BCRYPT_COST)
            .await
            .expect("Valid credentials should authenticate");
        assert_eq!(Some(user.id), test_db.user_id("jan"));
        assert_eq!(user.role, Role::Teacher);

        let director = authenticate_user(
            pool,
            "Directie.Marleen@school.test",
            STANDARD_PASSWORD,
            TEST_BCRYPT_COST,
        )
        .await
        .expect("Email lookup should ignore case");
        assert_eq!(director.role, Role::Director);

        let wrong_password =
            authenticate_user(pool, &test_email("jan"), "wrong_password", TEST_BCRYPT_COST).await;
        assert!(matches!(wrong_password, Err(AppError::InvalidCredentials)));

        let unknown =
            authenticate_user(pool, &test_email("piet"), STANDARD_PASSWORD, TEST_BCRYPT_COST).await;
        assert!(matches!(unknown, Err(AppError::InvalidCredentials)));
    }

    async fn stored_password(pool: &Pool<Sqlite>) -> String {
        sqlx::query_scalar::<_, String>("SELECT password FROM users WHERE email = ?")
            .bind(test_email("an"))
            .fetch_one(pool)
            .await
            .expect("Failed to read stored password")
    }

    #[tokio::test]
    async fn test_legacy_hash_is_upgraded_on_login() {
        let test_db = TestDbBuilder::new()
            .legacy_user("an", "oudwachtwoord")
            .build()
            .await
            .expect("Failed to build test database");
        let pool = &test_db.pool;

        assert!(is_legacy_hash(&stored_password(pool).await));

        let wrong = authenticate_user(pool, &test_email("an"), "fout", TEST_BCRYPT_COST).await;
        assert!(matches!(wrong, Err(AppError::InvalidCredentials)));
        assert!(is_legacy_hash(&stored_password(pool).await));

        authenticate_user(pool, &test_email("an"), "oudwachtwoord", TEST_BCRYPT_COST)
            .await
            .expect("Legacy password should authenticate");

        let upgraded = stored_password(pool).await;
        assert!(upgraded.starts_with("$2"), "Expected bcrypt hash, got {}", upgraded);

        authenticate_user(pool, &test_email("an"), "oudwachtwoord", TEST_BCRYPT_COST)
            .await
            .expect("Upgraded password should still authenticate");
    }
}
