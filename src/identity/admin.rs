//! User administration: listing, role changes and bans.
//!
//! Every operation reloads the caller's row and checks `is_admin` against it
//! before reading or writing any target.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use std::time::Duration;

use super::authz::AuthorizationEngine;
use super::error::bounded;
use super::sessions::delete_user_sessions;
use super::validation::{parse_role, validate_ban_duration, validate_ban_reason};
use super::AuthError;
use crate::db::User;
use crate::DbPool;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<String>,
    /// Matches the effective ban state: lapsed timed bans count as not banned.
    pub banned: Option<bool>,
    /// Case-insensitive substring of email or name
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Limit defaults to 50 and is clamped to 1..=100; negative offsets become 0.
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<User>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Clone)]
pub struct AdminDirectory {
    db: DbPool,
    engine: AuthorizationEngine,
    timeout: Duration,
}

impl AdminDirectory {
    pub fn new(db: DbPool, engine: AuthorizationEngine, timeout: Duration) -> Self {
        Self { db, engine, timeout }
    }

    /// Users ordered newest first, plus the unpaged total.
    pub async fn list_users(
        &self,
        caller: &User,
        filter: &UserFilter,
        page: PageRequest,
    ) -> Result<UserPage, AuthError> {
        bounded(self.timeout, "list_users", async {
            self.require_admin(caller).await?;
            let now = Utc::now();

            let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM users WHERE 1 = 1");
            push_filters(&mut count_query, filter, now);
            let total: i64 = count_query
                .build_query_scalar()
                .fetch_one(&self.db)
                .await?;

            let mut page_query = QueryBuilder::<Sqlite>::new("SELECT * FROM users WHERE 1 = 1");
            push_filters(&mut page_query, filter, now);
            page_query
                .push(" ORDER BY created_at DESC, id DESC LIMIT ")
                .push_bind(page.limit)
                .push(" OFFSET ")
                .push_bind(page.offset);
            let users: Vec<User> = page_query.build_query_as().fetch_all(&self.db).await?;

            Ok(UserPage {
                users,
                total,
                limit: page.limit,
                offset: page.offset,
            })
        })
        .await
    }

    /// Change a user's role. Sessions are kept: the new role applies from the
    /// next authorization check. A lapsed ban on the target is cleared on the
    /// same write.
    pub async fn set_role(&self, caller: &User, target_id: &str, new_role: &str) -> Result<User, AuthError> {
        bounded(self.timeout, "set_role", async {
            let caller = self.require_admin(caller).await?;
            let role = parse_role(new_role)?;
            let now = Utc::now();

            let result = sqlx::query(
                r#"
                UPDATE users
                SET role = ?1,
                    updated_at = ?2,
                    banned = CASE WHEN banned = 1 AND ban_expires_at IS NOT NULL AND ban_expires_at <= ?2 THEN 0 ELSE banned END,
                    ban_reason = CASE WHEN banned = 1 AND ban_expires_at IS NOT NULL AND ban_expires_at <= ?2 THEN NULL ELSE ban_reason END,
                    ban_expires_at = CASE WHEN banned = 1 AND ban_expires_at IS NOT NULL AND ban_expires_at <= ?2 THEN NULL ELSE ban_expires_at END
                WHERE id = ?3
                "#,
            )
            .bind(role.as_str())
            .bind(now)
            .bind(target_id)
            .execute(&self.db)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AuthError::NotFound);
            }

            tracing::info!(
                admin_id = %caller.id,
                user_id = %target_id,
                role = %role,
                "Changed user role"
            );
            self.fetch(target_id).await
        })
        .await
    }

    /// Ban a user and delete all of their sessions in one transaction.
    /// Re-banning updates reason and expiry and purges again.
    pub async fn ban_user(
        &self,
        caller: &User,
        target_id: &str,
        reason: &str,
        duration_seconds: Option<i64>,
    ) -> Result<User, AuthError> {
        bounded(self.timeout, "ban_user", async {
            let caller = self.require_admin(caller).await?;
            let reason = validate_ban_reason(reason)?;
            let duration = validate_ban_duration(duration_seconds)?;
            let now = Utc::now();
            let expires_at: Option<DateTime<Utc>> =
                duration.map(|seconds| now + chrono::Duration::seconds(seconds));

            let mut tx = self.db.begin().await?;

            let result = sqlx::query(
                "UPDATE users SET banned = 1, ban_reason = ?, ban_expires_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(&reason)
            .bind(expires_at)
            .bind(now)
            .bind(target_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AuthError::NotFound);
            }

            let revoked = delete_user_sessions(&mut *tx, target_id).await?;

            let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
                .bind(target_id)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;

            tracing::info!(
                admin_id = %caller.id,
                user_id = %target_id,
                expires_at = ?expires_at,
                sessions_revoked = revoked,
                "Banned user"
            );
            Ok(user)
        })
        .await
    }

    /// Lift a ban. Sessions revoked by the ban stay revoked.
    pub async fn unban_user(&self, caller: &User, target_id: &str) -> Result<User, AuthError> {
        bounded(self.timeout, "unban_user", async {
            let caller = self.require_admin(caller).await?;

            let result = sqlx::query(
                "UPDATE users SET banned = 0, ban_reason = NULL, ban_expires_at = NULL, updated_at = ? WHERE id = ?",
            )
            .bind(Utc::now())
            .bind(target_id)
            .execute(&self.db)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AuthError::NotFound);
            }

            tracing::info!(admin_id = %caller.id, user_id = %target_id, "Unbanned user");
            self.fetch(target_id).await
        })
        .await
    }

    /// Reload the caller and check admin status on the stored row.
    async fn require_admin(&self, caller: &User) -> Result<User, AuthError> {
        let current: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&caller.id)
            .fetch_optional(&self.db)
            .await?;

        match current {
            Some(user) if self.engine.is_admin(&user) => Ok(user),
            _ => {
                tracing::warn!(user_id = %caller.id, "Rejected administrative call");
                Err(AuthError::Forbidden)
            }
        }
    }

    async fn fetch(&self, id: &str) -> Result<User, AuthError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AuthError::NotFound)
    }
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter, now: DateTime<Utc>) {
    if let Some(role) = filter.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        query.push(" AND role = ").push_bind(role.to_lowercase());
    }

    match filter.banned {
        Some(true) => {
            query
                .push(" AND banned = 1 AND (ban_expires_at IS NULL OR ban_expires_at > ")
                .push_bind(now)
                .push(")");
        }
        Some(false) => {
            query
                .push(" AND (banned = 0 OR (ban_expires_at IS NOT NULL AND ban_expires_at <= ")
                .push_bind(now)
                .push("))");
        }
        None => {}
    }

    // email and name_search are stored lowercased; SQLite's LOWER() only folds ASCII
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
        query
            .push(" AND (email LIKE ")
            .push_bind(pattern.clone())
            .push(" ESCAPE '\\' OR COALESCE(name_search, '') LIKE ")
            .push_bind(pattern)
            .push(" ESCAPE '\\')");
    }
}

fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::RequestContext;
    use crate::identity::testing::{credential_store, memory_pool, promote, session_manager};
    use crate::identity::CredentialStore;

    struct Fixture {
        pool: DbPool,
        credentials: CredentialStore,
        admin: AdminDirectory,
        boss: User,
    }

    async fn fixture() -> Fixture {
        let pool = memory_pool().await;
        let credentials = credential_store(pool.clone());
        let boss = credentials.register("bob@test.com", "secret1", Some("Bob")).await.unwrap();
        let boss = promote(&pool, &boss.id).await;
        let admin = AdminDirectory::new(pool.clone(), AuthorizationEngine::new(), Duration::from_secs(5));
        Fixture { pool, credentials, admin, boss }
    }

    #[tokio::test]
    async fn test_non_admin_is_forbidden_everywhere() {
        let f = fixture().await;
        let alice = f.credentials.register("alice@test.com", "secret1", None).await.unwrap();

        assert!(matches!(
            f.admin.list_users(&alice, &UserFilter::default(), PageRequest::default()).await,
            Err(AuthError::Forbidden)
        ));
        assert!(matches!(
            f.admin.set_role(&alice, &alice.id, "admin").await,
            Err(AuthError::Forbidden)
        ));
        assert!(matches!(
            f.admin.ban_user(&alice, &f.boss.id, "mutiny", None).await,
            Err(AuthError::Forbidden)
        ));
        assert!(matches!(
            f.admin.unban_user(&alice, &f.boss.id).await,
            Err(AuthError::Forbidden)
        ));

        // Forbidden before touching the target: unknown ids are still Forbidden
        assert!(matches!(
            f.admin.set_role(&alice, "missing", "admin").await,
            Err(AuthError::Forbidden)
        ));

        let reloaded = f.credentials.find_by_id(&alice.id).await.unwrap().unwrap();
        assert_eq!(reloaded.role, "user");
    }

    #[tokio::test]
    async fn test_stale_caller_copy_is_not_trusted() {
        let f = fixture().await;
        let mut forged = f.credentials.register("mallory@test.com", "secret1", None).await.unwrap();
        forged.role = "admin".to_string();

        assert!(matches!(
            f.admin.list_users(&forged, &UserFilter::default(), PageRequest::default()).await,
            Err(AuthError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_set_role() {
        let f = fixture().await;
        let alice = f.credentials.register("alice@test.com", "secret1", None).await.unwrap();

        let updated = f.admin.set_role(&f.boss, &alice.id, "Admin").await.unwrap();
        assert_eq!(updated.role, "admin");

        let fetched = f.credentials.find_by_id(&alice.id).await.unwrap().unwrap();
        assert_eq!(fetched.role, "admin");

        assert!(matches!(
            f.admin.set_role(&f.boss, &alice.id, "not a role!").await,
            Err(AuthError::Validation { field: "role", .. })
        ));
    }

    #[tokio::test]
    async fn test_set_role_on_missing_user_creates_nothing() {
        let f = fixture().await;
        assert!(matches!(
            f.admin.set_role(&f.boss, "no-such-id", "admin").await,
            Err(AuthError::NotFound)
        ));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&f.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_set_role_keeps_sessions() {
        let f = fixture().await;
        let sessions = session_manager(f.pool.clone());
        let alice = f.credentials.register("alice@test.com", "secret1", None).await.unwrap();
        let issued = sessions.issue(&alice.id, &RequestContext::default()).await.unwrap();

        f.admin.set_role(&f.boss, &alice.id, "admin").await.unwrap();

        let (user, _) = sessions.validate(&issued.token).await.unwrap();
        assert_eq!(user.role, "admin");
    }

    #[tokio::test]
    async fn test_ban_revokes_sessions_and_is_idempotent() {
        let f = fixture().await;
        let sessions = session_manager(f.pool.clone());
        let alice = f.credentials.register("alice@test.com", "secret1", None).await.unwrap();
        let a = sessions.issue(&alice.id, &RequestContext::default()).await.unwrap();
        let b = sessions.issue(&alice.id, &RequestContext::default()).await.unwrap();

        let banned = f.admin.ban_user(&f.boss, &alice.id, "abuse", Some(3600)).await.unwrap();
        assert!(banned.banned);
        assert_eq!(banned.ban_reason.as_deref(), Some("abuse"));
        let expires = banned.ban_expires_at.unwrap();
        assert!(expires > Utc::now() + chrono::Duration::seconds(3500));

        assert!(matches!(sessions.validate(&a.token).await, Err(AuthError::SessionInvalid)));
        assert!(matches!(sessions.validate(&b.token).await, Err(AuthError::SessionInvalid)));

        // Banning again updates the ban and purges any newer session
        let c = sessions.issue(&alice.id, &RequestContext::default()).await.unwrap();
        let rebanned = f.admin.ban_user(&f.boss, &alice.id, "still abusive", None).await.unwrap();
        assert_eq!(rebanned.ban_reason.as_deref(), Some("still abusive"));
        assert!(rebanned.ban_expires_at.is_none());
        assert!(sessions.validate(&c.token).await.is_err());
    }

    #[tokio::test]
    async fn test_ban_missing_user() {
        let f = fixture().await;
        assert!(matches!(
            f.admin.ban_user(&f.boss, "ghost", "abuse", None).await,
            Err(AuthError::NotFound)
        ));
        assert!(matches!(
            f.admin.unban_user(&f.boss, "ghost").await,
            Err(AuthError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_unban_does_not_restore_sessions() {
        let f = fixture().await;
        let sessions = session_manager(f.pool.clone());
        let alice = f.credentials.register("alice@test.com", "secret1", None).await.unwrap();
        let issued = sessions.issue(&alice.id, &RequestContext::default()).await.unwrap();

        f.admin.ban_user(&f.boss, &alice.id, "abuse", None).await.unwrap();
        let unbanned = f.admin.unban_user(&f.boss, &alice.id).await.unwrap();

        assert!(!unbanned.banned);
        assert!(unbanned.ban_reason.is_none());
        assert!(unbanned.ban_expires_at.is_none());
        assert!(sessions.validate(&issued.token).await.is_err());
    }

    #[tokio::test]
    async fn test_banned_admin_cannot_administer() {
        let f = fixture().await;
        let second = f.credentials.register("carol@test.com", "secret1", None).await.unwrap();
        let second = promote(&f.pool, &second.id).await;

        f.admin.ban_user(&f.boss, &second.id, "rogue", None).await.unwrap();

        assert!(matches!(
            f.admin.list_users(&second, &UserFilter::default(), PageRequest::default()).await,
            Err(AuthError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_list_users_orders_newest_first_with_total() {
        let f = fixture().await;
        for i in 0..5 {
            f.credentials
                .register(&format!("user{}@test.com", i), "secret1", None)
                .await
                .unwrap();
        }

        let page = f
            .admin
            .list_users(&f.boss, &UserFilter::default(), PageRequest::new(Some(2), Some(1)))
            .await
            .unwrap();
        assert_eq!(page.total, 6);
        assert_eq!(page.users.len(), 2);
        assert_eq!(page.users[0].email, "user3@test.com");
        assert_eq!(page.users[1].email, "user2@test.com");
    }

    #[tokio::test]
    async fn test_list_banned_users_independent_of_page_size() {
        let f = fixture().await;
        let mut banned_ids = Vec::new();
        for i in 0..7 {
            let u = f
                .credentials
                .register(&format!("user{}@test.com", i), "secret1", None)
                .await
                .unwrap();
            if i % 2 == 0 {
                f.admin.ban_user(&f.boss, &u.id, "spam", None).await.unwrap();
                banned_ids.push(u.id);
            }
        }

        // A lapsed timed ban does not count as banned
        let lapsed = f.credentials.register("lapsed@test.com", "secret1", None).await.unwrap();
        f.admin.ban_user(&f.boss, &lapsed.id, "spam", Some(60)).await.unwrap();
        sqlx::query("UPDATE users SET ban_expires_at = ? WHERE id = ?")
            .bind(Utc::now() - chrono::Duration::seconds(1))
            .bind(&lapsed.id)
            .execute(&f.pool)
            .await
            .unwrap();

        banned_ids.sort();
        let filter = UserFilter {
            banned: Some(true),
            ..Default::default()
        };

        for limit in [1, 2, 3, 100] {
            let mut seen = Vec::new();
            let mut offset = 0;
            loop {
                let page = f
                    .admin
                    .list_users(&f.boss, &filter, PageRequest::new(Some(limit), Some(offset)))
                    .await
                    .unwrap();
                assert_eq!(page.total, banned_ids.len() as i64);
                if page.users.is_empty() {
                    break;
                }
                offset += page.users.len() as i64;
                seen.extend(page.users.into_iter().map(|u| u.id));
            }
            seen.sort();
            assert_eq!(seen, banned_ids, "limit {}", limit);
        }

        let not_banned = f
            .admin
            .list_users(
                &f.boss,
                &UserFilter {
                    banned: Some(false),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert!(not_banned.users.iter().any(|u| u.id == lapsed.id));
        assert_eq!(not_banned.total, 9 - banned_ids.len() as i64);
    }

    #[tokio::test]
    async fn test_list_users_search_and_role() {
        let f = fixture().await;
        f.credentials.register("alice@test.com", "secret1", Some("Alice Liddell")).await.unwrap();
        f.credentials.register("zed@test.com", "secret1", Some("ALICE fan")).await.unwrap();
        f.credentials.register("carol@test.com", "secret1", None).await.unwrap();
        f.credentials.register("under_score@test.com", "secret1", None).await.unwrap();

        let search = |s: &str| UserFilter {
            search: Some(s.to_string()),
            ..Default::default()
        };

        let page = f.admin.list_users(&f.boss, &search("aLiCe"), PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 2);

        // LIKE wildcards in the search text are literal
        let page = f.admin.list_users(&f.boss, &search("_"), PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.users[0].email, "under_score@test.com");

        let admins = f
            .admin
            .list_users(
                &f.boss,
                &UserFilter {
                    role: Some("ADMIN".to_string()),
                    ..Default::default()
                },
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(admins.total, 1);
        assert_eq!(admins.users[0].id, f.boss.id);
    }

    #[tokio::test]
    async fn test_search_folds_non_ascii_names() {
        let f = fixture().await;
        let emile = f
            .credentials
            .register("zola@test.com", "secret1", Some("ÉMILE Zola"))
            .await
            .unwrap();
        f.credentials.register("emile@test.com", "secret1", Some("Emile")).await.unwrap();

        let search = |s: &str| UserFilter {
            search: Some(s.to_string()),
            ..Default::default()
        };

        for term in ["émile", "ÉMILE", "Émile zo"] {
            let page = f.admin.list_users(&f.boss, &search(term), PageRequest::default()).await.unwrap();
            assert_eq!(page.total, 1, "search {:?}", term);
            assert_eq!(page.users[0].id, emile.id);
        }

        let page = f.admin.list_users(&f.boss, &search("straße"), PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 0);
    }

    #[test]
    fn test_page_request_clamps() {
        assert_eq!(PageRequest::new(None, None), PageRequest { limit: 50, offset: 0 });
        assert_eq!(PageRequest::new(Some(0), Some(-3)), PageRequest { limit: 1, offset: 0 });
        assert_eq!(PageRequest::new(Some(1000), Some(20)), PageRequest { limit: 100, offset: 20 });
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
