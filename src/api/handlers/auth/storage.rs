//! Database helpers for accounts and refresh-token records.
//!
//! Credential hashes only leave this module through the explicit
//! `*_with_credentials` lookups; every other account query projects them out.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{is_unique_violation, DeviceContext};

/// Public account fields, safe to hand to any handler.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

/// Trusted read path: includes the credential hash. Only the login, reauth
/// and password-change flows may ask for this.
#[derive(Debug, Clone)]
pub(crate) struct AccountWithCredentials {
    pub(crate) id: Uuid,
    pub(crate) username: String,
    pub(crate) email: String,
    pub(crate) password_hash: String,
}

/// One device session: the durable half of a (access, refresh) token pair.
#[derive(Debug, Clone)]
pub(crate) struct RefreshTokenRecord {
    pub(crate) session_uuid: Uuid,
    pub(crate) account_id: Uuid,
    pub(crate) token_hash: Vec<u8>,
    pub(crate) last_login_at: i64,
    pub(crate) expires_at: i64,
}

/// Outcome when attempting to create a new account.
#[derive(Debug)]
pub(crate) enum SignupOutcome {
    Created(Account),
    EmailExists,
    UsernameExists,
}

pub(crate) async fn lookup_account(pool: &PgPool, id: Uuid) -> Result<Option<Account>> {
    let query = "SELECT id, username, email FROM accounts WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account")?;

    Ok(row.map(|row| Account {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
    }))
}

pub(crate) async fn lookup_account_with_credentials(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<AccountWithCredentials>> {
    let query = "SELECT id, username, email, password_hash FROM accounts WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account credentials")?;

    Ok(row.map(credentials_from_row))
}

pub(crate) async fn lookup_account_by_email_with_credentials(
    pool: &PgPool,
    email: &str,
) -> Result<Option<AccountWithCredentials>> {
    let query = "SELECT id, username, email, password_hash FROM accounts WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup account by email")?;

    Ok(row.map(credentials_from_row))
}

fn credentials_from_row(row: sqlx::postgres::PgRow) -> AccountWithCredentials {
    AccountWithCredentials {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
    }
}

pub(crate) async fn email_taken(pool: &PgPool, email: &str) -> Result<bool> {
    let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE email = $1) AS taken";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check email availability")?;

    Ok(row.get("taken"))
}

pub(crate) async fn username_taken(pool: &PgPool, username: &str) -> Result<bool> {
    let query = "SELECT EXISTS (SELECT 1 FROM accounts WHERE username = $1) AS taken";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check username availability")?;

    Ok(row.get("taken"))
}

pub(crate) async fn insert_account(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<SignupOutcome> {
    let query = r"
        INSERT INTO accounts
            (username, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => Ok(SignupOutcome::Created(Account {
            id: row.get("id"),
            username: username.to_string(),
            email: email.to_string(),
        })),
        Err(err) if is_unique_violation(&err) => {
            let constraint = match &err {
                sqlx::Error::Database(db_err) => db_err.constraint().map(str::to_string),
                _ => None,
            };
            if constraint.as_deref() == Some("accounts_username_key") {
                Ok(SignupOutcome::UsernameExists)
            } else {
                Ok(SignupOutcome::EmailExists)
            }
        }
        Err(err) => Err(err).context("failed to insert account"),
    }
}

/// Persist a new refresh-token record. Callers must do this before handing
/// the raw tokens out; a session without a durable record does not exist.
pub(crate) async fn insert_refresh_record(
    pool: &PgPool,
    record: &RefreshTokenRecord,
    device: &DeviceContext,
) -> Result<()> {
    let query = r"
        INSERT INTO refresh_tokens
            (session_uuid, account_id, token_hash, user_agent, ip, last_login_at, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(record.session_uuid)
        .bind(record.account_id)
        .bind(&record.token_hash)
        .bind(&device.user_agent)
        .bind(&device.ip)
        .bind(record.last_login_at)
        .bind(record.expires_at)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert refresh token record")?;

    Ok(())
}

pub(crate) async fn lookup_refresh_record(
    pool: &PgPool,
    session_uuid: Uuid,
) -> Result<Option<RefreshTokenRecord>> {
    let query = r"
        SELECT session_uuid, account_id, token_hash, last_login_at, expires_at
        FROM refresh_tokens
        WHERE session_uuid = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_uuid)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup refresh token record")?;

    Ok(row.map(record_from_row))
}

/// Atomically claim a record for rotation.
///
/// The `DELETE .. RETURNING` is the single-winner step: of two concurrent
/// rotations for the same session uuid, exactly one gets the row back. The
/// loser sees `None` and must treat the session as expired (accepted race,
/// narrowed by the grace buffer).
pub(crate) async fn claim_refresh_record(
    pool: &PgPool,
    session_uuid: Uuid,
) -> Result<Option<RefreshTokenRecord>> {
    let query = r"
        DELETE FROM refresh_tokens
        WHERE session_uuid = $1
        RETURNING session_uuid, account_id, token_hash, last_login_at, expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(session_uuid)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to claim refresh token record")?;

    Ok(row.map(record_from_row))
}

/// Remove exactly one session's record (logout).
pub(crate) async fn delete_refresh_record(pool: &PgPool, session_uuid: Uuid) -> Result<bool> {
    let query = "DELETE FROM refresh_tokens WHERE session_uuid = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(session_uuid)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete refresh token record")?;

    Ok(result.rows_affected() > 0)
}

fn record_from_row(row: sqlx::postgres::PgRow) -> RefreshTokenRecord {
    RefreshTokenRecord {
        session_uuid: row.get("session_uuid"),
        account_id: row.get("account_id"),
        token_hash: row.get("token_hash"),
        last_login_at: row.get("last_login_at"),
        expires_at: row.get("expires_at"),
    }
}

pub(crate) async fn update_password(
    pool: &PgPool,
    account_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let query = "UPDATE accounts SET password_hash = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(password_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update password")?;

    Ok(())
}

/// Outcome for an email change.
#[derive(Debug)]
pub(crate) enum EmailChangeOutcome {
    Updated,
    EmailExists,
}

pub(crate) async fn update_email(
    pool: &PgPool,
    account_id: Uuid,
    email: &str,
) -> Result<EmailChangeOutcome> {
    let query = "UPDATE accounts SET email = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(account_id)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(EmailChangeOutcome::Updated),
        Err(err) if is_unique_violation(&err) => Ok(EmailChangeOutcome::EmailExists),
        Err(err) => Err(err).context("failed to update email"),
    }
}

/// Deleting the account cascades to its refresh-token records.
pub(crate) async fn delete_account(pool: &PgPool, account_id: Uuid) -> Result<()> {
    let query = "DELETE FROM accounts WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete account")?;

    Ok(())
}

pub(crate) async fn update_settings(
    pool: &PgPool,
    account_id: Uuid,
    settings: &str,
) -> Result<()> {
    let query = "UPDATE accounts SET settings = $2::jsonb WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(account_id)
        .bind(settings)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update settings")?;

    Ok(())
}

pub(crate) async fn account_settings(pool: &PgPool, account_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT settings::text AS settings FROM accounts WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(account_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch settings")?;

    Ok(row.map(|row| row.get("settings")))
}
