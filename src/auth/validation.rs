use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::identity::{map_user_row, normalize_email};
use crate::config::ValidationConfig;
use crate::constants::{USER_HASH_LENGTH, VALIDATION_CODE_RANGE, VALIDATION_CODE_WIDTH};
use crate::database::{execute_query, fetch_one, get_connection, queries, with_transaction, DbPool};
use crate::error::{AppError, AppResult};
use crate::mail::Mailer;
use crate::models::PhotoUser;

/// Issues emailed one-time codes and turns a correct code into the
/// account's bearer hash.
pub struct ValidationCodeManager {
    pool: DbPool,
    mailer: Arc<dyn Mailer>,
    config: ValidationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUser {
    pub user_id: i64,
    pub hash: String,
}

enum CheckOutcome {
    Locked,
    Mismatch { now_locked: bool },
    Valid(ValidatedUser),
}

pub fn generate_code() -> String {
    let code = OsRng.gen_range(0..VALIDATION_CODE_RANGE);
    format!("{:0width$}", code, width = VALIDATION_CODE_WIDTH)
}

pub fn generate_user_hash() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(USER_HASH_LENGTH)
        .map(char::from)
        .collect()
}

fn checked_email(email: &str) -> AppResult<String> {
    let email = normalize_email(email);
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::BadRequest("Invalid email address".to_string())),
    }
}

impl ValidationCodeManager {
    pub fn new(pool: DbPool, mailer: Arc<dyn Mailer>, config: ValidationConfig) -> Self {
        Self {
            pool,
            mailer,
            config,
        }
    }

    /// Returns the pending code for `email`, creating the account on first
    /// request, and emails it. The code is stored before the mail attempt, so
    /// a failed delivery leaves the account untouched.
    pub async fn issue_or_fetch_code(&self, email: &str) -> AppResult<String> {
        let email = checked_email(email)?;

        let code = {
            let conn = get_connection(&self.pool)?;
            self.stored_or_new_code(&conn, &email)?
        };

        if let Err(e) = self
            .mailer
            .send_code(&email, &code, &self.config.code_subject)
            .await
        {
            warn!("Failed to mail validation code to {}: {}", email, e);
            return Err(e);
        }

        Ok(code)
    }

    fn stored_or_new_code(&self, conn: &Connection, email: &str) -> AppResult<String> {
        // Codes are not rotated on repeat requests; the first insert wins.
        execute_query(conn, queries::users::INSERT, &[&email, &generate_code()])?;

        let user = fetch_one(conn, queries::users::SELECT_BY_EMAIL, &[&email], map_user_row)?
            .ok_or_else(|| AppError::Internal("Account vanished after insert".to_string()))?;

        Ok(user.validation_code)
    }

    /// Compares a submitted code against the pending one.
    ///
    /// A mismatch costs one retry; once the retry count passes
    /// `max_retries` the account is locked and every further check answers
    /// `UserLocked` without touching the row.
    pub fn check_code(
        &self,
        conn: &mut Connection,
        email: &str,
        submitted: &str,
    ) -> AppResult<ValidatedUser> {
        let email = checked_email(email)?;
        let max_retries = self.config.max_retries;

        let outcome = with_transaction(conn, |tx| {
            let user: PhotoUser =
                fetch_one(tx, queries::users::SELECT_BY_EMAIL, &[&email], map_user_row)?
                    .ok_or(AppError::UnknownUser)?;

            if user.retry_count > max_retries {
                return Ok(CheckOutcome::Locked);
            }

            if submitted.trim() != user.validation_code.trim() {
                execute_query(tx, queries::users::INCREMENT_RETRY, &[&user.id])?;
                return Ok(CheckOutcome::Mismatch {
                    now_locked: user.retry_count + 1 > max_retries,
                });
            }

            let hash = if user.hash.is_empty() {
                generate_user_hash()
            } else {
                user.hash
            };
            execute_query(tx, queries::users::MARK_VALIDATED, &[&hash, &user.id])?;

            Ok(CheckOutcome::Valid(ValidatedUser {
                user_id: user.id,
                hash,
            }))
        })?;

        match outcome {
            CheckOutcome::Locked => Err(AppError::UserLocked),
            CheckOutcome::Mismatch { now_locked: true } => {
                warn!("Account {} locked after repeated wrong codes", email);
                Err(AppError::UserLocked)
            }
            CheckOutcome::Mismatch { now_locked: false } => Err(AppError::ValidationFailed),
            CheckOutcome::Valid(validated) => {
                info!("Validated account {}", email);
                Ok(validated)
            }
        }
    }
}
