use rusqlite::Connection;
use tracing::debug;

use crate::database::{execute_query, fetch_all, fetch_one, queries, with_transaction};
use crate::error::{AppError, AppResult};
use crate::models::{AuthLevel, LikeSummary};
use crate::photos::store::map_photo_row;

/// Per-user votes on photosets. Totals are always counted from the rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct LikeLedger;

impl LikeLedger {
    pub fn new() -> Self {
        Self
    }

    /// Casts `direction` (1 like, -1 dislike) on the set containing
    /// `root_id`. Casting the current vote again clears it.
    pub fn toggle(
        &self,
        conn: &mut Connection,
        level: AuthLevel,
        root_id: i64,
        direction: i64,
    ) -> AppResult<LikeSummary> {
        let AuthLevel::User(user_id) = level else {
            return Err(AppError::UnknownUser);
        };

        if direction != 1 && direction != -1 {
            return Err(AppError::BadRequest(format!(
                "Direction must be 1 or -1, got {}",
                direction
            )));
        }

        with_transaction(conn, |tx| {
            let photo = fetch_one(tx, queries::photos::SELECT_BY_ID, &[&root_id], map_photo_row)?
                .filter(|photo| photo.visible)
                .ok_or(AppError::PhotoNotFound(root_id))?;
            let set_root = photo.set_root();

            let current = self.vote(tx, set_root, user_id)?;
            let next = if current == direction { 0 } else { direction };

            execute_query(tx, queries::likes::UPSERT, &[&set_root, &user_id, &next])?;
            debug!("User {} vote on set {}: {} -> {}", user_id, set_root, current, next);

            self.summary(tx, set_root, Some(user_id))
        })
    }

    fn vote(&self, conn: &Connection, root_id: i64, user_id: i64) -> AppResult<i64> {
        let vote = fetch_one(
            conn,
            queries::likes::SELECT_VOTE,
            &[&root_id, &user_id],
            |row| row.get(0),
        )?;
        Ok(vote.unwrap_or(0))
    }

    pub fn summary(
        &self,
        conn: &Connection,
        root_id: i64,
        user_id: Option<i64>,
    ) -> AppResult<LikeSummary> {
        let totals: Vec<(i64, i64)> = fetch_all(
            conn,
            queries::likes::SELECT_TOTALS,
            &[&root_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut summary = LikeSummary::default();
        for (value, count) in totals {
            match value {
                1 => summary.likes = count,
                -1 => summary.dislikes = count,
                _ => {}
            }
        }

        if let Some(user_id) = user_id {
            summary.your_likes = self.vote(conn, root_id, user_id)?;
        }

        Ok(summary)
    }
}
