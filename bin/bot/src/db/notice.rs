//! Quote of the day for days without training.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use pitchside_scheduler::{CollaboratorError, DailyNoticeSource};
use rootcause::prelude::Report;
use sqlx::PgPool;
use tracing::debug;

const BUILT_IN_QUOTES: [&str; 8] = [
    "Hard work beats talent when talent doesn't work hard. ⚽",
    "Every champion was once a beginner who refused to give up. 💪",
    "The ball is round, the game lasts ninety minutes, and everything else is theory.",
    "Rest days build the legs that win matches. 🔋",
    "Play for the name on the front of the shirt. 🏆",
    "Small steps every day add up to big results. 📈",
    "Discipline is choosing what you want most over what you want now.",
    "Talk, move, support: a team is stronger than its best player. 🤝",
];

/// Picks a built-in quote. The same date always yields the same quote.
#[must_use]
pub fn built_in_quote(date: NaiveDate) -> &'static str {
    let index = date.num_days_from_ce().unsigned_abs() as usize % BUILT_IN_QUOTES.len();
    BUILT_IN_QUOTES[index]
}

/// Daily quotes backed by the `daily_quotes` table.
///
/// A date without a stored quote gets a built-in one, which is stored so
/// every team sees the same text that day.
pub struct QuoteBook {
    pool: PgPool,
}

impl QuoteBook {
    /// Creates a new quote book.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns the quote for a date, storing a built-in one if none exists.
    pub async fn get_or_create(&self, date: NaiveDate) -> Result<String, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO daily_quotes (date, text, source)
            VALUES ($1, $2, 'builtin')
            ON CONFLICT (date) DO NOTHING
            "#,
        )
        .bind(date)
        .bind(built_in_quote(date))
        .execute(&self.pool)
        .await?;

        sqlx::query_scalar("SELECT text FROM daily_quotes WHERE date = $1")
            .bind(date)
            .fetch_one(&self.pool)
            .await
    }
}

#[async_trait]
impl DailyNoticeSource for QuoteBook {
    async fn notice_for(&self, date: NaiveDate) -> Result<String, Report<CollaboratorError>> {
        let quote = self.get_or_create(date).await.map_err(|e| {
            CollaboratorError::NoticeFailed {
                date,
                reason: e.to_string(),
            }
        })?;
        debug!(%date, "daily quote loaded");
        Ok(quote)
    }
}
