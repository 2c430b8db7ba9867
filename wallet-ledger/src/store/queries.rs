//! SQL statements
//!
//! sqlx prepares each statement once per connection and reuses it.

pub const GET_BALANCE_BY_USER_ID: &str = r#"
    SELECT user_id, amount
    FROM balances
    WHERE user_id = $1
"#;

pub const GRANT_BALANCE_BY_USER_ID: &str = r#"
    INSERT INTO balances (user_id, amount) VALUES ($1, $2)
    ON CONFLICT (user_id)
    DO UPDATE SET
        amount = balances.amount + EXCLUDED.amount,
        updated_at = NOW()
"#;

pub const DEDUCT_BALANCE_BY_USER_ID: &str = r#"
    UPDATE balances SET
        amount = amount - $1,
        updated_at = NOW()
    WHERE user_id = $2 AND amount - $1 >= 0
"#;

pub const INSERT_HISTORY: &str = r#"
    INSERT INTO histories (id, user_id, target_user_id, amount, type, notes, created_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

pub const UPSERT_HISTORY_SUMMARY: &str = r#"
    INSERT INTO history_summaries (id, user_id, target_user_id, amount, type)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (id)
    DO UPDATE SET
        amount = history_summaries.amount + EXCLUDED.amount,
        updated_at = NOW()
"#;

pub const GET_LATEST_HISTORY_BY_USER_ID: &str = r#"
    SELECT id, user_id, target_user_id, amount, type, notes, created_at
    FROM histories
    WHERE user_id = $1
    ORDER BY created_at DESC
    LIMIT $2
"#;

pub const GET_HISTORY_SUMMARY_BY_USER_ID_AND_TYPE: &str = r#"
    SELECT user_id, target_user_id, amount, type
    FROM history_summaries
    WHERE user_id = $1 AND type = $2
    ORDER BY amount DESC
    LIMIT $3
"#;

pub const INSERT_USER: &str = r#"
    INSERT INTO users (id, username) VALUES ($1, $2)
"#;

pub const GET_USER_BY_ID: &str = r#"
    SELECT id, username
    FROM users
    WHERE id = $1
"#;

pub const GET_USER_BY_USERNAME: &str = r#"
    SELECT id, username
    FROM users
    WHERE username = $1
"#;
