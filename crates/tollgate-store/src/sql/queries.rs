//! SQL queries for different databases.

/// Query to fetch one user by id (PostgreSQL).
pub const FETCH_USER_PG: &str = r#"
SELECT id, name, role, status, quota_bytes, used_bytes, expires_at,
       port_start, port_end, extra_ports, rate_in_bps, rate_out_bps
FROM tollgate_users
WHERE id = $1
"#;

/// Query to fetch one user by id (MySQL/SQLite).
pub const FETCH_USER_MYSQL: &str = r#"
SELECT id, name, role, status, quota_bytes, used_bytes, expires_at,
       port_start, port_end, extra_ports, rate_in_bps, rate_out_bps
FROM tollgate_users
WHERE id = ?
"#;

/// Query to list all users.
pub const LIST_USERS: &str = r#"
SELECT id, name, role, status, quota_bytes, used_bytes, expires_at,
       port_start, port_end, extra_ports, rate_in_bps, rate_out_bps
FROM tollgate_users
ORDER BY id
"#;

/// Query to list all forward rules.
pub const LIST_RULES: &str = r#"
SELECT id, user_id, source_port, target_address, protocol, used_bytes
FROM tollgate_rules
ORDER BY source_port
"#;

/// Query to read the single global policy row.
pub const FETCH_POLICY: &str = r#"
SELECT forwarding_enabled, public_bind
FROM tollgate_settings
WHERE id = 1
"#;

/// Query to add to a user's accounted usage (PostgreSQL).
pub const ADD_USER_TRAFFIC_PG: &str = r#"
UPDATE tollgate_users
SET used_bytes = used_bytes + $1
WHERE id = $2
"#;

/// Query to add to a user's accounted usage (MySQL/SQLite).
pub const ADD_USER_TRAFFIC_MYSQL: &str = r#"
UPDATE tollgate_users
SET used_bytes = used_bytes + ?
WHERE id = ?
"#;

/// Query to add to a rule's accounted usage (PostgreSQL).
pub const ADD_RULE_TRAFFIC_PG: &str = r#"
UPDATE tollgate_rules
SET used_bytes = used_bytes + $1
WHERE id = $2
"#;

/// Query to add to a rule's accounted usage (MySQL/SQLite).
pub const ADD_RULE_TRAFFIC_MYSQL: &str = r#"
UPDATE tollgate_rules
SET used_bytes = used_bytes + ?
WHERE id = ?
"#;

/// Query to zero a user's accounted usage (PostgreSQL).
pub const RESET_USER_TRAFFIC_PG: &str = r#"
UPDATE tollgate_users
SET used_bytes = 0
WHERE id = $1
"#;

/// Query to zero a user's accounted usage (MySQL/SQLite).
pub const RESET_USER_TRAFFIC_MYSQL: &str = r#"
UPDATE tollgate_users
SET used_bytes = 0
WHERE id = ?
"#;

/// Query to zero the per-rule usage of one user's rules (PostgreSQL).
pub const RESET_RULE_TRAFFIC_PG: &str = r#"
UPDATE tollgate_rules
SET used_bytes = 0
WHERE user_id = $1
"#;

/// Query to zero the per-rule usage of one user's rules (MySQL/SQLite).
pub const RESET_RULE_TRAFFIC_MYSQL: &str = r#"
UPDATE tollgate_rules
SET used_bytes = 0
WHERE user_id = ?
"#;
