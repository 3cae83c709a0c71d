// ============================================================================
// Users toolkit
// ============================================================================
//
// The `user_data` workload: seeding from CSV and two streaming reports over
// the table.
//
// ============================================================================

pub mod analytics;
pub mod seed;

pub use analytics::{average_age, users_over_age};
pub use seed::{SeedReport, USERS_TABLE, UserRecord, UserSeeder, parse_users_csv, read_users_csv};
