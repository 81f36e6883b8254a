//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `ezstore_core` linkage and in-memory store bootstrap.
//! - Keep output deterministic for quick local sanity checks.

use ezstore_core::db::{migrations, open_db_in_memory};
use ezstore_core::{Context, DbError};

fn main() -> Result<(), DbError> {
    println!("ezstore_core ping={}", ezstore_core::ping());
    println!("ezstore_core version={}", ezstore_core::core_version());

    let conn = open_db_in_memory()?;
    println!(
        "ezstore_core schema_version={}",
        migrations::current_user_version(&conn)?
    );

    let ctx = Context::from_connection(conn)?;
    println!("ezstore_core context_id={}", ctx.context_id());
    Ok(())
}
