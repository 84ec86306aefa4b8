//! `SQLite` persistence: connection setup, migrations, repositories.

pub mod connection;
pub mod migrations;
pub mod repositories;
